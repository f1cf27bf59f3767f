use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use kube::{CustomResourceExt, ResourceExt};
use tessera_core::{
    ModuloClusterPlanner, ShardPlanner, ShardingManagerParams, SingleShardPlanner, DEFAULT_OPERATOR_IDENTITY_LABEL,
    DEFAULT_SHARD_IDENTITY_LABEL,
};
use tessera_kubehub::{get_kube_client, KubeShardApi, Shard};
use tessera_manager::{plan_shards, LoopSettings, ManagerContext, ShardingManager};
use tessera_store::{RegistrySync, SyncMode};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod health;

#[derive(Parser, Debug)]
#[command(name = "tessera", version, about = "Publishes Shard resources from the cluster registry")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum SyncModeArg { PerCluster, Bulk }

impl From<SyncModeArg> for SyncMode {
    fn from(m: SyncModeArg) -> Self {
        match m {
            SyncModeArg::PerCluster => SyncMode::PerCluster,
            SyncModeArg::Bulk => SyncMode::Bulk,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the sharding manager until SIGINT/SIGTERM
    Run {
        #[command(flatten)]
        manager: ManagerArgs,
        /// Address for /liveness, /readiness, /metrics and /status
        #[arg(long = "listen", env = "TESSERA_LISTEN", default_value = "0.0.0.0:8080")]
        listen: SocketAddr,
    },
    /// Print the Shard CustomResourceDefinition as YAML
    Crd,
    /// Sync the registry once and print the shards that would be published
    Plan {
        #[command(flatten)]
        manager: ManagerArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct ManagerArgs {
    /// Manager identity: registry key and owner label value
    #[arg(long = "sharding-manager-identity", env = "TESSERA_IDENTITY", default_value = "devx")]
    identity: String,
    /// Operator identity label value (defaults to the manager identity)
    #[arg(long = "operator-identity", env = "TESSERA_OPERATOR_IDENTITY")]
    operator_identity: Option<String>,
    #[arg(long = "operator-identity-label", env = "TESSERA_OPERATOR_IDENTITY_LABEL", default_value = DEFAULT_OPERATOR_IDENTITY_LABEL)]
    operator_identity_label: String,
    #[arg(long = "shard-identity-label", env = "TESSERA_SHARD_IDENTITY_LABEL", default_value = DEFAULT_SHARD_IDENTITY_LABEL)]
    shard_identity_label: String,
    /// Namespace the Shard objects live in
    #[arg(long = "shard-namespace", env = "TESSERA_SHARD_NAMESPACE", default_value = "shard-namespace")]
    namespace: String,
    /// http(s):// registry service or file:// directory of registry documents
    #[arg(long = "registry-endpoint", env = "TESSERA_REGISTRY_ENDPOINT", default_value = "")]
    registry_endpoint: String,
    /// Kubeconfig file; in-cluster configuration when omitted
    #[arg(long = "kube-config", env = "TESSERA_KUBECONFIG")]
    kube_config: Option<PathBuf>,
    #[arg(long = "sync-interval-secs", env = "TESSERA_SYNC_INTERVAL_SECS", default_value_t = 10)]
    sync_interval_secs: u64,
    /// Pass budget (defaults to the sync interval)
    #[arg(long = "pass-timeout-secs", env = "TESSERA_PASS_TIMEOUT_SECS")]
    pass_timeout_secs: Option<u64>,
    #[arg(long = "sync-mode", value_enum, env = "TESSERA_SYNC_MODE", default_value_t = SyncModeArg::PerCluster)]
    sync_mode: SyncModeArg,
    /// Number of shards (>1 buckets clusters by name hash)
    #[arg(long = "shards", env = "TESSERA_SHARDS", default_value_t = 1)]
    shards: usize,
    /// Shard key when running a single shard
    #[arg(long = "shard-key", env = "TESSERA_SHARD_KEY", default_value = "0")]
    shard_key: String,
    #[arg(long = "fetch-concurrency", env = "TESSERA_FETCH_CONCURRENCY", default_value_t = 8)]
    fetch_concurrency: usize,
}

impl ManagerArgs {
    fn params(&self) -> ShardingManagerParams {
        let operator = self.operator_identity.clone().unwrap_or_else(|| self.identity.clone());
        ShardingManagerParams::new(&self.identity, operator, &self.namespace)
            .with_labels(&self.shard_identity_label, &self.operator_identity_label)
            .with_registry_endpoint(&self.registry_endpoint)
            .with_kubeconfig(self.kube_config.clone())
    }

    fn settings(&self) -> LoopSettings {
        let interval = Duration::from_secs(self.sync_interval_secs.max(1));
        LoopSettings::new(interval)
            .with_pass_timeout(self.pass_timeout_secs.map(Duration::from_secs).unwrap_or(interval))
            .with_sync_mode(self.sync_mode.into())
            .with_fetch_concurrency(self.fetch_concurrency)
    }

    fn planner(&self) -> Result<Arc<dyn ShardPlanner>> {
        if self.shards > 1 {
            return Ok(Arc::new(ModuloClusterPlanner::new(self.shards)));
        }
        tessera_apply::shard_name(&self.shard_key).with_context(|| format!("invalid --shard-key {:?}", self.shard_key))?;
        Ok(Arc::new(SingleShardPlanner::new(&self.shard_key)))
    }
}

fn init_tracing() {
    let env = std::env::var("TESSERA_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() -> Option<metrics_exporter_prometheus::PrometheusHandle> {
    match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "failed to install metrics recorder; /metrics disabled");
            None
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn registry_timeout(args: &ManagerArgs) -> Duration { Duration::from_secs(args.sync_interval_secs.max(1)) }

async fn run(args: ManagerArgs, listen: SocketAddr) -> Result<()> {
    let params = args.params();
    params.validate().context("invalid manager configuration")?;
    let planner = args.planner()?;
    let settings = args.settings();
    let metrics = init_metrics();

    let registry = tessera_registry::client_for_endpoint(&params.registry_endpoint, registry_timeout(&args))
        .context("building registry client")?;
    let client = get_kube_client(params.kubeconfig_path.as_deref()).await?;
    let shards = Arc::new(KubeShardApi::new(client));

    let ctx = ManagerContext::new(params, settings, registry, shards, planner).context("building manager context")?;
    let state = Arc::new(health::HealthState { status: ctx.status.clone(), stale_after: settings.stale_after, metrics });
    let manager = Arc::new(ShardingManager::new(ctx));

    let cancel = CancellationToken::new();
    let listener = health::bind(listen).await.with_context(|| format!("binding health server on {}", listen))?;
    let health_task = tokio::spawn(health::serve(listener, state, cancel.clone()));
    let manager_task = tokio::spawn(manager.run(cancel.clone()));

    shutdown_signal().await;
    info!("shutdown signal received");
    cancel.cancel();
    if let Err(e) = manager_task.await {
        error!(error = %e, "manager task panicked");
    }
    match health_task.await {
        Ok(Err(e)) => error!(error = %e, "health server failed"),
        Err(e) => error!(error = %e, "health server task panicked"),
        Ok(Ok(())) => {}
    }
    info!("tessera stopped");
    Ok(())
}

fn print_plan(output: Output, shards: &[Shard], operator_label: &str) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(shards)?),
        Output::Human => {
            for s in shards {
                let operator = s.labels().get(operator_label).cloned().unwrap_or_default();
                println!("{} • {} clusters • {}", s.name_any(), s.spec.clusters.len(), operator);
                for c in s.spec.clusters.iter() {
                    let ids: Vec<&str> = c.identities.iter().map(|i| i.name.as_str()).collect();
                    println!("    {} ({}) • {}", c.name, c.locality, ids.join(", "));
                }
            }
        }
    }
    Ok(())
}

async fn plan(args: ManagerArgs, output: Output) -> Result<()> {
    let params = args.params();
    params.validate().context("invalid manager configuration")?;
    let planner = args.planner()?;
    let settings = args.settings();
    let registry = tessera_registry::client_for_endpoint(&params.registry_endpoint, registry_timeout(&args))
        .context("building registry client")?;
    let sync = RegistrySync::new(registry, params.identity.clone())
        .with_mode(settings.sync_mode)
        .with_concurrency(settings.fetch_concurrency);
    let (snapshot, shards) = plan_shards(&sync, planner.as_ref(), &params).await.context("planning shards")?;
    info!(clusters = snapshot.clusters.len(), identities = snapshot.identity_count(), shards = shards.len(), "plan ready");
    print_plan(output, &shards, &params.operator_identity_label)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { manager, listen } => run(manager, listen).await,
        Commands::Crd => {
            print!("{}", serde_yaml::to_string(&Shard::crd())?);
            Ok(())
        }
        Commands::Plan { manager } => plan(manager, cli.output).await,
    }
}
