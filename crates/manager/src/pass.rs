use std::sync::Arc;
use std::time::Instant;

use kube::ResourceExt;
use metrics::{counter, histogram};
use serde::Serialize;
use tessera_apply::{build_shard, ReconcileOutcome};
use tessera_core::{ShardError, ShardPlanner, ShardResult, ShardingManagerParams, TopologySnapshot};
use tessera_kubehub::Shard;
use tessera_store::{RegistrySync, TopologyDiff};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ManagerContext;

/// What one successful pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassSummary {
    pub epoch: u64,
    pub clusters: usize,
    pub topology: TopologyDiff,
    pub shards: Vec<(String, ReconcileOutcome)>,
    pub pruned: Vec<String>,
}

impl PassSummary {
    pub fn writes(&self) -> usize {
        self.shards.iter().filter(|(_, o)| *o != ReconcileOutcome::Unchanged).count() + self.pruned.len()
    }
}

/// Plan and build every desired Shard for a snapshot. Fails before any write.
pub fn desired_shards(
    snapshot: &TopologySnapshot,
    planner: &dyn ShardPlanner,
    params: &ShardingManagerParams,
) -> ShardResult<Vec<Shard>> {
    planner
        .plan(snapshot, params)
        .iter()
        .map(|a| build_shard(&a.topology, params, &a.shard_key, &a.operator_identity))
        .collect()
}

/// One-shot sync and build without touching the cluster.
pub async fn plan_shards(
    sync: &RegistrySync,
    planner: &dyn ShardPlanner,
    params: &ShardingManagerParams,
) -> ShardResult<(TopologySnapshot, Vec<Shard>)> {
    let snapshot = sync.sync().await?;
    let shards = desired_shards(&snapshot, planner, params)?;
    Ok((snapshot, shards))
}

/// Runs reconciliation passes, at most one at a time.
pub struct ShardingManager {
    ctx: Arc<ManagerContext>,
    pass_lock: Mutex<()>,
}

impl ShardingManager {
    pub fn new(ctx: ManagerContext) -> Self { Self { ctx: Arc::new(ctx), pass_lock: Mutex::new(()) } }

    pub fn context(&self) -> &Arc<ManagerContext> { &self.ctx }

    /// Sync, swap the cache, build, reconcile, prune.
    ///
    /// On error the cache and published shards stay as they were, except for
    /// shards already converged earlier in the same pass.
    pub async fn run_pass(&self) -> ShardResult<PassSummary> {
        let _guard = self.pass_lock.lock().await;
        let ctx = &self.ctx;

        let snapshot = ctx.sync.sync().await?;
        let desired = desired_shards(&snapshot, ctx.planner.as_ref(), &ctx.params)?;
        let clusters = snapshot.clusters.len();
        let (_, topology) = ctx.cache.replace(snapshot);
        let epoch = ctx.cache.epoch();

        let mut shards = Vec::with_capacity(desired.len());
        let mut first_err = None;
        for shard in desired.iter() {
            let name = shard.name_any();
            match ctx.handler.reconcile(shard).await {
                Ok(outcome) => shards.push((name, outcome)),
                Err(e) => {
                    warn!(shard = %name, error = %e, "shard reconcile failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        let keep: Vec<String> = shards.iter().map(|(n, _)| n.clone()).collect();
        let pruned = ctx.handler.prune(&ctx.params.owner_selector(), &keep).await?;
        if !pruned.is_empty() {
            info!(pruned = ?pruned, "retired shards removed");
        }
        Ok(PassSummary { epoch, clusters, topology, shards, pruned })
    }

    /// `run_pass` under the pass budget, with metrics and status recorded.
    pub async fn execute(&self) -> ShardResult<PassSummary> {
        let budget = self.ctx.settings.pass_timeout;
        let started = Instant::now();
        let res = match tokio::time::timeout(budget, self.run_pass()).await {
            Ok(res) => res,
            Err(_) => Err(ShardError::PassTimeout(budget)),
        };
        let took = started.elapsed();
        histogram!("tessera_pass_ms", took.as_secs_f64() * 1000.0);
        counter!("tessera_pass_total", 1u64);
        match &res {
            Ok(summary) => {
                self.ctx.status.record_success(took, summary.shards.len());
                if summary.writes() > 0 {
                    info!(epoch = summary.epoch, clusters = summary.clusters, writes = summary.writes(), took_ms = took.as_millis() as u64, "pass converged");
                } else {
                    debug!(epoch = summary.epoch, clusters = summary.clusters, took_ms = took.as_millis() as u64, "pass: nothing to do");
                }
            }
            Err(e) => {
                counter!("tessera_pass_failed_total", 1u64, "kind" => e.kind());
                self.ctx.status.record_failure(took, e);
                warn!(error = %e, kind = e.kind(), retryable = e.is_retryable(), "pass failed; keeping previous state");
            }
        }
        res
    }
}
