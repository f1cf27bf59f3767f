//! Tessera manager: keeps Shard objects converged on the registry topology.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use tessera_apply::ShardHandler;
use tessera_core::{ShardPlanner, ShardResult, ShardingManagerParams, Trigger};
use tessera_kubehub::ShardApi;
use tessera_registry::RegistryClient;
use tessera_store::{RegistrySync, SyncMode, TopologyCache};

mod pass;
mod run;
mod status;

pub use pass::{desired_shards, plan_shards, PassSummary, ShardingManager};
pub use status::{PassReport, PassStatus, Readiness};

/// Loop timing and sync behaviour. Fixed at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub interval: Duration,
    pub pass_timeout: Duration,
    pub sync_mode: SyncMode,
    pub fetch_concurrency: usize,
    /// Readiness turns false when the last success is older than this.
    pub stale_after: Duration,
}

impl LoopSettings {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pass_timeout: interval,
            sync_mode: SyncMode::PerCluster,
            fetch_concurrency: 8,
            stale_after: interval * 6,
        }
    }

    pub fn with_pass_timeout(mut self, pass_timeout: Duration) -> Self {
        self.pass_timeout = pass_timeout;
        self
    }

    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    pub fn with_fetch_concurrency(mut self, n: usize) -> Self {
        self.fetch_concurrency = n.max(1);
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

impl Default for LoopSettings {
    fn default() -> Self { Self::new(Duration::from_secs(10)) }
}

/// Everything a pass needs, built once at startup and shared.
pub struct ManagerContext {
    pub params: ShardingManagerParams,
    pub settings: LoopSettings,
    pub sync: RegistrySync,
    pub shards: Arc<dyn ShardApi>,
    pub handler: ShardHandler,
    pub planner: Arc<dyn ShardPlanner>,
    pub cache: Arc<TopologyCache>,
    pub trigger: Trigger,
    pub status: Arc<PassStatus>,
}

impl ManagerContext {
    pub fn new(
        params: ShardingManagerParams,
        settings: LoopSettings,
        registry: Arc<dyn RegistryClient>,
        shards: Arc<dyn ShardApi>,
        planner: Arc<dyn ShardPlanner>,
    ) -> ShardResult<Self> {
        params.validate()?;
        let sync = RegistrySync::new(registry, params.identity.clone())
            .with_mode(settings.sync_mode)
            .with_concurrency(settings.fetch_concurrency);
        let handler =
            ShardHandler::new(shards.clone(), params.namespace.clone()).with_owner_label(params.shard_identity_label.clone());
        Ok(Self {
            params,
            settings,
            sync,
            shards,
            handler,
            planner,
            cache: Arc::new(TopologyCache::new()),
            trigger: Trigger::new(),
            status: Arc::new(PassStatus::new()),
        })
    }
}
