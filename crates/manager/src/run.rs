use std::sync::Arc;
use std::time::Instant;

use tessera_core::{ShardError, TriggerSource};
use tessera_kubehub::run_shard_watcher;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::ShardingManager;

impl ShardingManager {
    /// Timer, watcher and executor until `cancel` fires. Fires a startup pass.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let ctx = self.context().clone();
        let mut tasks = JoinSet::new();

        let (trigger, interval, stop) = (ctx.trigger.clone(), ctx.settings.interval, cancel.clone());
        tasks.spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately; startup fires on its own
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tick.tick() => trigger.fire(TriggerSource::Timer),
                }
            }
        });

        tasks.spawn(run_shard_watcher(
            ctx.shards.clone(),
            ctx.params.namespace.clone(),
            ctx.params.owner_selector(),
            ctx.trigger.clone(),
            cancel.clone(),
        ));

        ctx.trigger.fire(TriggerSource::Startup);
        tasks.spawn(self.clone().run_executor(cancel.clone()));

        info!(identity = %ctx.params.identity, namespace = %ctx.params.namespace, interval_secs = ctx.settings.interval.as_secs(), "sharding manager running");
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "background task panicked; shutting down");
                cancel.cancel();
            }
        }
        info!("sharding manager stopped");
    }

    /// Wait on the trigger and run one pass per wake-up. Triggers fired while a
    /// pass runs collapse into a single follow-up pass.
    pub async fn run_executor(self: Arc<Self>, cancel: CancellationToken) {
        let trigger = self.context().trigger.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = trigger.wait() => {}
            }
            let started = Instant::now();
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.context().status.record_failure(started.elapsed(), &ShardError::Cancelled);
                    info!("in-flight pass abandoned on shutdown");
                    break;
                }
                _ = self.execute() => {}
            }
        }
    }
}
