use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use metrics::counter;
use tessera_core::{Trigger, TriggerSource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{ShardApi, ShardEvent};

/// Pause before re-opening a watch stream that ended.
pub const WATCH_REOPEN_DELAY: Duration = Duration::from_millis(500);

/// Watch owned shards and turn every event into a coalesced wake-up.
///
/// A stream that ends is re-opened after [`WATCH_REOPEN_DELAY`]. Returns only
/// when `cancel` fires.
pub async fn run_shard_watcher(
    api: Arc<dyn ShardApi>,
    namespace: String,
    selector: String,
    trigger: Trigger,
    cancel: CancellationToken,
) {
    info!(namespace = %namespace, selector = %selector, "shard watcher started");
    loop {
        let mut stream = api.watch(&namespace, &selector);
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shard watcher cancelled");
                    return;
                }
                next = stream.next() => next,
            };
            match next {
                Some(Ok(ev)) => {
                    counter!("tessera_watch_events_total", 1u64);
                    match &ev {
                        ShardEvent::Applied(name) => debug!(shard = %name, "shard applied"),
                        ShardEvent::Deleted(name) => debug!(shard = %name, "shard deleted"),
                        ShardEvent::Restarted(count) => debug!(count, "shard watch re-listed"),
                    }
                    trigger.fire(TriggerSource::Watch);
                }
                Some(Err(e)) => {
                    counter!("tessera_watch_errors_total", 1u64);
                    warn!(error = %e, "shard watch error; stream backs off and re-lists");
                }
                None => break,
            }
        }
        counter!("tessera_watch_reopen_total", 1u64);
        error!(delay_ms = WATCH_REOPEN_DELAY.as_millis() as u64, "shard watch stream ended; re-opening");
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("shard watcher cancelled");
                return;
            }
            _ = tokio::time::sleep(WATCH_REOPEN_DELAY) => {}
        }
    }
}
