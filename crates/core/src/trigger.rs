//! Coalescing wake-up signal for the reconciliation executor.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use metrics::counter;
use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerSource {
    Startup,
    Timer,
    Watch,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Startup => "startup",
            TriggerSource::Timer => "timer",
            TriggerSource::Watch => "watch",
        }
    }
}

#[derive(Default)]
struct Inner {
    notify: Notify,
    pending: AtomicBool,
    fired: AtomicU64,
}

/// Single pending flag shared by all producers.
///
/// Any number of `fire` calls between two `wait` calls collapse into one
/// wake-up. Firing never blocks.
#[derive(Clone, Default)]
pub struct Trigger {
    inner: Arc<Inner>,
}

impl Trigger {
    pub fn new() -> Self { Self::default() }

    pub fn fire(&self, source: TriggerSource) {
        self.inner.fired.fetch_add(1, Ordering::Relaxed);
        let was_pending = self.inner.pending.swap(true, Ordering::AcqRel);
        counter!("tessera_trigger_total", 1u64, "source" => source.as_str());
        trace!(source = source.as_str(), coalesced = was_pending, "trigger fired");
        self.inner.notify.notify_one();
    }

    /// Wait for the next wake-up and clear the pending flag.
    pub async fn wait(&self) {
        self.inner.notify.notified().await;
        self.inner.pending.store(false, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool { self.inner.pending.load(Ordering::Acquire) }

    /// Total `fire` calls, coalesced or not.
    pub fn fired(&self) -> u64 { self.inner.fired.load(Ordering::Relaxed) }
}

impl std::fmt::Debug for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trigger").field("pending", &self.is_pending()).field("fired", &self.fired()).finish()
    }
}
