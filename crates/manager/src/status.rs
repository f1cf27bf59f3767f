use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tessera_core::ShardError;

/// Point-in-time view of pass history, served on `/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub passes: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    pub last_error: Option<String>,
    pub last_error_kind: Option<&'static str>,
    /// Unix seconds of the last successful pass.
    pub last_success_at: Option<i64>,
    pub last_pass_ms: u64,
    pub shards: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// No pass has succeeded yet.
    NotStarted,
    /// Last success is older than the staleness bound.
    Stale { age_secs: i64 },
}

impl Readiness {
    pub fn is_ready(&self) -> bool { matches!(self, Readiness::Ready) }
}

/// Pass outcomes recorded by the executor, read by the health server.
#[derive(Debug, Default)]
pub struct PassStatus {
    inner: Mutex<PassReport>,
}

impl PassStatus {
    pub fn new() -> Self { Self::default() }

    pub fn record_success(&self, took: Duration, shards: usize) {
        let mut r = self.inner.lock().unwrap();
        r.passes += 1;
        r.consecutive_failures = 0;
        r.last_success_at = Some(chrono::Utc::now().timestamp());
        r.last_pass_ms = took.as_millis() as u64;
        r.shards = shards;
    }

    pub fn record_failure(&self, took: Duration, err: &ShardError) {
        let mut r = self.inner.lock().unwrap();
        r.passes += 1;
        r.failures += 1;
        r.consecutive_failures += 1;
        r.last_error = Some(err.to_string());
        r.last_error_kind = Some(err.kind());
        r.last_pass_ms = took.as_millis() as u64;
    }

    pub fn report(&self) -> PassReport { self.inner.lock().unwrap().clone() }

    pub fn readiness(&self, stale_after: Duration) -> Readiness {
        self.readiness_at(chrono::Utc::now().timestamp(), stale_after)
    }

    pub fn readiness_at(&self, now: i64, stale_after: Duration) -> Readiness {
        match self.inner.lock().unwrap().last_success_at {
            None => Readiness::NotStarted,
            Some(at) => {
                let age_secs = now.saturating_sub(at);
                if age_secs > stale_after.as_secs() as i64 { Readiness::Stale { age_secs } } else { Readiness::Ready }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_follows_last_success() {
        let status = PassStatus::new();
        let stale_after = Duration::from_secs(60);
        assert_eq!(status.readiness(stale_after), Readiness::NotStarted);

        status.record_failure(Duration::from_millis(5), &ShardError::RegistryUnavailable("down".into()));
        assert!(!status.readiness(stale_after).is_ready());

        status.record_success(Duration::from_millis(7), 1);
        let at = status.report().last_success_at.unwrap();
        assert_eq!(status.readiness_at(at + 30, stale_after), Readiness::Ready);
        assert_eq!(status.readiness_at(at + 61, stale_after), Readiness::Stale { age_secs: 61 });

        // failures after a success keep readiness until the bound expires
        status.record_failure(Duration::from_millis(5), &ShardError::PassTimeout(Duration::from_secs(10)));
        assert_eq!(status.readiness_at(at + 1, stale_after), Readiness::Ready);

        let r = status.report();
        assert_eq!((r.passes, r.failures, r.consecutive_failures), (3, 2, 1));
        assert_eq!(r.last_error_kind, Some("pass_timeout"));
    }
}
