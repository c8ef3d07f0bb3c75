//! Shared health state sampled by the liveness and readiness probes.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

/// Health counters updated by the worker pool and read by the probes.
///
/// The heartbeat answers "is the pool's supervisor still scheduling";
/// progress answers "has any worker advanced a job recently". Liveness
/// reads only the former, so a long ffmpeg run never looks like a hang.
#[derive(Debug)]
pub struct PipelineHealth {
    /// Unix millis of the last supervisor tick or worker step boundary.
    heartbeat: AtomicI64,
    /// Unix millis of the last job state advance by any worker.
    last_progress: AtomicI64,
    busy_workers: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

impl PipelineHealth {
    pub fn new() -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            heartbeat: AtomicI64::new(now),
            last_progress: AtomicI64::new(now),
            busy_workers: AtomicUsize::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Refresh the liveness heartbeat.
    pub fn beat(&self) {
        self.heartbeat
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Record that a worker advanced a job (also beats).
    pub fn progress(&self) {
        let now = Utc::now().timestamp_millis();
        self.heartbeat.store(now, Ordering::Relaxed);
        self.last_progress.store(now, Ordering::Relaxed);
    }

    pub fn heartbeat_age(&self) -> Duration {
        millis_since(self.heartbeat.load(Ordering::Relaxed))
    }

    pub fn progress_age(&self) -> Duration {
        millis_since(self.last_progress.load(Ordering::Relaxed))
    }

    /// Liveness: the pool's supervisor ticked within the timeout.
    pub fn is_alive(&self, liveness_timeout: Duration) -> bool {
        self.heartbeat_age() < liveness_timeout
    }

    pub fn worker_busy(&self) {
        self.busy_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_idle(&self) {
        self.busy_workers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn busy_workers(&self) -> usize {
        self.busy_workers.load(Ordering::Relaxed)
    }

    /// Record the most recent job failure.
    pub fn record_error(&self, error: impl Into<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(error.into());
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|g| g.clone())
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

fn millis_since(then_millis: i64) -> Duration {
    let elapsed = Utc::now().timestamp_millis().saturating_sub(then_millis);
    Duration::from_millis(elapsed.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_health_is_alive() {
        let health = PipelineHealth::new();
        assert!(health.is_alive(Duration::from_secs(30)));
        assert!(health.heartbeat_age() < Duration::from_secs(1));
    }

    #[test]
    fn test_busy_gauge() {
        let health = PipelineHealth::new();
        health.worker_busy();
        health.worker_busy();
        health.worker_idle();
        assert_eq!(health.busy_workers(), 1);
    }

    #[test]
    fn test_last_error_overwrites() {
        let health = PipelineHealth::new();
        assert!(health.last_error().is_none());

        health.record_error("first");
        health.record_error("second");
        assert_eq!(health.last_error().as_deref(), Some("second"));
    }
}
