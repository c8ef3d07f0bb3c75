//! Health snapshot reported by the readiness probe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time view of pipeline health.
///
/// Recomputed on each probe from sampled state; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// Jobs waiting for a worker
    pub queue_depth: usize,
    /// Workers currently processing a job
    pub active_workers: usize,
    /// Workers waiting for work
    pub idle_workers: usize,
    /// Bytes of retained artifacts
    pub storage_used_bytes: u64,
    /// Configured storage ceiling
    pub storage_ceiling_bytes: u64,
    /// used / ceiling, in [0.0, 1.0]
    pub storage_utilization: f64,
    /// Most recent job failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl HealthSnapshot {
    /// Fraction of the ceiling in use, clamped to [0.0, 1.0].
    pub fn utilization(used: u64, ceiling: u64) -> f64 {
        if ceiling == 0 {
            return 1.0;
        }
        (used as f64 / ceiling as f64).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization_bounds() {
        assert_eq!(HealthSnapshot::utilization(0, 100), 0.0);
        assert_eq!(HealthSnapshot::utilization(50, 100), 0.5);
        assert_eq!(HealthSnapshot::utilization(150, 100), 1.0);
        assert_eq!(HealthSnapshot::utilization(10, 0), 1.0);
    }
}
