//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the pipeline: worker pool, queue, storage, timeouts.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of worker tasks
    pub workers: usize,
    /// Maximum number of pending jobs before submissions are rejected
    pub queue_capacity: usize,
    /// Downloads root directory
    pub storage_root: PathBuf,
    /// Disk ceiling for retained artifacts, in bytes
    pub storage_ceiling_bytes: u64,
    /// Hosts accepted as job sources (empty = any http(s) host)
    pub allowed_hosts: Vec<String>,
    /// Hard timeout for one fetch attempt
    pub fetch_timeout: Duration,
    /// Hard timeout for one transcode attempt
    pub transcode_timeout: Duration,
    /// Maximum retryable failures per job before it fails for good
    pub max_retries: u32,
    /// Base delay for retry backoff (doubles each attempt)
    pub retry_base_delay: Duration,
    /// Cap on the retry backoff delay
    pub retry_max_delay: Duration,
    /// How long shutdown waits for in-flight jobs
    pub shutdown_timeout: Duration,
    /// Heartbeat age beyond which the liveness probe fails
    pub liveness_timeout: Duration,
    /// How long terminal job records stay queryable before being pruned
    pub job_retention: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 32,
            storage_root: PathBuf::from("downloads"),
            storage_ceiling_bytes: 2 * 1024 * 1024 * 1024, // 2 GiB
            allowed_hosts: Vec::new(),
            fetch_timeout: Duration::from_secs(120),
            transcode_timeout: Duration::from_secs(300),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            liveness_timeout: Duration::from_secs(30),
            job_retention: Duration::from_secs(3600),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workers: std::env::var("PIPELINE_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.workers),
            queue_capacity: std::env::var("PIPELINE_QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.queue_capacity),
            storage_root: std::env::var("PIPELINE_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            storage_ceiling_bytes: std::env::var("PIPELINE_STORAGE_CEILING_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.storage_ceiling_bytes),
            allowed_hosts: std::env::var("PIPELINE_ALLOWED_HOSTS")
                .map(|s| {
                    s.split(',')
                        .map(|h| h.trim().to_string())
                        .filter(|h| !h.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            fetch_timeout: Duration::from_secs(
                std::env::var("PIPELINE_FETCH_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.fetch_timeout.as_secs()),
            ),
            transcode_timeout: Duration::from_secs(
                std::env::var("PIPELINE_TRANSCODE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.transcode_timeout.as_secs()),
            ),
            max_retries: std::env::var("PIPELINE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_base_delay: Duration::from_millis(
                std::env::var("PIPELINE_RETRY_BASE_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.retry_base_delay.as_millis() as u64),
            ),
            retry_max_delay: defaults.retry_max_delay,
            shutdown_timeout: Duration::from_secs(
                std::env::var("PIPELINE_SHUTDOWN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.shutdown_timeout.as_secs()),
            ),
            liveness_timeout: defaults.liveness_timeout,
            job_retention: Duration::from_secs(
                std::env::var("PIPELINE_JOB_RETENTION_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.job_retention.as_secs()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.workers, 2);
        assert_eq!(config.max_retries, 3);
        assert!(config.allowed_hosts.is_empty());
        assert!(config.retry_base_delay < config.retry_max_delay);
    }
}
