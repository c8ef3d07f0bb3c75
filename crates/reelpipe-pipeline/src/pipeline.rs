//! Pipeline facade tying together queue, workers, storage and health.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use reelpipe_media::FetchClient;
use reelpipe_models::{HealthSnapshot, JobId, JobRecord, JobSpec, JobState};
use reelpipe_storage::StorageManager;

use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::health::PipelineHealth;
use crate::processor::{JobProcessor, MediaProcessor};
use crate::queue::JobQueue;
use crate::worker::WorkerPool;

/// The download-and-transcode pipeline.
///
/// One instance owns the queue, the storage manager and the worker pool;
/// the HTTP surface and any in-process callers share it behind an `Arc`.
pub struct Pipeline {
    config: PipelineConfig,
    queue: Arc<JobQueue>,
    storage: Arc<StorageManager>,
    health: Arc<PipelineHealth>,
    validator: FetchClient,
    pool: WorkerPool,
}

impl Pipeline {
    /// Build a pipeline with the production media processor.
    pub async fn new(config: PipelineConfig) -> PipelineResult<Self> {
        let fetch_client = FetchClient::new(config.allowed_hosts.clone())?;
        let processor = Arc::new(MediaProcessor::new(fetch_client));
        Self::with_processor(config, processor).await
    }

    /// Build a pipeline around a custom processor.
    pub async fn with_processor(
        config: PipelineConfig,
        processor: Arc<dyn JobProcessor>,
    ) -> PipelineResult<Self> {
        let storage = Arc::new(
            StorageManager::new(&config.storage_root, config.storage_ceiling_bytes).await?,
        );
        let queue = Arc::new(JobQueue::new(config.queue_capacity).with_retention(config.job_retention));
        let health = Arc::new(PipelineHealth::new());
        let validator = FetchClient::new(config.allowed_hosts.clone())?;

        let pool = WorkerPool::new(
            config.clone(),
            Arc::clone(&queue),
            Arc::clone(&storage),
            processor,
            Arc::clone(&health),
        );

        info!(
            root = %config.storage_root.display(),
            ceiling = config.storage_ceiling_bytes,
            "Pipeline initialized"
        );

        Ok(Self {
            config,
            queue,
            storage,
            health,
            validator,
            pool,
        })
    }

    /// Start the worker pool.
    pub async fn start(&self) {
        self.pool.start().await;
    }

    /// Stop the worker pool, waiting for in-flight jobs.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    /// Submit a job.
    ///
    /// The source URL is validated here so obviously bad requests fail at
    /// submission; everything else about the job stays opaque until a
    /// worker picks it up.
    pub async fn submit(&self, spec: JobSpec) -> PipelineResult<JobId> {
        self.validator.validate_source(&spec.source_url)?;
        self.queue.submit(spec).await
    }

    /// Look up a job's record.
    ///
    /// Reading a completed job counts as access for eviction ordering.
    pub async fn status(&self, job_id: JobId) -> PipelineResult<JobRecord> {
        let record = self.queue.status(job_id).await?;
        if record.state == JobState::Completed {
            let _ = self.storage.touch(job_id).await;
        }
        Ok(record)
    }

    /// Cancel a job.
    pub async fn cancel(&self, job_id: JobId) -> PipelineResult<()> {
        self.queue.cancel(job_id).await
    }

    /// Point-in-time health view for the readiness probe.
    pub async fn snapshot(&self) -> HealthSnapshot {
        let queue_depth = self.queue.depth().await;
        let used = self.storage.usage().await;
        let ceiling = self.storage.ceiling();
        let busy = self.health.busy_workers();

        HealthSnapshot {
            timestamp: Utc::now(),
            queue_depth,
            active_workers: busy,
            idle_workers: self.config.workers.saturating_sub(busy),
            storage_used_bytes: used,
            storage_ceiling_bytes: ceiling,
            storage_utilization: HealthSnapshot::utilization(used, ceiling),
            last_error: self.health.last_error(),
        }
    }

    /// Liveness: the pool is still scheduling.
    pub fn is_alive(&self) -> bool {
        self.health.is_alive(self.config.liveness_timeout)
    }

    /// Readiness: can new work be accepted and make progress.
    ///
    /// Not ready when the queue is at its bound, storage is at the
    /// ceiling, or all workers are busy with nothing advancing recently.
    pub async fn is_ready(&self) -> bool {
        let snapshot = self.snapshot().await;
        let workers_ok = snapshot.idle_workers > 0
            || self.health.progress_age() < self.config.liveness_timeout;

        snapshot.queue_depth < self.config.queue_capacity
            && snapshot.storage_utilization < 1.0
            && workers_ok
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
