//! Worker pool: N tasks pulling jobs from the queue and driving them
//! through fetch, transcode and finalize.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use reelpipe_media::{MediaError, MediaResult};
use reelpipe_models::{JobId, JobRecord, JobState, OutputFormat};
use reelpipe_storage::{StorageError, StorageManager};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::health::PipelineHealth;
use crate::processor::JobProcessor;
use crate::queue::JobQueue;
use crate::retry::RetryConfig;

/// Filename of the fetched source inside a job's scratch directory.
const SOURCE_FILENAME: &str = "source.bin";

/// How often the supervisor refreshes the liveness heartbeat.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Shared state every worker task operates on.
struct WorkerContext {
    config: PipelineConfig,
    retry: RetryConfig,
    queue: Arc<JobQueue>,
    storage: Arc<StorageManager>,
    processor: Arc<dyn JobProcessor>,
    health: Arc<PipelineHealth>,
}

/// The processing step a job is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Fetch,
    Transcode,
}

/// Fixed pool of worker tasks plus a heartbeat supervisor.
pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        config: PipelineConfig,
        queue: Arc<JobQueue>,
        storage: Arc<StorageManager>,
        processor: Arc<dyn JobProcessor>,
        health: Arc<PipelineHealth>,
    ) -> Self {
        let retry = RetryConfig {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay,
        };
        let (shutdown, _) = watch::channel(false);

        Self {
            ctx: Arc::new(WorkerContext {
                config,
                retry,
                queue,
                storage,
                processor,
                health,
            }),
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker tasks and the heartbeat supervisor.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return;
        }

        info!(workers = self.ctx.config.workers, "Starting worker pool");

        for worker_id in 0..self.ctx.config.workers {
            let ctx = Arc::clone(&self.ctx);
            let shutdown_rx = self.shutdown.subscribe();
            handles.push(tokio::spawn(worker_loop(ctx, worker_id, shutdown_rx)));
        }

        let health = Arc::clone(&self.ctx.health);
        let mut shutdown_rx = self.shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => health.beat(),
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    /// Signal shutdown and wait for in-flight jobs, bounded by the
    /// configured shutdown timeout.
    pub async fn shutdown(&self) {
        info!("Shutting down worker pool");
        let _ = self.shutdown.send(true);

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        if handles.is_empty() {
            return;
        }

        if tokio::time::timeout(self.ctx.config.shutdown_timeout, join_all(handles))
            .await
            .is_err()
        {
            warn!("Workers did not stop within the shutdown timeout");
        } else {
            info!("Worker pool stopped");
        }
    }
}

async fn worker_loop(
    ctx: Arc<WorkerContext>,
    worker_id: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(worker_id, "Worker started");

    while let Some(record) = ctx.queue.next(&mut shutdown_rx).await {
        ctx.health.worker_busy();
        ctx.health.progress();
        process_job(&ctx, record).await;
        ctx.health.worker_idle();
    }

    debug!(worker_id, "Worker stopped");
}

/// Drive one job to a terminal state and clean up its scratch space.
async fn process_job(ctx: &WorkerContext, record: JobRecord) {
    let job_id = record.id;

    let Some(cancel) = ctx.queue.cancel_receiver(job_id).await else {
        return;
    };

    let scratch = match ctx.storage.allocate(job_id).await {
        Ok(dir) => dir,
        Err(e) => {
            error!(job_id = %job_id, "Failed to allocate scratch: {e}");
            ctx.health.record_error(e.to_string());
            ctx.queue.fail(job_id, format!("storage allocation failed: {e}")).await;
            return;
        }
    };

    match run_job(ctx, &record, &scratch, cancel).await {
        Ok((final_path, evicted)) => {
            ctx.queue.mark_evicted(&evicted).await;
            ctx.queue.complete(job_id, final_path.clone()).await;
            ctx.health.progress();
            info!(job_id = %job_id, path = %final_path.display(), "Job completed");
        }
        Err(PipelineError::Media(e)) if e.is_cancelled() => {
            ctx.queue.fail(job_id, "cancelled").await;
            info!(job_id = %job_id, "Job cancelled");
        }
        Err(e) => {
            // A failed finalize may still have evicted other artifacts to
            // make room; their records must reflect that.
            if let PipelineError::Storage(StorageError::Exhausted { evicted, .. }) = &e {
                ctx.queue.mark_evicted(evicted).await;
            }
            error!(job_id = %job_id, "Job failed: {e}");
            ctx.health.record_error(e.to_string());
            ctx.queue.fail(job_id, e.to_string()).await;
        }
    }

    ctx.storage.discard_scratch(job_id).await;
}

/// Run the fetch and transcode steps with per-step retry, then finalize.
///
/// Retryable failures re-enter at the step that failed; a transcode retry
/// falls back to re-fetching when the downloaded source is gone or empty.
async fn run_job(
    ctx: &WorkerContext,
    record: &JobRecord,
    scratch: &Path,
    cancel: watch::Receiver<bool>,
) -> PipelineResult<(PathBuf, Vec<JobId>)> {
    let job_id = record.id;
    let source_path = scratch.join(SOURCE_FILENAME);
    let mut step = Step::Fetch;
    let mut attempts = record.attempts;

    let output_path = loop {
        if *cancel.borrow() {
            return Err(MediaError::Cancelled.into());
        }

        let step_result: MediaResult<Option<PathBuf>> = match step {
            Step::Fetch => {
                ctx.queue.set_state(job_id, JobState::Fetching).await;
                ctx.health.progress();
                with_timeout(
                    ctx.config.fetch_timeout,
                    ctx.processor
                        .fetch(&record.source_url, &source_path, cancel.clone()),
                )
                .await
                .map(|_| None)
            }
            Step::Transcode => {
                ctx.queue.set_state(job_id, JobState::Transcoding).await;
                ctx.health.progress();
                let format: OutputFormat = record
                    .format
                    .parse()
                    .map_err(|_| MediaError::UnsupportedFormat(record.format.clone()))?;
                let out = scratch.join(format!("output.{}", format.extension()));
                with_timeout(
                    ctx.config.transcode_timeout,
                    ctx.processor
                        .transcode(&source_path, &out, format, cancel.clone()),
                )
                .await
                .map(|_| Some(out))
            }
        };

        match step_result {
            Ok(None) => step = Step::Transcode,
            Ok(Some(out)) => break out,
            Err(e) if e.is_cancelled() => return Err(e.into()),
            Err(e) if e.is_retryable() && attempts < ctx.config.max_retries => {
                attempts = ctx.queue.record_attempt(job_id, e.to_string()).await;
                let delay = ctx.retry.delay_for_attempt(attempts);
                warn!(
                    job_id = %job_id,
                    attempt = attempts,
                    step = ?step,
                    "Step failed, retrying in {delay:?}: {e}"
                );

                let mut cancel_wait = cancel.clone();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel_wait.changed() => {}
                }

                if step == Step::Transcode && !artifact_valid(&source_path).await {
                    debug!(job_id = %job_id, "Fetched source no longer valid, re-fetching");
                    step = Step::Fetch;
                }
            }
            Err(e) => return Err(e.into()),
        }
    };

    Ok(ctx.storage.finalize(job_id, &output_path).await?)
}

/// Wrap a step in its hard timeout.
async fn with_timeout<T>(
    limit: Duration,
    fut: impl std::future::Future<Output = MediaResult<T>>,
) -> MediaResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(MediaError::Timeout(limit.as_secs())),
    }
}

/// A fetched source is still usable if it exists and is non-empty.
async fn artifact_valid(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
