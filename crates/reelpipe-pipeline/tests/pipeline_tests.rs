//! End-to-end pipeline tests with a stubbed media processor.
//!
//! The stub stands in for the network and ffmpeg so these tests exercise
//! queueing, dispatch, retry, cancellation, eviction and shutdown.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::watch;

use reelpipe_media::{MediaError, MediaResult};
use reelpipe_models::{JobId, JobRecord, JobSpec, JobState, OutputFormat};
use reelpipe_pipeline::{JobProcessor, Pipeline, PipelineConfig, PipelineError};

/// Stub processor with scriptable failures.
#[derive(Default)]
struct StubProcessor {
    /// Fail this many fetch calls with a network error before succeeding.
    fetch_failures: AtomicU32,
    /// Fail this many transcode calls before succeeding.
    transcode_failures: AtomicU32,
    /// Remove the fetched source when a scripted transcode failure fires.
    corrupt_source_on_failure: bool,
    /// Block fetch until cancelled instead of completing.
    block_until_cancelled: bool,
    /// Size of the artifact written by transcode.
    output_bytes: AtomicUsize,
    fetch_calls: AtomicU32,
    transcode_calls: AtomicU32,
    /// Source URL of every fetch call, in order.
    fetch_log: Mutex<Vec<String>>,
}

impl StubProcessor {
    fn new() -> Self {
        Self {
            output_bytes: AtomicUsize::new(100),
            ..Default::default()
        }
    }
}

#[async_trait]
impl JobProcessor for StubProcessor {
    async fn fetch(
        &self,
        source_url: &str,
        dest: &Path,
        mut cancel: watch::Receiver<bool>,
    ) -> MediaResult<u64> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_log.lock().unwrap().push(source_url.to_string());

        if self.block_until_cancelled {
            loop {
                if *cancel.borrow() {
                    return Err(MediaError::Cancelled);
                }
                if cancel.changed().await.is_err() {
                    return Err(MediaError::Cancelled);
                }
            }
        }

        if self
            .fetch_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(MediaError::network("connection reset"));
        }

        tokio::fs::write(dest, b"source-bytes").await?;
        Ok(12)
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        _format: OutputFormat,
        _cancel: watch::Receiver<bool>,
    ) -> MediaResult<()> {
        self.transcode_calls.fetch_add(1, Ordering::SeqCst);

        if self
            .transcode_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            if self.corrupt_source_on_failure {
                let _ = tokio::fs::remove_file(input).await;
            }
            return Err(MediaError::transcode_failed("ffmpeg crashed", None, Some(1)));
        }

        if !input.exists() {
            return Err(MediaError::transcode_failed("no input", None, None));
        }
        tokio::fs::write(output, vec![0u8; self.output_bytes.load(Ordering::SeqCst)]).await?;
        Ok(())
    }
}

fn test_config(dir: &TempDir) -> PipelineConfig {
    PipelineConfig {
        workers: 2,
        queue_capacity: 4,
        storage_root: dir.path().join("downloads"),
        storage_ceiling_bytes: 1024 * 1024,
        allowed_hosts: Vec::new(),
        fetch_timeout: Duration::from_secs(5),
        transcode_timeout: Duration::from_secs(5),
        max_retries: 3,
        retry_base_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(10),
        shutdown_timeout: Duration::from_secs(5),
        liveness_timeout: Duration::from_secs(30),
        job_retention: Duration::from_secs(3600),
    }
}

async fn started(config: PipelineConfig, stub: Arc<StubProcessor>) -> Pipeline {
    let pipeline = Pipeline::with_processor(config, stub).await.unwrap();
    pipeline.start().await;
    pipeline
}

fn spec(format: &str) -> JobSpec {
    JobSpec::new("https://example.com/video.mp4", format)
}

async fn wait_for_terminal(pipeline: &Pipeline, job_id: JobId) -> JobRecord {
    for _ in 0..500 {
        let record = pipeline.status(job_id).await.unwrap();
        if record.is_terminal() {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never reached a terminal state");
}

#[tokio::test]
async fn happy_path_completes_and_cleans_scratch() {
    let dir = TempDir::new().unwrap();
    let pipeline = started(test_config(&dir), Arc::new(StubProcessor::new())).await;

    let job_id = pipeline.submit(spec("mp4")).await.unwrap();
    let record = wait_for_terminal(&pipeline, job_id).await;

    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.attempts, 0);
    assert!(record.error.is_none());

    let output = record.output_path.expect("completed job has an artifact");
    assert!(output.exists());
    assert_eq!(output.extension().unwrap(), "mp4");

    let scratch = dir
        .path()
        .join("downloads")
        .join("scratch")
        .join(job_id.to_string());
    assert!(!scratch.exists(), "scratch must be discarded after the job");

    pipeline.shutdown().await;
}

#[tokio::test]
async fn invalid_source_rejected_at_submission() {
    let dir = TempDir::new().unwrap();
    let pipeline = started(test_config(&dir), Arc::new(StubProcessor::new())).await;

    let err = pipeline
        .submit(JobSpec::new("ftp://example.com/video.mp4", "mp4"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Media(MediaError::InvalidSource(_))
    ));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn queue_rejects_beyond_capacity() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    // No workers started, so submissions pile up.
    let pipeline = Pipeline::with_processor(config, Arc::new(StubProcessor::new()))
        .await
        .unwrap();

    for _ in 0..4 {
        pipeline.submit(spec("mp4")).await.unwrap();
    }

    let err = pipeline.submit(spec("mp4")).await.unwrap_err();
    assert!(matches!(err, PipelineError::QueueFull(4)));
}

#[tokio::test]
async fn transient_fetch_failures_retry_to_success() {
    let dir = TempDir::new().unwrap();
    let stub = Arc::new(StubProcessor {
        fetch_failures: AtomicU32::new(2),
        ..StubProcessor::new()
    });
    let pipeline = started(test_config(&dir), Arc::clone(&stub)).await;

    let job_id = pipeline.submit(spec("mp4")).await.unwrap();
    let record = wait_for_terminal(&pipeline, job_id).await;

    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.attempts, 2);
    assert_eq!(stub.fetch_calls.load(Ordering::SeqCst), 3);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn retries_exhaust_into_failure() {
    let dir = TempDir::new().unwrap();
    let stub = Arc::new(StubProcessor {
        fetch_failures: AtomicU32::new(u32::MAX),
        ..StubProcessor::new()
    });
    let pipeline = started(test_config(&dir), Arc::clone(&stub)).await;

    let job_id = pipeline.submit(spec("mp4")).await.unwrap();
    let record = wait_for_terminal(&pipeline, job_id).await;

    assert_eq!(record.state, JobState::Failed);
    assert_eq!(record.attempts, 3);
    assert!(record.error.unwrap().contains("Network"));
    // Initial attempt plus the configured retries.
    assert_eq!(stub.fetch_calls.load(Ordering::SeqCst), 4);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn unsupported_format_fails_without_retry() {
    let dir = TempDir::new().unwrap();
    let stub = Arc::new(StubProcessor::new());
    let pipeline = started(test_config(&dir), Arc::clone(&stub)).await;

    let job_id = pipeline.submit(spec("flac")).await.unwrap();
    let record = wait_for_terminal(&pipeline, job_id).await;

    assert_eq!(record.state, JobState::Failed);
    assert_eq!(record.attempts, 0);
    assert!(record.error.unwrap().contains("Unsupported format"));
    assert_eq!(stub.transcode_calls.load(Ordering::SeqCst), 0);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn transcode_retry_refetches_when_source_is_gone() {
    let dir = TempDir::new().unwrap();
    let stub = Arc::new(StubProcessor {
        transcode_failures: AtomicU32::new(1),
        corrupt_source_on_failure: true,
        ..StubProcessor::new()
    });
    let pipeline = started(test_config(&dir), Arc::clone(&stub)).await;

    let job_id = pipeline.submit(spec("mp4")).await.unwrap();
    let record = wait_for_terminal(&pipeline, job_id).await;

    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.attempts, 1);
    // The corrupted source forced a second fetch before the retry.
    assert_eq!(stub.fetch_calls.load(Ordering::SeqCst), 2);
    assert_eq!(stub.transcode_calls.load(Ordering::SeqCst), 2);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn cancel_in_flight_job() {
    let dir = TempDir::new().unwrap();
    let stub = Arc::new(StubProcessor {
        block_until_cancelled: true,
        ..StubProcessor::new()
    });
    let pipeline = started(test_config(&dir), Arc::clone(&stub)).await;

    let job_id = pipeline.submit(spec("mp4")).await.unwrap();

    // Wait until a worker owns the job.
    for _ in 0..500 {
        if pipeline.status(job_id).await.unwrap().state == JobState::Fetching {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    pipeline.cancel(job_id).await.unwrap();
    let record = wait_for_terminal(&pipeline, job_id).await;

    assert_eq!(record.state, JobState::Failed);
    assert_eq!(record.error.as_deref(), Some("cancelled"));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn eviction_marks_older_job_evicted() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.workers = 1;
    // Room for one 100-byte artifact, not two.
    config.storage_ceiling_bytes = 150;
    let pipeline = started(config, Arc::new(StubProcessor::new())).await;

    let first = pipeline.submit(spec("mp4")).await.unwrap();
    let first_record = wait_for_terminal(&pipeline, first).await;
    assert_eq!(first_record.state, JobState::Completed);
    let first_path = first_record.output_path.unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = pipeline.submit(spec("mp4")).await.unwrap();
    let second_record = wait_for_terminal(&pipeline, second).await;
    assert_eq!(second_record.state, JobState::Completed);

    let first_record = pipeline.status(first).await.unwrap();
    assert_eq!(first_record.state, JobState::Evicted);
    assert!(first_record.output_path.is_none());
    assert!(!first_path.exists());

    let snapshot = pipeline.snapshot().await;
    assert_eq!(snapshot.storage_used_bytes, 100);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn exhausted_finalize_marks_evicted_jobs() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.workers = 1;
    config.storage_ceiling_bytes = 150;
    let stub = Arc::new(StubProcessor::new());
    let pipeline = started(config, Arc::clone(&stub)).await;

    let first = pipeline.submit(spec("mp4")).await.unwrap();
    let first_record = wait_for_terminal(&pipeline, first).await;
    assert_eq!(first_record.state, JobState::Completed);
    let first_path = first_record.output_path.unwrap();

    // The second artifact exceeds the ceiling outright: finalize evicts
    // the first job trying to make room, then still fails.
    stub.output_bytes.store(200, Ordering::SeqCst);
    let second = pipeline.submit(spec("mp4")).await.unwrap();
    let second_record = wait_for_terminal(&pipeline, second).await;

    assert_eq!(second_record.state, JobState::Failed);
    assert!(second_record.error.unwrap().contains("Storage exhausted"));

    // The eviction stands even though finalize failed, and the first
    // job's record must say so rather than point at a deleted file.
    let first_record = pipeline.status(first).await.unwrap();
    assert_eq!(first_record.state, JobState::Evicted);
    assert!(first_record.output_path.is_none());
    assert!(!first_path.exists());

    let snapshot = pipeline.snapshot().await;
    assert_eq!(snapshot.storage_used_bytes, 0);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn each_job_dispatched_exactly_once() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.workers = 3;
    config.queue_capacity = 16;
    let stub = Arc::new(StubProcessor::new());
    let pipeline = started(config, Arc::clone(&stub)).await;

    let mut job_ids = Vec::new();
    for n in 0..12 {
        let spec = JobSpec::new(format!("https://example.com/v{n}.mp4"), "mp4");
        job_ids.push(pipeline.submit(spec).await.unwrap());
    }
    for job_id in job_ids {
        let record = wait_for_terminal(&pipeline, job_id).await;
        assert_eq!(record.state, JobState::Completed);
    }

    // No job may be handed to more than one worker: every source URL is
    // distinct, so the fetch log must hold each exactly once.
    let log = stub.fetch_log.lock().unwrap().clone();
    assert_eq!(log.len(), 12);
    let unique: HashSet<&String> = log.iter().collect();
    assert_eq!(unique.len(), 12);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn readiness_follows_queue_pressure() {
    let dir = TempDir::new().unwrap();
    // No workers started, so the queue only drains on cancel.
    let pipeline = Pipeline::with_processor(test_config(&dir), Arc::new(StubProcessor::new()))
        .await
        .unwrap();

    assert!(pipeline.is_ready().await);
    assert!(pipeline.is_alive());

    let mut job_ids = Vec::new();
    for _ in 0..4 {
        job_ids.push(pipeline.submit(spec("mp4")).await.unwrap());
    }
    assert!(!pipeline.is_ready().await, "saturated queue is not ready");

    for job_id in job_ids {
        pipeline.cancel(job_id).await.unwrap();
    }
    assert!(pipeline.is_ready().await, "readiness recovers without restart");
}

#[tokio::test]
async fn snapshot_reports_queue_and_workers() {
    let dir = TempDir::new().unwrap();
    let pipeline = Pipeline::with_processor(test_config(&dir), Arc::new(StubProcessor::new()))
        .await
        .unwrap();

    pipeline.submit(spec("mp4")).await.unwrap();
    pipeline.submit(spec("mp4")).await.unwrap();

    let snapshot = pipeline.snapshot().await;
    assert_eq!(snapshot.queue_depth, 2);
    assert_eq!(snapshot.active_workers, 0);
    assert_eq!(snapshot.idle_workers, 2);
    assert_eq!(snapshot.storage_used_bytes, 0);
    assert_eq!(snapshot.storage_utilization, 0.0);
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_work() {
    let dir = TempDir::new().unwrap();
    let pipeline = started(test_config(&dir), Arc::new(StubProcessor::new())).await;

    let job_id = pipeline.submit(spec("mp4")).await.unwrap();
    wait_for_terminal(&pipeline, job_id).await;

    tokio::time::timeout(Duration::from_secs(5), pipeline.shutdown())
        .await
        .expect("shutdown must complete promptly with idle workers");
}
