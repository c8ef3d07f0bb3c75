//! In-process bounded FIFO job queue.
//!
//! The queue owns every [`JobRecord`] from submission to terminal state;
//! workers and the HTTP surface only ever see snapshots. A per-job `watch`
//! channel carries cancellation to whichever worker picked the job up.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info};

use reelpipe_models::{JobId, JobRecord, JobSpec, JobState};

use crate::error::{PipelineError, PipelineResult};

/// How long terminal records stay queryable by default.
const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

struct JobEntry {
    record: JobRecord,
    cancel: watch::Sender<bool>,
}

#[derive(Default)]
struct QueueInner {
    /// Jobs waiting for a worker, oldest first.
    pending: VecDeque<JobId>,
    /// Every job still within retention, including terminal ones.
    jobs: HashMap<JobId, JobEntry>,
}

impl QueueInner {
    /// Drop terminal records that have been terminal longer than
    /// `retention`, so the table stays bounded over a long run. Looking
    /// up a pruned job returns `JobNotFound`.
    fn prune_terminal(&mut self, retention: Duration) {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return;
        };
        self.jobs
            .retain(|_, entry| !(entry.record.is_terminal() && entry.record.updated_at < cutoff));
    }
}

/// Bounded FIFO queue and job table.
pub struct JobQueue {
    capacity: usize,
    retention: Duration,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl JobQueue {
    /// Create a queue that rejects submissions beyond `capacity` pending jobs.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            retention: DEFAULT_RETENTION,
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
        }
    }

    /// Set how long terminal records stay queryable.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Submit a job, failing fast when the queue is at capacity.
    pub async fn submit(&self, spec: JobSpec) -> PipelineResult<JobId> {
        let mut inner = self.inner.lock().await;
        inner.prune_terminal(self.retention);

        if inner.pending.len() >= self.capacity {
            return Err(PipelineError::QueueFull(inner.pending.len()));
        }

        let record = JobRecord::new(spec);
        let job_id = record.id;
        let (cancel, _) = watch::channel(false);

        info!(job_id = %job_id, source = %record.source_url, "Job submitted");

        inner.pending.push_back(job_id);
        inner.jobs.insert(job_id, JobEntry { record, cancel });
        drop(inner);

        self.notify.notify_one();
        Ok(job_id)
    }

    /// Dequeue the next job, waiting until one arrives.
    ///
    /// Returns `None` once the shutdown signal is set. Each job id is
    /// handed out exactly once.
    pub async fn next(&self, shutdown: &mut watch::Receiver<bool>) -> Option<JobRecord> {
        loop {
            if *shutdown.borrow() {
                return None;
            }

            {
                let mut inner = self.inner.lock().await;
                if let Some(job_id) = inner.pending.pop_front() {
                    if let Some(entry) = inner.jobs.get(&job_id) {
                        // A job cancelled while queued is already terminal.
                        if entry.record.state == JobState::Queued {
                            return Some(entry.record.clone());
                        }
                        debug!(job_id = %job_id, "Skipping dequeued job in state {}", entry.record.state);
                    }
                    continue;
                }
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Snapshot a job's record.
    pub async fn status(&self, job_id: JobId) -> PipelineResult<JobRecord> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .get(&job_id)
            .map(|e| e.record.clone())
            .ok_or(PipelineError::JobNotFound(job_id))
    }

    /// Cancel a job.
    ///
    /// A queued job fails immediately; an in-flight job is signalled and
    /// its worker marks it failed once it observes the signal. Cancelling
    /// a terminal job is a no-op.
    pub async fn cancel(&self, job_id: JobId) -> PipelineResult<()> {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        let entry = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(PipelineError::JobNotFound(job_id))?;

        match entry.record.state {
            JobState::Queued => {
                entry.record.fail("cancelled");
                inner.pending.retain(|id| *id != job_id);
                info!(job_id = %job_id, "Cancelled queued job");
            }
            state if state.is_active() => {
                let _ = entry.cancel.send(true);
                info!(job_id = %job_id, "Cancellation signalled to worker");
            }
            _ => {}
        }

        Ok(())
    }

    /// Jobs waiting for a worker.
    pub async fn depth(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// Cancellation receiver for a job, if it still exists.
    pub async fn cancel_receiver(&self, job_id: JobId) -> Option<watch::Receiver<bool>> {
        let inner = self.inner.lock().await;
        inner.jobs.get(&job_id).map(|e| e.cancel.subscribe())
    }

    /// Transition a job to a new processing state.
    pub async fn set_state(&self, job_id: JobId, state: JobState) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.jobs.get_mut(&job_id) {
            entry.record.set_state(state);
        }
    }

    /// Record a retryable failure, returning the attempt count so far.
    pub async fn record_attempt(&self, job_id: JobId, error: impl Into<String>) -> u32 {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get_mut(&job_id) {
            Some(entry) => {
                entry.record.record_attempt(error);
                entry.record.attempts
            }
            None => 0,
        }
    }

    /// Mark a job completed with its artifact path.
    pub async fn complete(&self, job_id: JobId, output_path: std::path::PathBuf) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.jobs.get_mut(&job_id) {
            entry.record.complete(output_path);
        }
    }

    /// Mark a job failed with a terminal error.
    pub async fn fail(&self, job_id: JobId, error: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.jobs.get_mut(&job_id) {
            entry.record.fail(error);
        }
    }

    /// Mark completed jobs whose artifacts were evicted from storage.
    pub async fn mark_evicted(&self, job_ids: &[JobId]) {
        let mut inner = self.inner.lock().await;
        for job_id in job_ids {
            if let Some(entry) = inner.jobs.get_mut(job_id) {
                entry.record.evict();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(n: u32) -> JobSpec {
        JobSpec::new(format!("https://example.com/v{n}.mp4"), "mp4")
    }

    #[tokio::test]
    async fn test_submit_rejects_when_full() {
        let queue = JobQueue::new(2);

        queue.submit(spec(1)).await.unwrap();
        queue.submit(spec(2)).await.unwrap();

        let err = queue.submit(spec(3)).await.unwrap_err();
        assert!(matches!(err, PipelineError::QueueFull(2)));
    }

    #[tokio::test]
    async fn test_fifo_dispatch() {
        let queue = JobQueue::new(8);
        let first = queue.submit(spec(1)).await.unwrap();
        let second = queue.submit(spec(2)).await.unwrap();

        let (_tx, mut shutdown) = watch::channel(false);
        assert_eq!(queue.next(&mut shutdown).await.unwrap().id, first);
        assert_eq!(queue.next(&mut shutdown).await.unwrap().id, second);
    }

    #[tokio::test]
    async fn test_capacity_frees_on_dequeue() {
        let queue = JobQueue::new(1);
        queue.submit(spec(1)).await.unwrap();
        assert!(queue.submit(spec(2)).await.is_err());

        let (_tx, mut shutdown) = watch::channel(false);
        queue.next(&mut shutdown).await.unwrap();

        queue.submit(spec(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_queued_job_is_terminal_and_skipped() {
        let queue = JobQueue::new(8);
        let cancelled = queue.submit(spec(1)).await.unwrap();
        let kept = queue.submit(spec(2)).await.unwrap();

        queue.cancel(cancelled).await.unwrap();

        let record = queue.status(cancelled).await.unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.error.as_deref(), Some("cancelled"));

        let (_tx, mut shutdown) = watch::channel(false);
        assert_eq!(queue.next(&mut shutdown).await.unwrap().id, kept);
    }

    #[tokio::test]
    async fn test_cancel_active_job_signals_worker() {
        let queue = JobQueue::new(8);
        let job_id = queue.submit(spec(1)).await.unwrap();

        let (_tx, mut shutdown) = watch::channel(false);
        let record = queue.next(&mut shutdown).await.unwrap();
        queue.set_state(record.id, JobState::Fetching).await;

        let cancel_rx = queue.cancel_receiver(job_id).await.unwrap();
        assert!(!*cancel_rx.borrow());

        queue.cancel(job_id).await.unwrap();
        assert!(*cancel_rx.borrow());
    }

    #[tokio::test]
    async fn test_status_unknown_job() {
        let queue = JobQueue::new(8);
        assert!(matches!(
            queue.status(JobId::new()).await,
            Err(PipelineError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_terminal_records_pruned_after_retention() {
        let queue = JobQueue::new(8).with_retention(Duration::from_millis(1));
        let stale = queue.submit(spec(1)).await.unwrap();
        queue.cancel(stale).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;

        // Pruning happens on submission; the stale terminal record goes,
        // the fresh one stays.
        let fresh = queue.submit(spec(2)).await.unwrap();
        assert!(matches!(
            queue.status(stale).await,
            Err(PipelineError::JobNotFound(_))
        ));
        assert!(queue.status(fresh).await.is_ok());
    }

    #[tokio::test]
    async fn test_next_returns_none_on_shutdown() {
        let queue = JobQueue::new(8);
        let (tx, mut shutdown) = watch::channel(false);
        tx.send(true).unwrap();

        assert!(queue.next(&mut shutdown).await.is_none());
    }
}
