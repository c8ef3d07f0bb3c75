//! Job types and lifecycle state.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A request to fetch a media source and transcode it into a target format.
///
/// The format stays an opaque string until the transcode step so that
/// submission only rejects on queue pressure or a bad source URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Source media URL.
    pub source_url: String,
    /// Requested output format (e.g. "mp4", "mp3").
    pub format: String,
}

impl JobSpec {
    pub fn new(source_url: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            format: format.into(),
        }
    }
}

/// Job processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job is queued waiting for a worker
    #[default]
    Queued,
    /// A worker is downloading the source
    Fetching,
    /// A worker is running ffmpeg on the fetched source
    Transcoding,
    /// Job completed successfully, artifact on disk
    Completed,
    /// Job failed with an error
    Failed,
    /// Artifact was removed from storage after completion
    Evicted,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Fetching => "fetching",
            JobState::Transcoding => "transcoding",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Evicted => "evicted",
        }
    }

    /// Check if this is a terminal state (no more processing expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Evicted
        )
    }

    /// Check if a worker currently owns this job.
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Fetching | JobState::Transcoding)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Full record of a job, owned by the queue from creation to terminal state.
///
/// Workers operate on snapshots; all mutation goes through the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job identifier
    pub id: JobId,
    /// Source media URL
    pub source_url: String,
    /// Requested output format
    pub format: String,
    /// Current state
    pub state: JobState,
    /// When the job was submitted
    pub created_at: DateTime<Utc>,
    /// When the record was last updated
    pub updated_at: DateTime<Utc>,
    /// Number of retryable failures so far
    pub attempts: u32,
    /// Final artifact path, set on completion
    pub output_path: Option<PathBuf>,
    /// Last error message, set on failure (and retained across retries)
    pub error: Option<String>,
}

impl JobRecord {
    /// Create a new queued record from a spec.
    pub fn new(spec: JobSpec) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            source_url: spec.source_url,
            format: spec.format,
            state: JobState::Queued,
            created_at: now,
            updated_at: now,
            attempts: 0,
            output_path: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Transition to a new state, bumping the updated timestamp.
    pub fn set_state(&mut self, state: JobState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    /// Record a retryable failure without leaving the current step.
    pub fn record_attempt(&mut self, error: impl Into<String>) {
        self.attempts += 1;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }

    /// Mark the job completed with its artifact path.
    pub fn complete(&mut self, output_path: PathBuf) {
        self.state = JobState::Completed;
        self.output_path = Some(output_path);
        self.error = None;
        self.updated_at = Utc::now();
    }

    /// Mark the job failed with a terminal error.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = JobState::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }

    /// Mark a completed job's artifact as evicted from storage.
    pub fn evict(&mut self) {
        self.state = JobState::Evicted;
        self.output_path = None;
        self.updated_at = Utc::now();
    }
}
