//! Pipeline error types.

use reelpipe_media::MediaError;
use reelpipe_models::JobId;
use reelpipe_storage::StorageError;
use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that can occur while submitting or processing jobs.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Queue full: {0} jobs pending")]
    QueueFull(usize),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PipelineError {
    /// Check if the failure is transient and worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Media(e) => e.is_retryable(),
            PipelineError::Storage(e) => e.is_retryable(),
            PipelineError::QueueFull(_) | PipelineError::JobNotFound(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(!PipelineError::QueueFull(32).is_retryable());
        assert!(!PipelineError::JobNotFound(JobId::new()).is_retryable());
        assert!(PipelineError::Media(MediaError::network("reset")).is_retryable());
        assert!(!PipelineError::Storage(StorageError::exhausted(10, 5)).is_retryable());
    }
}
