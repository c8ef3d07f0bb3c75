//! Error types for media operations.

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while fetching or transcoding media.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Transcode failed: {message}")]
    TranscodeFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Create an invalid source error.
    pub fn invalid_source(msg: impl Into<String>) -> Self {
        Self::InvalidSource(msg.into())
    }

    /// Create a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a transcode failure carrying the subprocess exit status.
    pub fn transcode_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::TranscodeFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Check if the failure is transient and worth retrying with backoff.
    ///
    /// Invalid sources and unsupported formats fail the job immediately;
    /// network hiccups, subprocess crashes and timeouts are retried up to
    /// the configured cap. IO errors are treated as retryable since they
    /// mostly surface from interrupted transfers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MediaError::Network(_)
                | MediaError::TranscodeFailed { .. }
                | MediaError::Timeout(_)
                | MediaError::Io(_)
        )
    }

    /// Check if the operation was cancelled by the caller.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MediaError::Cancelled)
    }
}
