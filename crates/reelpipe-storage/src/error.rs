//! Storage error types.

use reelpipe_models::JobId;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage exhausted: need {needed} bytes, ceiling is {ceiling} bytes")]
    Exhausted {
        needed: u64,
        ceiling: u64,
        /// Artifacts removed trying to make room before giving up.
        /// Those removals stand; callers must account for them.
        evicted: Vec<JobId>,
    },

    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn exhausted(needed: u64, ceiling: u64) -> Self {
        Self::Exhausted {
            needed,
            ceiling,
            evicted: Vec::new(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Exhaustion is fatal for the job that hit it; there is nothing a
    /// retry of the same artifact could change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Io(_))
    }
}
