//! Job-related error types.

use super::JobClass;
use crate::store::StoreError;
use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Errors that can occur while producing, handling or managing jobs.
#[derive(Debug, Error)]
pub enum JobError {
    /// Job execution failed.
    #[error("job execution failed: {0}")]
    ExecutionFailed(String),

    /// Job timed out.
    #[error("job timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// No handler is registered for this class.
    #[error("job class {0} is not registered")]
    UnregisteredClass(JobClass),

    /// String does not name a job class.
    #[error("unknown job class: {0}")]
    UnknownClass(String),

    /// Entry names a different class than the queue it was found on.
    #[error("entry for class {found} found on the {expected} queue")]
    ClassMismatch {
        /// Class of the queue being read.
        expected: JobClass,
        /// Class written in the entry.
        found: JobClass,
    },

    /// Entry parsed as JSON but a field holds an unusable value.
    #[error("invalid job record: {0}")]
    InvalidRecord(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<String> for JobError {
    fn from(s: String) -> Self {
        Self::ExecutionFailed(s)
    }
}

impl From<&str> for JobError {
    fn from(s: &str) -> Self {
        Self::ExecutionFailed(s.to_string())
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        Self::ExecutionFailed(err.to_string())
    }
}
