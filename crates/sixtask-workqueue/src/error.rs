//! Queue, handler and worker errors.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by the queue client and backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The job or queue name is malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The backend could not be reached.
    #[error("Queue backend unavailable: {0}")]
    Connectivity(String),

    /// A job with the same dedup key is still queued or running.
    #[error("Duplicate job: dedup key '{0}' is already live")]
    DuplicateJob(String),

    /// The job could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl QueueError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Connectivity(_))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

/// Why a job did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// No handler is registered for the job type.
    #[error("No handler registered for job type '{0}'")]
    UnknownHandler(String),

    /// The payload could not be decoded.
    #[error("Failed to decode payload: {0}")]
    Decode(String),

    /// The handler reported a failure.
    #[error("Job failed: {0}")]
    Failed(String),

    /// The handler exceeded its time limit.
    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    /// The handler panicked.
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// The job was cancelled before it finished.
    #[error("Job cancelled")]
    Cancelled,
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Failed`].
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        HandlerError::Failed(reason.to_string())
    }
}

/// Worker pool errors.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The pool configuration is unusable.
    #[error("Invalid worker config: {0}")]
    InvalidConfig(String),

    /// `start` was called on a running pool.
    #[error("Worker pool is already running")]
    AlreadyRunning,

    /// `start` was called after shutdown.
    #[error("Worker pool has been shut down")]
    Stopped,

    /// Queue error.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connectivity_is_retryable() {
        assert!(QueueError::Connectivity("down".into()).is_retryable());
        assert!(!QueueError::Validation("bad".into()).is_retryable());
        assert!(!QueueError::DuplicateJob("k".into()).is_retryable());
        assert!(!QueueError::Serialization("x".into()).is_retryable());
    }

    #[test]
    fn test_serde_error_conversion() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        assert!(matches!(QueueError::from(err), QueueError::Serialization(_)));
    }

    #[test]
    fn test_handler_error_display() {
        assert!(HandlerError::UnknownHandler("x".into()).to_string().contains("'x'"));
        assert_eq!(HandlerError::failed("boom"), HandlerError::Failed("boom".into()));
    }
}
