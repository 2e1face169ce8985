//! Registry errors.

use sixtask_cron::ValidationError;
use sixtask_workqueue::QueueError;
use thiserror::Error;

/// Schedule registry errors.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// A record has a bad expression, time or field.
    #[error("Invalid schedule '{id}': {source}")]
    Invalid {
        id: String,
        #[source]
        source: ValidationError,
    },

    /// A record targets a malformed queue name.
    #[error("Invalid queue for schedule '{id}': {source}")]
    InvalidQueue {
        id: String,
        #[source]
        source: QueueError,
    },

    /// An entry with this identity already exists.
    #[error("Schedule '{0}' is already registered")]
    DuplicateEntry(String),

    /// `start` was called on a running registry.
    #[error("Schedule registry is already running")]
    AlreadyRunning,

    /// `start` was called after `stop`.
    #[error("Schedule registry has been stopped")]
    Stopped,
}
