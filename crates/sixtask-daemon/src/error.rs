//! Daemon-related errors.

use std::time::Duration;

use sixtask_config::ConfigError;
use sixtask_scheduler::ScheduleError;
use sixtask_workqueue::{QueueError, WorkerError};
use thiserror::Error;

/// Errors that can occur while running the engine.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// OS signal handlers were already installed in this process.
    #[error("Signal handlers are already installed")]
    SignalsAlreadyInstalled,

    /// Failed to set up signal handlers.
    #[error("Failed to set up signal handlers: {0}")]
    SignalSetup(String),

    /// In-flight jobs were still running when the shutdown deadline passed.
    #[error("Shutdown exceeded {deadline:?}; abandoned {abandoned} in-flight job(s)")]
    ShutdownTimeout { deadline: Duration, abandoned: usize },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Queue backend error.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Worker pool error.
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// Schedule registry error.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_timeout_error() {
        let err = DaemonError::ShutdownTimeout {
            deadline: Duration::from_secs(5),
            abandoned: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("5s"));
        assert!(msg.contains("abandoned 3"));
    }

    #[test]
    fn test_queue_error_conversion() {
        let err: DaemonError = QueueError::Connectivity("refused".to_string()).into();
        assert!(matches!(err, DaemonError::Queue(_)));
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_config_error_conversion() {
        let err: DaemonError = ConfigError::EnvVarNotSet("QUEUE_DIR".to_string()).into();
        assert!(err.to_string().starts_with("Configuration error"));
    }
}
