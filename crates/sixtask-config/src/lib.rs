//! # sixtask Config
//!
//! TOML configuration for the queue backend, worker pool, scheduler,
//! shutdown and logging.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validator;

pub use error::ConfigError;
pub use loader::{CONFIG_FILE_NAME, ConfigLoader};
pub use schema::{
    BackendKind, Config, LoggingSection, QueueSection, ScheduleConfig, SchedulerSection,
    ShutdownSection,
};
pub use validator::{ConfigValidator, ValidationResult, ValidationWarning};
