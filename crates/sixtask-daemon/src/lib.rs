//! # sixtask Daemon
//!
//! Process lifecycle: builds the [`Engine`] from configuration, latches
//! the first termination signal, and shuts the schedule registry and the
//! worker pool down in order under one deadline.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sixtask_daemon::{Engine, RunMode};
//!
//! let engine = Engine::from_config(config, handlers).await?;
//! engine.run_until_signal(RunMode::All).await?;
//! ```

pub mod engine;
pub mod error;
pub mod shutdown;
pub mod signal;

pub use engine::{Engine, RunMode};
pub use error::DaemonError;
pub use shutdown::{DEFAULT_SHUTDOWN_TIMEOUT, ShutdownCoordinator, ShutdownReport};
pub use signal::{DaemonSignal, SignalHandler};
