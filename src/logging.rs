//! Tracing setup: console plus daily-rotated log files.

use std::sync::OnceLock;

use anyhow::Context;
use sixtask_config::LoggingSection;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber. `RUST_LOG` overrides `logging.level`.
pub(crate) fn init_tracing(logging: &LoggingSection) -> anyhow::Result<()> {
    let log_dir = logging.resolved_dir();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&logging.file_prefix)
        .filename_suffix("log")
        .max_log_files(logging.max_files)
        .build(&log_dir)
        .context("creating log file appender")?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = GUARD.set(guard);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // stdout is reserved for command output
    let console = if logging.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(())
}
