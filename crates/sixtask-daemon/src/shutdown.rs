//! Ordered, deadline-bounded shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sixtask_scheduler::{ScheduleRegistry, StopOutcome};
use sixtask_workqueue::{ShutdownOutcome, WorkerPool};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::error::DaemonError;
use crate::signal::SignalHandler;

/// Default time allowed for in-flight jobs to finish.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// What happened during shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// `None` when no registry was attached.
    pub registry: Option<StopOutcome>,
    /// `None` when no pool was attached.
    pub pool: Option<ShutdownOutcome>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// Whether in-flight jobs had to be abandoned.
    pub fn is_forced(&self) -> bool {
        self.pool.as_ref().is_some_and(ShutdownOutcome::is_forced)
    }

    /// Number of abandoned jobs.
    pub fn abandoned(&self) -> usize {
        match &self.pool {
            Some(ShutdownOutcome::Forced { abandoned }) => abandoned.len(),
            _ => 0,
        }
    }
}

/// Stops the registry, then the pool, under one shared deadline.
///
/// Only the first [`trigger`](Self::trigger) does anything.
pub struct ShutdownCoordinator {
    registry: Option<Arc<ScheduleRegistry>>,
    pool: Option<Arc<WorkerPool>>,
    timeout: Duration,
    triggered: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            registry: None,
            pool: None,
            timeout,
            triggered: AtomicBool::new(false),
        }
    }

    pub fn with_registry(mut self, registry: Arc<ScheduleRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Run the shutdown sequence. Returns `None` if it already ran.
    pub async fn trigger(&self) -> Option<ShutdownReport> {
        if self.triggered.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already in progress, ignoring trigger");
            return None;
        }

        let started = Instant::now();
        let deadline = started + self.timeout;
        info!("Shutting down (timeout {:?})", self.timeout);

        // No new jobs are produced while the pool drains.
        let registry = match &self.registry {
            Some(registry) => {
                let outcome = registry.stop(remaining(deadline)).await;
                info!("Schedule registry: {:?}", outcome);
                Some(outcome)
            }
            None => None,
        };

        let pool = match &self.pool {
            Some(pool) => {
                let outcome = pool.shutdown(remaining(deadline)).await;
                match &outcome {
                    ShutdownOutcome::Forced { abandoned } => {
                        let err = DaemonError::ShutdownTimeout {
                            deadline: self.timeout,
                            abandoned: abandoned.len(),
                        };
                        error!("{}", err);
                    }
                    other => info!("Worker pool: {:?}", other),
                }
                Some(outcome)
            }
            None => None,
        };

        let report = ShutdownReport {
            registry,
            pool,
            elapsed: started.elapsed(),
        };
        info!("Shutdown finished in {:?}", report.elapsed);
        Some(report)
    }

    /// Wait for the first signal, then run the shutdown sequence.
    pub async fn run_until_signal(&self, signals: &SignalHandler) -> Option<ShutdownReport> {
        let signal = signals.wait().await;
        info!("Shutdown requested by {}", signal);
        self.trigger().await
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

#[cfg(test)]
#[path = "shutdown_tests.rs"]
mod tests;
