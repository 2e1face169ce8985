//! Termination signal handling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::DaemonError;

static OS_SIGNALS_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Why shutdown was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonSignal {
    /// SIGINT or Ctrl+C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// Requested from code.
    Requested,
}

impl std::fmt::Display for DaemonSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonSignal::Interrupt => write!(f, "SIGINT"),
            DaemonSignal::Terminate => write!(f, "SIGTERM"),
            DaemonSignal::Requested => write!(f, "REQUESTED"),
        }
    }
}

/// Latches the first shutdown signal. Later ones are logged and dropped.
#[derive(Clone)]
pub struct SignalHandler {
    sender: Arc<watch::Sender<Option<DaemonSignal>>>,
}

impl SignalHandler {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Record a signal. Returns `true` only for the first one.
    pub fn send(&self, signal: DaemonSignal) -> bool {
        let first = self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(signal);
            true
        });

        if first {
            debug!("Shutdown signal latched: {}", signal);
        } else {
            warn!("Received {} while already shutting down, ignoring", signal);
        }
        first
    }

    /// Request shutdown from code.
    pub fn request_shutdown(&self) -> bool {
        self.send(DaemonSignal::Requested)
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.sender.borrow().is_some()
    }

    /// The signal that started shutdown, if any.
    pub fn received(&self) -> Option<DaemonSignal> {
        *self.sender.borrow()
    }

    /// Wait for the first signal.
    pub async fn wait(&self) -> DaemonSignal {
        let mut rx = self.sender.subscribe();
        loop {
            if let Some(signal) = *rx.borrow_and_update() {
                return signal;
            }
            if rx.changed().await.is_err() {
                // sender lives in self, so this is unreachable in practice
                return DaemonSignal::Requested;
            }
        }
    }

    /// Forward OS termination signals to this handler.
    ///
    /// Only one call per process succeeds.
    #[cfg(unix)]
    pub fn install_os_signals(&self) -> Result<(), DaemonError> {
        use tokio::signal::unix::{SignalKind, signal};

        if OS_SIGNALS_INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(DaemonError::SignalsAlreadyInstalled);
        }

        let mut sigterm =
            signal(SignalKind::terminate()).map_err(|e| DaemonError::SignalSetup(e.to_string()))?;
        let mut sigint =
            signal(SignalKind::interrupt()).map_err(|e| DaemonError::SignalSetup(e.to_string()))?;

        let sigterm_handler = self.clone();
        tokio::spawn(async move {
            while sigterm.recv().await.is_some() {
                info!("Received SIGTERM");
                sigterm_handler.send(DaemonSignal::Terminate);
            }
        });

        let sigint_handler = self.clone();
        tokio::spawn(async move {
            while sigint.recv().await.is_some() {
                info!("Received SIGINT");
                sigint_handler.send(DaemonSignal::Interrupt);
            }
        });

        info!("OS signal handlers installed (SIGTERM, SIGINT)");
        Ok(())
    }

    /// Forward Ctrl+C to this handler.
    ///
    /// Only one call per process succeeds.
    #[cfg(not(unix))]
    pub fn install_os_signals(&self) -> Result<(), DaemonError> {
        if OS_SIGNALS_INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(DaemonError::SignalsAlreadyInstalled);
        }

        let handler = self.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C");
                handler.send(DaemonSignal::Interrupt);
            }
        });

        info!("OS signal handlers installed (Ctrl+C only)");
        Ok(())
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "signal_tests.rs"]
mod tests;
