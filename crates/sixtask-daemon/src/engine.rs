//! Process context tying the queue, registry and pool together.

use std::sync::Arc;

use sixtask_config::{BackendKind, Config, ConfigValidator};
use sixtask_scheduler::{ScheduleError, ScheduleRegistry};
use sixtask_workqueue::{
    FileBackend, HandlerRegistry, MemoryBackend, QueueBackend, QueueClient, WorkerPool,
};
use tracing::{info, warn};

use crate::error::DaemonError;
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::signal::SignalHandler;

/// Which components a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Scheduler and worker pool.
    All,
    /// Worker pool only.
    Worker,
    /// Scheduler only.
    Scheduler,
}

impl RunMode {
    fn runs_pool(self) -> bool {
        matches!(self, RunMode::All | RunMode::Worker)
    }

    fn runs_scheduler(self) -> bool {
        matches!(self, RunMode::All | RunMode::Scheduler)
    }
}

/// Everything a sixtask process needs, built once from [`Config`].
pub struct Engine {
    config: Config,
    client: QueueClient,
    registry: Arc<ScheduleRegistry>,
    pool: Arc<WorkerPool>,
}

impl Engine {
    /// Validate `config`, open the configured backend and build the engine.
    pub async fn from_config(
        config: Config,
        handlers: HandlerRegistry,
    ) -> Result<Self, DaemonError> {
        let backend: Arc<dyn QueueBackend> = match config.queue.backend {
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
            BackendKind::File => Arc::new(FileBackend::new(config.queue.resolved_path()).await?),
        };
        Self::with_backend(config, handlers, backend).await
    }

    /// Build the engine on an existing backend.
    pub async fn with_backend(
        config: Config,
        handlers: HandlerRegistry,
        backend: Arc<dyn QueueBackend>,
    ) -> Result<Self, DaemonError> {
        let warnings = ConfigValidator::validate(&config)?.into_result()?;
        for warning in warnings {
            warn!("Config {}: {}", warning.path, warning.message);
        }

        let client = QueueClient::connect(backend)
            .await?
            .with_retry(config.queue.retry.clone());

        let registry = ScheduleRegistry::new(client.clone())
            .with_timezone(config.scheduler.timezone)
            .with_day_matching(config.scheduler.day_matching);

        let mut records = Vec::with_capacity(config.scheduler.schedules.len());
        for schedule in &config.scheduler.schedules {
            let record = schedule.to_record().map_err(|source| ScheduleError::Invalid {
                id: schedule.id.clone().unwrap_or_else(|| schedule.job_type.clone()),
                source,
            })?;
            if !handlers.contains(record.job_type()) {
                warn!(
                    "Schedule '{}' targets job type '{}' with no registered handler",
                    record.id,
                    record.job_type()
                );
            }
            records.push(record);
        }
        registry.load(records)?;

        let pool = WorkerPool::new(config.worker.clone(), client.clone(), handlers)?;

        Ok(Self {
            config,
            client,
            registry: Arc::new(registry),
            pool: Arc::new(pool),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Client for ad-hoc enqueues.
    pub fn client(&self) -> &QueueClient {
        &self.client
    }

    pub fn registry(&self) -> &Arc<ScheduleRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Start the components selected by `mode`.
    pub fn start(&self, mode: RunMode) -> Result<(), DaemonError> {
        if mode.runs_pool() {
            self.pool.start()?;
        }
        if mode.runs_scheduler() {
            if self.config.scheduler.enabled {
                self.registry.start()?;
            } else {
                info!("Scheduler disabled by config");
            }
        }
        info!("Engine started ({:?})", mode);
        Ok(())
    }

    /// Coordinator covering the components selected by `mode`.
    pub fn coordinator(&self, mode: RunMode) -> ShutdownCoordinator {
        let mut coordinator = ShutdownCoordinator::new(self.config.shutdown.timeout());
        if mode.runs_scheduler() {
            coordinator = coordinator.with_registry(self.registry.clone());
        }
        if mode.runs_pool() {
            coordinator = coordinator.with_pool(self.pool.clone());
        }
        coordinator
    }

    /// Start, wait for a termination signal, then shut down.
    ///
    /// A forced shutdown is returned as [`DaemonError::ShutdownTimeout`].
    pub async fn run_until_signal(&self, mode: RunMode) -> Result<ShutdownReport, DaemonError> {
        let signals = SignalHandler::new();
        signals.install_os_signals()?;
        self.start(mode)?;

        let coordinator = self.coordinator(mode);
        let report = coordinator
            .run_until_signal(&signals)
            .await
            .ok_or_else(|| DaemonError::SignalSetup("shutdown ran twice".to_string()))?;

        if report.is_forced() {
            return Err(DaemonError::ShutdownTimeout {
                deadline: coordinator.timeout(),
                abandoned: report.abandoned(),
            });
        }
        Ok(report)
    }
}
