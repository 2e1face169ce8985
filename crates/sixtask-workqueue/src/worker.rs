//! Worker pool for job execution.
//!
//! A single dispatcher task picks queues by weight, claims jobs and spawns
//! one handler task per job. A semaphore caps how many run at once.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::QueueClient;
use crate::config::WorkerConfig;
use crate::error::{HandlerError, QueueError, WorkerError};
use crate::handler::{HandlerRegistry, JobContext, JobHandler};
use crate::job::{Job, JobEvent, JobId, JobStatus};
use crate::selector::WeightedSelector;

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPING: u8 = 2;
const STATE_STOPPED: u8 = 3;

const EVENT_CAPACITY: usize = 1024;

/// Result of [`WorkerPool::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight job finished before the deadline.
    Graceful,
    /// The deadline passed; these jobs were abandoned with their tokens
    /// cancelled. Their handlers are not preempted.
    Forced { abandoned: Vec<JobId> },
    /// The pool was already shut down.
    AlreadyStopped,
}

impl ShutdownOutcome {
    pub fn is_forced(&self) -> bool {
        matches!(self, ShutdownOutcome::Forced { .. })
    }
}

/// Job counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub in_flight: usize,
}

struct InFlight {
    job_type: String,
    queue: String,
    status: Mutex<JobStatus>,
    cancel: CancellationToken,
}

impl InFlight {
    fn transition(&self, next: JobStatus) -> bool {
        let mut status = self.status.lock();
        if status.can_transition_to(next) {
            *status = next;
            true
        } else {
            false
        }
    }
}

struct Shared {
    client: QueueClient,
    handlers: HandlerRegistry,
    in_flight: DashMap<JobId, Arc<InFlight>>,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    events: broadcast::Sender<JobEvent>,
}

impl Shared {
    fn publish(&self, job_id: JobId, tracked: &InFlight, status: JobStatus, error: Option<String>) {
        // no subscribers is fine
        let _ = self.events.send(JobEvent {
            job_id,
            job_type: tracked.job_type.clone(),
            queue: tracked.queue.clone(),
            status,
            error,
            at: Utc::now(),
        });
    }

    async fn run(self: Arc<Self>, job: Job, tracked: Arc<InFlight>) {
        if tracked.transition(JobStatus::Running) {
            self.publish(job.id, &tracked, JobStatus::Running, None);
            debug!(
                "Running job {} ({}) from queue '{}'",
                job.id, job.job_type, job.queue
            );

            let ctx = JobContext::new(&job, tracked.cancel.clone());
            let result = match self.handlers.get(&job.job_type) {
                Some(handler) => execute(handler, &ctx, &job).await,
                None => Err(HandlerError::UnknownHandler(job.job_type.clone())),
            };
            self.finish(&job, &tracked, result);
        }

        if let Err(e) = self.client.ack(&job).await {
            warn!("Failed to ack job {}: {}", job.id, e);
        }
        self.in_flight.remove(&job.id);
    }

    fn finish(&self, job: &Job, tracked: &InFlight, result: Result<(), HandlerError>) {
        let (status, err) = match result {
            Ok(()) => (JobStatus::Completed, None),
            Err(HandlerError::Cancelled) => (JobStatus::Cancelled, Some(HandlerError::Cancelled)),
            Err(e) => (JobStatus::Failed, Some(e)),
        };

        if !tracked.transition(status) {
            // abandoned during shutdown; its final state is already recorded
            debug!("Job {} finished after being abandoned", job.id);
            return;
        }

        match (&status, &err) {
            (JobStatus::Completed, _) => {
                self.completed.fetch_add(1, Ordering::SeqCst);
                info!("Job {} ({}) completed", job.id, job.job_type);
            }
            (JobStatus::Cancelled, _) => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                warn!("Job {} ({}) cancelled", job.id, job.job_type);
            }
            (_, Some(e)) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                error!("Job {} ({}) failed: {}", job.id, job.job_type, e);
            }
            _ => {}
        }

        self.publish(job.id, tracked, status, err.map(|e| e.to_string()));
    }
}

async fn execute(
    handler: Arc<dyn JobHandler>,
    ctx: &JobContext,
    job: &Job,
) -> Result<(), HandlerError> {
    let guarded = async {
        match AssertUnwindSafe(handler.handle(ctx, &job.payload))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
        }
    };

    // Abandoned jobs only see their token cancelled; the handler keeps
    // running and a late result is dropped by the status guard in `finish`.
    match job.options.timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(result) => result,
            Err(_) => {
                ctx.cancellation_token().cancel();
                Err(HandlerError::Timeout(limit))
            }
        },
        None => guarded.await,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct Dispatcher {
    shared: Arc<Shared>,
    semaphore: Arc<Semaphore>,
    selector: WeightedSelector,
    poll_interval: Duration,
    stop: CancellationToken,
}

impl Dispatcher {
    async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            let permit = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.next_job().await {
                Ok(Some(job)) => {
                    failures = 0;
                    self.spawn(job, permit);
                }
                Ok(None) => {
                    failures = 0;
                    drop(permit);
                    if self.idle(self.poll_interval).await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    failures = failures.saturating_add(1);
                    let delay = self.shared.client.retry_policy().backoff(failures);
                    warn!("Dequeue failed ({}), retrying in {:?}", e, delay);
                    if self.idle(delay).await {
                        break;
                    }
                }
            }
        }

        debug!("Dispatcher stopped");
    }

    /// Sleep for `duration`. Returns true if the pool is stopping.
    async fn idle(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.stop.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    async fn next_job(&mut self) -> Result<Option<Job>, QueueError> {
        for queue in self.selector.next_order() {
            if let Some(job) = self.shared.client.dequeue(&queue).await? {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    fn spawn(&self, job: Job, permit: OwnedSemaphorePermit) {
        let tracked = Arc::new(InFlight {
            job_type: job.job_type.clone(),
            queue: job.queue.clone(),
            status: Mutex::new(JobStatus::Pending),
            cancel: CancellationToken::new(),
        });
        self.shared.in_flight.insert(job.id, tracked.clone());

        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.run(job, tracked).await;
            drop(permit);
        });
    }
}

/// Bounded pool of job executors fed from weighted queues.
pub struct WorkerPool {
    config: WorkerConfig,
    shared: Arc<Shared>,
    semaphore: Arc<Semaphore>,
    permits: u32,
    state: AtomicU8,
    stop: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool. Nothing runs until [`start`](Self::start).
    pub fn new(
        config: WorkerConfig,
        client: QueueClient,
        handlers: HandlerRegistry,
    ) -> Result<Self, WorkerError> {
        config.validate()?;
        let permits = u32::try_from(config.concurrency)
            .map_err(|_| WorkerError::InvalidConfig("concurrency is too large".to_string()))?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.concurrency)),
            permits,
            config,
            shared: Arc::new(Shared {
                client,
                handlers,
                in_flight: DashMap::new(),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                cancelled: AtomicU64::new(0),
                events,
            }),
            state: AtomicU8::new(STATE_IDLE),
            stop: CancellationToken::new(),
            dispatcher: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Spawn the dispatcher and return.
    pub fn start(&self) -> Result<(), WorkerError> {
        match self.state.compare_exchange(
            STATE_IDLE,
            STATE_RUNNING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(STATE_RUNNING) => return Err(WorkerError::AlreadyRunning),
            Err(_) => return Err(WorkerError::Stopped),
        }

        let dispatcher = Dispatcher {
            shared: self.shared.clone(),
            semaphore: self.semaphore.clone(),
            selector: WeightedSelector::new(
                self.config.queues.iter().map(|(q, w)| (q.clone(), *w)),
            ),
            poll_interval: self.config.poll_interval(),
            stop: self.stop.clone(),
        };
        *self.dispatcher.lock() = Some(tokio::spawn(dispatcher.run()));

        info!(
            "Worker pool started with {} workers on queues {:?}",
            self.config.concurrency, self.config.queues
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_RUNNING
    }

    /// Number of idle worker slots.
    pub fn available_workers(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            completed: self.shared.completed.load(Ordering::SeqCst),
            failed: self.shared.failed.load(Ordering::SeqCst),
            cancelled: self.shared.cancelled.load(Ordering::SeqCst),
            in_flight: self.shared.in_flight.len(),
        }
    }

    /// Receive an event for every job state change.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.events.subscribe()
    }

    /// Stop dequeuing and wait up to `deadline` for in-flight jobs.
    ///
    /// Jobs still running at the deadline are marked cancelled, signalled
    /// through their [`JobContext`] and reported in
    /// [`ShutdownOutcome::Forced`]. Their handlers keep running unsupervised.
    /// Calling this again returns [`ShutdownOutcome::AlreadyStopped`].
    pub async fn shutdown(&self, deadline: Duration) -> ShutdownOutcome {
        let deadline_at = tokio::time::Instant::now() + deadline;

        match self.state.compare_exchange(
            STATE_RUNNING,
            STATE_STOPPING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(STATE_IDLE) => {
                if self
                    .state
                    .compare_exchange(STATE_IDLE, STATE_STOPPED, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    self.semaphore.close();
                    return ShutdownOutcome::Graceful;
                }
                return ShutdownOutcome::AlreadyStopped;
            }
            Err(_) => return ShutdownOutcome::AlreadyStopped,
        }

        info!(
            "Worker pool shutting down with {} jobs in flight (deadline {:?})",
            self.shared.in_flight.len(),
            deadline
        );
        self.stop.cancel();

        let dispatcher = self.dispatcher.lock().take();
        if let Some(mut handle) = dispatcher {
            if tokio::time::timeout_at(deadline_at, &mut handle).await.is_err() {
                handle.abort();
            }
        }

        let drained =
            tokio::time::timeout_at(deadline_at, self.semaphore.acquire_many(self.permits)).await;
        let outcome = match drained {
            Ok(Ok(_all)) => {
                info!("Worker pool drained");
                ShutdownOutcome::Graceful
            }
            _ => {
                let abandoned = self.abandon_in_flight();
                warn!(
                    "Worker pool shutdown timed out after {:?}, abandoned {} jobs",
                    deadline,
                    abandoned.len()
                );
                ShutdownOutcome::Forced { abandoned }
            }
        };

        self.semaphore.close();
        self.state.store(STATE_STOPPED, Ordering::SeqCst);
        outcome
    }

    fn abandon_in_flight(&self) -> Vec<JobId> {
        let tracked: Vec<(JobId, Arc<InFlight>)> = self
            .shared
            .in_flight
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut abandoned = Vec::new();
        for (id, job) in tracked {
            if job.transition(JobStatus::Cancelled) {
                job.cancel.cancel();
                self.shared.cancelled.fetch_add(1, Ordering::SeqCst);
                self.shared.publish(
                    id,
                    &job,
                    JobStatus::Cancelled,
                    Some(HandlerError::Cancelled.to_string()),
                );
                warn!("Abandoned job {} ({})", id, job.job_type);
                abandoned.push(id);
            }
        }
        abandoned.sort();
        abandoned
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
