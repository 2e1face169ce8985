//! Schedule registry and minute-aligned ticking loop.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use chrono::NaiveDateTime;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sixtask_cron::{
    DayMatching, Schedule, ScheduleBuilder, ScheduleRecord, TaskTemplate, ValidationError,
    truncate_to_minute,
};
use sixtask_workqueue::{QueueClient, QueueError, validate_queue_name};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::entry::{Clock, EntryInfo, ScheduleEntry, Timezone};
use crate::error::ScheduleError;

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// The evaluated minute.
    pub minute: NaiveDateTime,
    /// Entries due at this minute.
    pub due: usize,
    /// Jobs pushed to a queue.
    pub enqueued: usize,
    /// Jobs rejected because their dedup key was still live.
    pub deduplicated: usize,
    /// Jobs that could not be enqueued.
    pub failed: usize,
}

/// Result of [`ScheduleRegistry::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The loop exited within the timeout.
    Stopped,
    /// The loop did not exit in time and was aborted.
    TimedOut,
    /// `stop` had already been called.
    AlreadyStopped,
}

/// Holds recurring jobs and enqueues them when they come due.
pub struct ScheduleRegistry {
    client: QueueClient,
    timezone: Timezone,
    clock: Arc<dyn Clock>,
    day_matching: DayMatching,
    entries: RwLock<BTreeMap<String, Arc<ScheduleEntry>>>,
    state: AtomicU8,
    stop: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduleRegistry {
    /// Create an empty registry that enqueues through `client`.
    pub fn new(client: QueueClient) -> Self {
        Self {
            client,
            timezone: Timezone::default(),
            clock: Arc::new(Timezone::default()),
            day_matching: DayMatching::default(),
            entries: RwLock::new(BTreeMap::new()),
            state: AtomicU8::new(STATE_IDLE),
            stop: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Evaluate schedules against this wall clock.
    ///
    /// Replaces any clock set with [`with_clock`](Self::with_clock).
    pub fn with_timezone(mut self, timezone: Timezone) -> Self {
        self.timezone = timezone;
        self.clock = Arc::new(timezone);
        self
    }

    /// Read the current time from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// How cron specs combine day-of-month and day-of-week.
    pub fn with_day_matching(mut self, day_matching: DayMatching) -> Self {
        self.day_matching = day_matching;
        self
    }

    pub fn timezone(&self) -> Timezone {
        self.timezone
    }

    /// Start describing a schedule. Nothing is registered until the
    /// resulting record is passed to [`load`](Self::load).
    pub fn register(&self, template: TaskTemplate) -> ScheduleBuilder {
        ScheduleBuilder::new(template)
    }

    /// Validate every record, then insert all of them.
    ///
    /// If any record is invalid or collides with an existing identity,
    /// nothing is inserted.
    pub fn load(&self, records: Vec<ScheduleRecord>) -> Result<Vec<String>, ScheduleError> {
        let now = self.clock.now();
        let mut batch_ids = HashSet::new();
        let mut prepared = Vec::with_capacity(records.len());

        for record in records {
            let schedule = self.validate(&record, now)?;
            if !batch_ids.insert(record.id.clone()) {
                return Err(ScheduleError::DuplicateEntry(record.id));
            }
            prepared.push(ScheduleEntry::new(record, schedule, now));
        }

        let mut entries = self.entries.write();
        if let Some(existing) = prepared.iter().find(|e| entries.contains_key(&e.id)) {
            return Err(ScheduleError::DuplicateEntry(existing.id.clone()));
        }

        let mut ids = Vec::with_capacity(prepared.len());
        for entry in prepared {
            info!(
                "Registered schedule '{}' ({}) -> queue '{}'",
                entry.id,
                entry.schedule,
                entry.queue
            );
            ids.push(entry.id.clone());
            entries.insert(entry.id.clone(), Arc::new(entry));
        }
        Ok(ids)
    }

    fn validate(
        &self,
        record: &ScheduleRecord,
        now: NaiveDateTime,
    ) -> Result<Schedule, ScheduleError> {
        let invalid = |source: ValidationError| ScheduleError::Invalid {
            id: record.id.clone(),
            source,
        };

        if record.id.trim().is_empty() {
            return Err(invalid(ValidationError::MissingField("id")));
        }
        if record.job_type().trim().is_empty() {
            return Err(invalid(ValidationError::MissingField("job_type")));
        }
        validate_queue_name(&record.queue).map_err(|source| ScheduleError::InvalidQueue {
            id: record.id.clone(),
            source,
        })?;

        let schedule =
            Schedule::parse_with(&record.cron_expression, self.day_matching).map_err(invalid)?;
        schedule.ensure_satisfiable(now).map_err(invalid)?;
        Ok(schedule)
    }

    /// Remove an entry. Returns whether it existed.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.entries.write().remove(id).is_some();
        if removed {
            info!("Unregistered schedule '{}'", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of every entry, ordered by id.
    pub fn entries(&self) -> Vec<EntryInfo> {
        let now = self.clock.now();
        self.entries.read().values().map(|e| e.info(now)).collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<ScheduleEntry>> {
        self.entries.read().get(id).cloned()
    }

    /// Evaluate every entry at minute `t` and enqueue the due ones.
    ///
    /// Each entry fires at most once per minute, however often this is
    /// called. Enqueue errors are logged and counted, never returned.
    pub async fn tick_at(&self, t: NaiveDateTime) -> TickReport {
        let minute = truncate_to_minute(t).unwrap_or(t);
        let snapshot: Vec<Arc<ScheduleEntry>> = self.entries.read().values().cloned().collect();

        let mut report = TickReport {
            minute,
            due: 0,
            enqueued: 0,
            deduplicated: 0,
            failed: 0,
        };

        for entry in snapshot {
            if !entry.schedule.is_due(minute, entry.anchor) || !entry.claim_minute(minute) {
                continue;
            }
            report.due += 1;

            match self.client.enqueue(entry.materialize(), &entry.queue).await {
                Ok(job_id) => {
                    report.enqueued += 1;
                    debug!(
                        "Schedule '{}' enqueued job {} on '{}'",
                        entry.id, job_id, entry.queue
                    );
                }
                Err(QueueError::DuplicateJob(key)) => {
                    report.deduplicated += 1;
                    info!(
                        "Schedule '{}' skipped: a job with dedup key '{}' is still live",
                        entry.id, key
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    error!("Schedule '{}' failed to enqueue: {}", entry.id, e);
                }
            }
        }

        report
    }

    /// Spawn the ticking loop and return.
    pub fn start(self: &Arc<Self>) -> Result<(), ScheduleError> {
        match self.state.compare_exchange(
            STATE_IDLE,
            STATE_RUNNING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(STATE_RUNNING) => return Err(ScheduleError::AlreadyRunning),
            Err(_) => return Err(ScheduleError::Stopped),
        }

        let this = self.clone();
        *self.handle.lock() = Some(tokio::spawn(this.run()));
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_RUNNING
    }

    async fn run(self: Arc<Self>) {
        info!(
            "Schedule registry started with {} entries ({:?} clock)",
            self.len(),
            self.timezone
        );

        let mut last_minute: Option<NaiveDateTime> = None;
        loop {
            let wait = until_next_minute(self.clock.now());
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            let now = self.clock.now();
            let Some(minute) = truncate_to_minute(now) else {
                continue;
            };
            if let Some(last) = last_minute {
                let gap = (minute - last).num_minutes();
                if gap < 1 {
                    // woke early, or the clock moved backwards
                    continue;
                }
                if gap > 1 {
                    warn!(
                        "Scheduler skipped {} minute(s) between {} and {}",
                        gap - 1,
                        last,
                        minute
                    );
                }
            }
            last_minute = Some(minute);

            let report = self.tick_at(minute).await;
            if report.due > 0 {
                debug!(
                    "Tick {}: {} due, {} enqueued, {} deduplicated, {} failed",
                    report.minute, report.due, report.enqueued, report.deduplicated, report.failed
                );
            }
        }

        info!("Schedule registry stopped");
    }

    /// Stop the loop, letting an in-flight tick finish within `timeout`.
    pub async fn stop(&self, timeout: Duration) -> StopOutcome {
        let previous = self.state.swap(STATE_STOPPED, Ordering::SeqCst);
        if previous == STATE_STOPPED {
            return StopOutcome::AlreadyStopped;
        }

        self.stop.cancel();
        let handle = self.handle.lock().take();
        let Some(mut handle) = handle else {
            return StopOutcome::Stopped;
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(_) => StopOutcome::Stopped,
            Err(_) => {
                warn!("Schedule registry did not stop within {:?}", timeout);
                handle.abort();
                StopOutcome::TimedOut
            }
        }
    }
}

fn until_next_minute(now: NaiveDateTime) -> Duration {
    let next = truncate_to_minute(now).unwrap_or(now) + chrono::Duration::minutes(1);
    (next - now).to_std().unwrap_or(Duration::from_secs(1))
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
