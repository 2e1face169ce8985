//! Fluent schedule builder.
//!
//! Builder methods only describe a schedule. They return a
//! [`ScheduleRecord`] (or a [`ValidationError`]) and never touch a registry;
//! records are registered in one step by the scheduler's `load`.
//!
//! ```
//! use sixtask_cron::{ScheduleBuilder, TaskTemplate};
//!
//! let template = TaskTemplate::with_payload("cleanup", b"{}".to_vec());
//! let record = ScheduleBuilder::new(template)
//!     .queue("default")
//!     .daily_at("02:30")
//!     .unwrap();
//! assert_eq!(record.cron_expression, "30 2 * * *");
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::ValidationError;
use crate::schedule::{Interval, Schedule};

/// Default queue for scheduled jobs.
pub const DEFAULT_QUEUE: &str = "default";

/// Common schedule expressions.
pub mod presets {
    pub const HOURLY: &str = "@hourly";
    pub const DAILY: &str = "@daily";
    pub const WEEKLY: &str = "@weekly";
    pub const MONTHLY: &str = "@monthly";
    pub const YEARLY: &str = "@yearly";
    pub const QUARTERLY: &str = "0 0 1 1,4,7,10 *";
    pub const WEEKDAYS: &str = "0 0 * * 1-5";
    pub const WEEKENDS: &str = "0 0 * * 0,6";
}

/// Produces a fresh payload each time a schedule fires.
pub type PayloadFactory = Arc<dyn Fn() -> Vec<u8> + Send + Sync>;

/// Job type plus payload factory for a recurring job.
#[derive(Clone)]
pub struct TaskTemplate {
    job_type: String,
    payload: PayloadFactory,
}

impl TaskTemplate {
    /// Create a template whose payload is built on every fire.
    pub fn new<F>(job_type: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Vec<u8> + Send + Sync + 'static,
    {
        Self {
            job_type: job_type.into(),
            payload: Arc::new(factory),
        }
    }

    /// Create a template with a fixed payload.
    pub fn with_payload(job_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self::new(job_type, move || payload.clone())
    }

    /// Create a template with a fixed JSON payload.
    pub fn json<T: Serialize>(
        job_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::with_payload(job_type, serde_json::to_vec(payload)?))
    }

    /// The job type name handlers are looked up by.
    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// Produce a payload for a new job.
    pub fn materialize(&self) -> Vec<u8> {
        (self.payload)()
    }
}

impl fmt::Debug for TaskTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskTemplate")
            .field("job_type", &self.job_type)
            .finish_non_exhaustive()
    }
}

/// Options copied onto every job a schedule produces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// While a job with this key is queued or running, new ones are rejected.
    pub dedup_key: Option<String>,
    /// Handler time limit.
    pub timeout: Option<Duration>,
}

/// A validated, not yet registered schedule.
#[derive(Debug, Clone)]
pub struct ScheduleRecord {
    /// Entry identity. Unique within a registry.
    pub id: String,
    /// Cron spec, macro, or `@every` interval.
    pub cron_expression: String,
    /// Target queue.
    pub queue: String,
    /// What to enqueue.
    pub template: TaskTemplate,
    /// Per-job options.
    pub options: DispatchOptions,
}

impl ScheduleRecord {
    pub fn job_type(&self) -> &str {
        self.template.job_type()
    }
}

/// Fluent builder producing a [`ScheduleRecord`].
#[derive(Debug, Clone)]
pub struct ScheduleBuilder {
    template: TaskTemplate,
    id: Option<String>,
    queue: String,
    options: DispatchOptions,
}

impl ScheduleBuilder {
    /// Start describing a schedule for `template`.
    pub fn new(template: TaskTemplate) -> Self {
        Self {
            template,
            id: None,
            queue: DEFAULT_QUEUE.to_string(),
            options: DispatchOptions::default(),
        }
    }

    /// Set the entry identity (defaults to `job_type:expression:queue`).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the target queue.
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Reject new jobs while one with the same key is live.
    pub fn dedup_key(mut self, key: impl Into<String>) -> Self {
        self.options.dedup_key = Some(key.into());
        self
    }

    /// Limit how long the handler may run.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    // ---- intervals -------------------------------------------------------

    pub fn every_minute(self) -> Result<ScheduleRecord, ValidationError> {
        self.every_n_minutes(1)
    }

    pub fn every_two_minutes(self) -> Result<ScheduleRecord, ValidationError> {
        self.every_n_minutes(2)
    }

    pub fn every_five_minutes(self) -> Result<ScheduleRecord, ValidationError> {
        self.every_n_minutes(5)
    }

    pub fn every_ten_minutes(self) -> Result<ScheduleRecord, ValidationError> {
        self.every_n_minutes(10)
    }

    pub fn every_fifteen_minutes(self) -> Result<ScheduleRecord, ValidationError> {
        self.every_n_minutes(15)
    }

    pub fn every_thirty_minutes(self) -> Result<ScheduleRecord, ValidationError> {
        self.every_n_minutes(30)
    }

    /// Fire every `minutes` minutes, counted from registration.
    pub fn every_n_minutes(self, minutes: u32) -> Result<ScheduleRecord, ValidationError> {
        let interval = Interval::minutes(minutes)?;
        self.finish(Schedule::Every(interval).expression().to_string())
    }

    // ---- hourly / daily --------------------------------------------------

    pub fn hourly(self) -> Result<ScheduleRecord, ValidationError> {
        self.finish(presets::HOURLY.to_string())
    }

    /// Every hour at `minute` past.
    pub fn hourly_at(self, minute: i32) -> Result<ScheduleRecord, ValidationError> {
        let minute = check_range("minute", minute, 0, 59)?;
        self.finish(format!("{} * * * *", minute))
    }

    /// Every day at midnight.
    pub fn daily(self) -> Result<ScheduleRecord, ValidationError> {
        self.finish(presets::DAILY.to_string())
    }

    /// Every day at `time` (`HH:MM`).
    pub fn daily_at(self, time: &str) -> Result<ScheduleRecord, ValidationError> {
        let (hour, minute) = parse_time(time)?;
        self.finish(format!("{} {} * * *", minute, hour))
    }

    /// Every day at the top of two hours.
    pub fn twice_daily(self, first: i32, second: i32) -> Result<ScheduleRecord, ValidationError> {
        let first = check_range("hour", first, 0, 23)?;
        let second = check_range("hour", second, 0, 23)?;
        self.finish(format!("0 {},{} * * *", first, second))
    }

    // ---- weekly ----------------------------------------------------------

    /// Sundays at midnight.
    pub fn weekly(self) -> Result<ScheduleRecord, ValidationError> {
        self.finish(presets::WEEKLY.to_string())
    }

    /// On `day` (0 = Sunday .. 6 = Saturday) at `time`.
    pub fn weekly_on(self, day: i32, time: &str) -> Result<ScheduleRecord, ValidationError> {
        let day = check_range("day-of-week", day, 0, 6)?;
        let (hour, minute) = parse_time(time)?;
        self.finish(format!("{} {} * * {}", minute, hour, day))
    }

    /// Monday to Friday at midnight.
    pub fn weekdays(self) -> Result<ScheduleRecord, ValidationError> {
        self.finish(presets::WEEKDAYS.to_string())
    }

    /// Saturday and Sunday at midnight.
    pub fn weekends(self) -> Result<ScheduleRecord, ValidationError> {
        self.finish(presets::WEEKENDS.to_string())
    }

    pub fn sundays(self) -> Result<ScheduleRecord, ValidationError> {
        self.on_weekday(0)
    }

    pub fn mondays(self) -> Result<ScheduleRecord, ValidationError> {
        self.on_weekday(1)
    }

    pub fn tuesdays(self) -> Result<ScheduleRecord, ValidationError> {
        self.on_weekday(2)
    }

    pub fn wednesdays(self) -> Result<ScheduleRecord, ValidationError> {
        self.on_weekday(3)
    }

    pub fn thursdays(self) -> Result<ScheduleRecord, ValidationError> {
        self.on_weekday(4)
    }

    pub fn fridays(self) -> Result<ScheduleRecord, ValidationError> {
        self.on_weekday(5)
    }

    pub fn saturdays(self) -> Result<ScheduleRecord, ValidationError> {
        self.on_weekday(6)
    }

    fn on_weekday(self, day: u32) -> Result<ScheduleRecord, ValidationError> {
        self.finish(format!("0 0 * * {}", day))
    }

    // ---- monthly and longer ----------------------------------------------

    /// First of the month at midnight.
    pub fn monthly(self) -> Result<ScheduleRecord, ValidationError> {
        self.finish(presets::MONTHLY.to_string())
    }

    /// On day `day` (1-31) of every month at `time`.
    ///
    /// Months shorter than `day` are skipped.
    pub fn monthly_on(self, day: i32, time: &str) -> Result<ScheduleRecord, ValidationError> {
        let day = check_range("day-of-month", day, 1, 31)?;
        let (hour, minute) = parse_time(time)?;
        self.finish(format!("{} {} {} * *", minute, hour, day))
    }

    /// First day of January, April, July and October at midnight.
    pub fn quarterly(self) -> Result<ScheduleRecord, ValidationError> {
        self.finish(presets::QUARTERLY.to_string())
    }

    /// January 1st at midnight.
    pub fn yearly(self) -> Result<ScheduleRecord, ValidationError> {
        self.finish(presets::YEARLY.to_string())
    }

    /// A raw cron spec, macro, or `@every` interval.
    pub fn cron(self, expression: &str) -> Result<ScheduleRecord, ValidationError> {
        let schedule = Schedule::parse(expression)?;
        self.finish(schedule.expression().to_string())
    }

    fn finish(self, cron_expression: String) -> Result<ScheduleRecord, ValidationError> {
        if self.template.job_type().trim().is_empty() {
            return Err(ValidationError::MissingField("job_type"));
        }
        if self.queue.trim().is_empty() {
            return Err(ValidationError::MissingField("queue"));
        }

        let id = match self.id {
            Some(id) if id.trim().is_empty() => return Err(ValidationError::MissingField("id")),
            Some(id) => id,
            None => format!(
                "{}:{}:{}",
                self.template.job_type(),
                cron_expression,
                self.queue
            ),
        };

        Ok(ScheduleRecord {
            id,
            cron_expression,
            queue: self.queue,
            template: self.template,
            options: self.options,
        })
    }
}

fn check_range(
    field: &'static str,
    value: i32,
    min: u32,
    max: u32,
) -> Result<u32, ValidationError> {
    match u32::try_from(value) {
        Ok(v) if v >= min && v <= max => Ok(v),
        _ => Err(ValidationError::OutOfRange {
            field,
            value: i64::from(value),
            min,
            max,
        }),
    }
}

/// Parse `H:MM` or `HH:MM` into `(hour, minute)`.
pub fn parse_time(time: &str) -> Result<(u32, u32), ValidationError> {
    let invalid = || ValidationError::InvalidTime(time.to_string());

    let (h, m) = time.trim().split_once(':').ok_or_else(invalid)?;
    let well_formed = |s: &str, max_len: usize| {
        !s.is_empty() && s.len() <= max_len && s.bytes().all(|b| b.is_ascii_digit())
    };
    if !well_formed(h, 2) || !well_formed(m, 2) || m.len() != 2 {
        return Err(invalid());
    }

    let hour: i32 = h.parse().map_err(|_| invalid())?;
    let minute: i32 = m.parse().map_err(|_| invalid())?;
    Ok((
        check_range("hour", hour, 0, 23)?,
        check_range("minute", minute, 0, 59)?,
    ))
}

#[cfg(test)]
#[path = "builder_tests.rs"]
mod tests;
