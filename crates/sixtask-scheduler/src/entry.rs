//! Registered schedule entries.

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sixtask_cron::{DispatchOptions, Schedule, ScheduleRecord, TaskTemplate};
use sixtask_workqueue::{Job, JobOptions};

/// Which wall clock schedules are evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timezone {
    #[default]
    Utc,
    Local,
}

impl Timezone {
    /// Current wall-clock time in this zone.
    pub fn now(self) -> NaiveDateTime {
        match self {
            Timezone::Utc => chrono::Utc::now().naive_utc(),
            Timezone::Local => chrono::Local::now().naive_local(),
        }
    }
}

/// Source of the wall-clock time schedules are evaluated against.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

impl Clock for Timezone {
    fn now(&self) -> NaiveDateTime {
        Timezone::now(*self)
    }
}

/// A recurring job owned by the registry.
#[derive(Debug)]
pub struct ScheduleEntry {
    pub id: String,
    pub schedule: Schedule,
    pub queue: String,
    pub template: TaskTemplate,
    pub options: DispatchOptions,
    /// Registration time; interval schedules count from here.
    pub anchor: NaiveDateTime,
    last_fired: Mutex<Option<NaiveDateTime>>,
}

impl ScheduleEntry {
    pub(crate) fn new(record: ScheduleRecord, schedule: Schedule, anchor: NaiveDateTime) -> Self {
        Self {
            id: record.id,
            schedule,
            queue: record.queue,
            template: record.template,
            options: record.options,
            anchor,
            last_fired: Mutex::new(None),
        }
    }

    /// Record `minute` as fired. Returns false if this or a later minute
    /// already fired.
    pub(crate) fn claim_minute(&self, minute: NaiveDateTime) -> bool {
        let mut last = self.last_fired.lock();
        match *last {
            Some(previous) if previous >= minute => false,
            _ => {
                *last = Some(minute);
                true
            }
        }
    }

    pub fn last_fired(&self) -> Option<NaiveDateTime> {
        *self.last_fired.lock()
    }

    /// Build a fresh job from the template.
    pub fn materialize(&self) -> Job {
        Job::new(self.template.job_type(), self.template.materialize()).with_options(JobOptions {
            dedup_key: self.options.dedup_key.clone(),
            timeout: self.options.timeout,
        })
    }

    pub fn info(&self, now: NaiveDateTime) -> EntryInfo {
        EntryInfo {
            id: self.id.clone(),
            expression: self.schedule.expression().to_string(),
            job_type: self.template.job_type().to_string(),
            queue: self.queue.clone(),
            next_fire: self.schedule.next_fire_after(now, self.anchor),
            last_fired: self.last_fired(),
        }
    }
}

/// Read-only view of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub id: String,
    pub expression: String,
    pub job_type: String,
    pub queue: String,
    pub next_fire: Option<NaiveDateTime>,
    pub last_fired: Option<NaiveDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use sixtask_cron::ScheduleBuilder;
    use std::time::Duration;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, 4)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn entry() -> ScheduleEntry {
        let record = ScheduleBuilder::new(TaskTemplate::with_payload("cleanup", b"{}".to_vec()))
            .dedup_key("cleanup")
            .timeout(Duration::from_secs(9))
            .daily_at("02:30")
            .unwrap();
        let schedule = Schedule::parse(&record.cron_expression).unwrap();
        ScheduleEntry::new(record, schedule, at(0, 0))
    }

    #[test]
    fn test_claim_minute_once() {
        let entry = entry();
        assert!(entry.claim_minute(at(2, 30)));
        assert!(!entry.claim_minute(at(2, 30)));
        assert!(!entry.claim_minute(at(2, 29)));
        assert!(entry.claim_minute(at(2, 31)));
        assert_eq!(entry.last_fired(), Some(at(2, 31)));
    }

    #[test]
    fn test_materialize_copies_options() {
        let job = entry().materialize();
        assert_eq!(job.job_type, "cleanup");
        assert_eq!(job.payload, b"{}");
        assert_eq!(job.options.dedup_key.as_deref(), Some("cleanup"));
        assert_eq!(job.options.timeout, Some(Duration::from_secs(9)));
    }

    #[test]
    fn test_info_next_fire() {
        let info = entry().info(at(1, 0));
        assert_eq!(info.expression, "30 2 * * *");
        assert_eq!(info.next_fire, Some(at(2, 30)));
        assert_eq!(info.last_fired, None);
    }

    #[test]
    fn test_timezone_serde() {
        let tz: Timezone = serde_json::from_str("\"local\"").unwrap();
        assert_eq!(tz, Timezone::Local);
        assert_eq!(Timezone::default(), Timezone::Utc);
    }
}
