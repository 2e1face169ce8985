//! # sixtask Cron
//!
//! Cron expression engine and fluent schedule builder.
//!
//! ## Features
//!
//! - Five-field cron specs with lists, ranges and steps
//! - `@hourly`-style macros and `@every <duration>` intervals
//! - Configurable day-of-month / day-of-week combination
//! - Bounded next-fire search
//! - Builder that produces validated [`ScheduleRecord`]s

pub mod builder;
pub mod error;
pub mod schedule;
pub mod spec;

pub use builder::{
    DEFAULT_QUEUE, DispatchOptions, PayloadFactory, ScheduleBuilder, ScheduleRecord, TaskTemplate,
    parse_time, presets,
};
pub use error::ValidationError;
pub use schedule::{Interval, Schedule};
pub use spec::{CronSpec, DayMatching, Field, FieldSet, LOOKAHEAD_DAYS, truncate_to_minute};
