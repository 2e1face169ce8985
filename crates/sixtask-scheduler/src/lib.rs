//! # sixtask Scheduler
//!
//! Registry of recurring jobs. A background loop wakes on every minute
//! boundary, evaluates each entry's schedule and enqueues the due ones.

pub mod entry;
pub mod error;
pub mod registry;

pub use entry::{Clock, EntryInfo, ScheduleEntry, Timezone};
pub use error::ScheduleError;
pub use registry::{ScheduleRegistry, StopOutcome, TickReport};
