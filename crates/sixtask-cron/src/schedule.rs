//! Recurrence rules: cron specs and `@every` intervals.

use std::fmt;

use chrono::{Duration, NaiveDateTime};

use crate::error::ValidationError;
use crate::spec::{CronSpec, DayMatching, truncate_to_minute};

/// A fixed interval in whole minutes, from `@every <duration>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    source: String,
    minutes: u32,
}

impl Interval {
    /// Parse the duration part of `@every`, e.g. `5m`, `1h30m`, `120s`.
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        let text = text.trim();
        let invalid = || ValidationError::InvalidInterval(text.to_string());

        if text.is_empty() {
            return Err(invalid());
        }

        let mut total_secs: u64 = 0;
        let mut digits = String::new();
        for c in text.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            let unit = match c {
                'h' => 3600,
                'm' => 60,
                's' => 1,
                _ => return Err(invalid()),
            };
            let n: u64 = digits.parse().map_err(|_| invalid())?;
            total_secs = n
                .checked_mul(unit)
                .and_then(|v| total_secs.checked_add(v))
                .ok_or_else(invalid)?;
            digits.clear();
        }

        // trailing digits without a unit
        if !digits.is_empty() {
            return Err(invalid());
        }
        if total_secs == 0 || total_secs % 60 != 0 {
            return Err(invalid());
        }

        let minutes = u32::try_from(total_secs / 60).map_err(|_| invalid())?;
        Ok(Self {
            source: format!("@every {}", text),
            minutes,
        })
    }

    /// Build an interval of `minutes` minutes.
    pub fn minutes(minutes: u32) -> Result<Self, ValidationError> {
        if minutes == 0 {
            return Err(ValidationError::InvalidInterval("0m".to_string()));
        }
        Ok(Self {
            source: format!("@every {}m", minutes),
            minutes,
        })
    }

    /// Length of the interval in minutes.
    pub fn as_minutes(&self) -> u32 {
        self.minutes
    }

    fn is_due(&self, t: NaiveDateTime, anchor: NaiveDateTime) -> bool {
        let elapsed = (t - anchor).num_minutes();
        elapsed > 0 && elapsed % i64::from(self.minutes) == 0
    }

    fn next_after(&self, t: NaiveDateTime, anchor: NaiveDateTime) -> NaiveDateTime {
        let step = i64::from(self.minutes);
        if t < anchor {
            return anchor + Duration::minutes(step);
        }
        let elapsed = (t - anchor).num_minutes();
        anchor + Duration::minutes((elapsed / step + 1) * step)
    }
}

/// A recurrence rule evaluated at minute resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Calendar-based cron spec.
    Cron(CronSpec),
    /// Fixed interval counted from an anchor (usually the registration time).
    Every(Interval),
}

impl Schedule {
    /// Parse a cron spec, macro, or `@every` interval.
    pub fn parse(expr: &str) -> Result<Self, ValidationError> {
        Self::parse_with(expr, DayMatching::default())
    }

    /// Parse with an explicit day-matching rule for cron specs.
    pub fn parse_with(expr: &str, day_matching: DayMatching) -> Result<Self, ValidationError> {
        let trimmed = expr.trim();
        let lower = trimmed.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("@every") {
            if !rest.starts_with(char::is_whitespace) {
                return Err(ValidationError::InvalidInterval(trimmed.to_string()));
            }
            return Ok(Schedule::Every(Interval::parse(rest)?));
        }
        Ok(Schedule::Cron(CronSpec::parse_with(trimmed, day_matching)?))
    }

    /// The expression as written.
    pub fn expression(&self) -> &str {
        match self {
            Schedule::Cron(spec) => spec.as_str(),
            Schedule::Every(interval) => &interval.source,
        }
    }

    /// Whether the schedule fires at minute `t`.
    ///
    /// `anchor` is only used by interval schedules; they fire at
    /// `anchor + k * interval` for every `k >= 1`.
    pub fn is_due(&self, t: NaiveDateTime, anchor: NaiveDateTime) -> bool {
        let (Some(t), Some(anchor)) = (truncate_to_minute(t), truncate_to_minute(anchor)) else {
            return false;
        };
        match self {
            Schedule::Cron(spec) => spec.matches(&t),
            Schedule::Every(interval) => interval.is_due(t, anchor),
        }
    }

    /// The next fire time strictly after `t`, or `None` if the schedule
    /// never fires within the lookahead window.
    pub fn next_fire_after(
        &self,
        t: NaiveDateTime,
        anchor: NaiveDateTime,
    ) -> Option<NaiveDateTime> {
        match self {
            Schedule::Cron(spec) => spec.next_fire_after(t),
            Schedule::Every(interval) => {
                Some(interval.next_after(truncate_to_minute(t)?, truncate_to_minute(anchor)?))
            }
        }
    }

    /// Reject schedules that never fire, e.g. `0 0 30 2 *`.
    pub fn ensure_satisfiable(&self, from: NaiveDateTime) -> Result<(), ValidationError> {
        match self {
            Schedule::Cron(spec) if !spec.is_satisfiable_from(from) => {
                Err(ValidationError::Unsatisfiable(spec.as_str().to_string()))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.expression())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn test_interval_parse() {
        assert_eq!(Interval::parse("5m").unwrap().as_minutes(), 5);
        assert_eq!(Interval::parse("1h30m").unwrap().as_minutes(), 90);
        assert_eq!(Interval::parse("120s").unwrap().as_minutes(), 2);
        assert_eq!(Interval::parse("2h").unwrap().as_minutes(), 120);
    }

    #[test]
    fn test_interval_rejects_sub_minute() {
        assert!(Interval::parse("90s").is_err());
        assert!(Interval::parse("30s").is_err());
        assert!(Interval::parse("0m").is_err());
        assert!(Interval::parse("").is_err());
        assert!(Interval::parse("5").is_err());
        assert!(Interval::parse("5x").is_err());
        assert!(Interval::minutes(0).is_err());
    }

    #[test]
    fn test_parse_every() {
        let schedule = Schedule::parse("@every 15m").unwrap();
        assert!(matches!(schedule, Schedule::Every(ref i) if i.as_minutes() == 15));
        assert_eq!(schedule.expression(), "@every 15m");

        assert!(Schedule::parse("@everyday").is_err());
        assert!(Schedule::parse("@every 90s").is_err());
    }

    #[test]
    fn test_parse_cron_and_macro() {
        assert!(matches!(Schedule::parse("30 2 * * *").unwrap(), Schedule::Cron(_)));
        assert!(matches!(Schedule::parse("@daily").unwrap(), Schedule::Cron(_)));
        assert!(Schedule::parse("61 * * * *").is_err());
    }

    #[test]
    fn test_every_is_due_from_anchor() {
        let schedule = Schedule::parse("@every 10m").unwrap();
        let anchor = at(2026, 1, 1, 12, 3);

        assert!(!schedule.is_due(anchor, anchor));
        assert!(!schedule.is_due(at(2026, 1, 1, 12, 10), anchor));
        assert!(schedule.is_due(at(2026, 1, 1, 12, 13), anchor));
        assert!(schedule.is_due(at(2026, 1, 1, 12, 23), anchor));
        assert!(!schedule.is_due(at(2026, 1, 1, 12, 2), anchor));
    }

    #[test]
    fn test_every_next_fire() {
        let schedule = Schedule::parse("@every 10m").unwrap();
        let anchor = at(2026, 1, 1, 12, 3);

        assert_eq!(schedule.next_fire_after(anchor, anchor), Some(at(2026, 1, 1, 12, 13)));
        assert_eq!(
            schedule.next_fire_after(at(2026, 1, 1, 12, 13), anchor),
            Some(at(2026, 1, 1, 12, 23))
        );
        assert_eq!(
            schedule.next_fire_after(at(2026, 1, 1, 11, 0), anchor),
            Some(at(2026, 1, 1, 12, 13))
        );
    }

    #[test]
    fn test_ensure_satisfiable() {
        let from = at(2026, 1, 1, 0, 0);
        assert!(Schedule::parse("0 0 30 2 *").unwrap().ensure_satisfiable(from).is_err());
        assert!(Schedule::parse("0 0 29 2 *").unwrap().ensure_satisfiable(from).is_ok());
        assert!(Schedule::parse("@every 5m").unwrap().ensure_satisfiable(from).is_ok());
    }
}
