//! Five-field cron expressions.
//!
//! A [`CronSpec`] is five integer sets (minute, hour, day-of-month, month,
//! day-of-week). Each field accepts `*`, a value, a range `a-b`, a list
//! `a,b,c`, and an optional step (`*/15`, `1-10/2`, `5/10`).

use std::fmt;

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// How long [`CronSpec::next_fire_after`] searches before giving up.
pub const LOOKAHEAD_DAYS: i64 = 4 * 366;

/// How day-of-month and day-of-week combine when both are restricted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayMatching {
    /// Either field may match (classic Vixie cron).
    #[default]
    Or,
    /// Both fields must match.
    And,
}

/// A cron field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl Field {
    const ALL: [Field; 5] = [
        Field::Minute,
        Field::Hour,
        Field::DayOfMonth,
        Field::Month,
        Field::DayOfWeek,
    ];

    /// Inclusive bounds of the field.
    pub fn bounds(self) -> (u32, u32) {
        match self {
            Field::Minute => (0, 59),
            Field::Hour => (0, 23),
            Field::DayOfMonth => (1, 31),
            Field::Month => (1, 12),
            Field::DayOfWeek => (0, 6),
        }
    }

    /// Human-readable field name.
    pub fn name(self) -> &'static str {
        match self {
            Field::Minute => "minute",
            Field::Hour => "hour",
            Field::DayOfMonth => "day-of-month",
            Field::Month => "month",
            Field::DayOfWeek => "day-of-week",
        }
    }
}

/// A set of small integers stored as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FieldSet(u64);

impl FieldSet {
    fn insert(&mut self, value: u32) {
        self.0 |= 1u64 << value;
    }

    /// Whether the set contains `value`.
    pub fn contains(self, value: u32) -> bool {
        value < 64 && self.0 & (1u64 << value) != 0
    }

    /// Values in ascending order.
    pub fn values(self) -> impl Iterator<Item = u32> {
        (0..64u32).filter(move |v| self.contains(*v))
    }

    /// Whether the set is empty.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// A parsed five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSpec {
    source: String,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    dom_restricted: bool,
    dow_restricted: bool,
    day_matching: DayMatching,
}

impl CronSpec {
    /// Parse an expression with the default [`DayMatching::Or`] rule.
    ///
    /// Accepts five whitespace-separated fields or one of the macros
    /// `@hourly`, `@daily`, `@midnight`, `@weekly`, `@monthly`, `@yearly`,
    /// `@annually`. Interval schedules (`@every`) are handled by
    /// [`crate::Schedule`].
    pub fn parse(expr: &str) -> Result<Self, ValidationError> {
        Self::parse_with(expr, DayMatching::default())
    }

    /// Parse an expression with an explicit day-matching rule.
    pub fn parse_with(expr: &str, day_matching: DayMatching) -> Result<Self, ValidationError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::expression(expr, "expression is empty"));
        }

        let body = if trimmed.starts_with('@') {
            expand_macro(trimmed)?
        } else {
            trimmed
        };

        let parts: Vec<&str> = body.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(ValidationError::expression(
                expr,
                format!("expected 5 fields, found {}", parts.len()),
            ));
        }

        let mut sets = [FieldSet::default(); 5];
        for (i, (field, text)) in Field::ALL.iter().zip(parts.iter()).enumerate() {
            sets[i] = parse_field(expr, *field, text)?;
        }

        let source = if trimmed.starts_with('@') {
            trimmed.to_ascii_lowercase()
        } else {
            parts.join(" ")
        };

        Ok(Self {
            source,
            minutes: sets[0],
            hours: sets[1],
            days_of_month: sets[2],
            months: sets[3],
            days_of_week: sets[4],
            dom_restricted: !parts[2].starts_with('*'),
            dow_restricted: !parts[4].starts_with('*'),
            day_matching,
        })
    }

    /// Return a copy using a different day-matching rule.
    pub fn with_day_matching(mut self, day_matching: DayMatching) -> Self {
        self.day_matching = day_matching;
        self
    }

    /// The expression as written (whitespace normalized).
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The day-matching rule in effect.
    pub fn day_matching(&self) -> DayMatching {
        self.day_matching
    }

    pub fn minutes(&self) -> FieldSet {
        self.minutes
    }

    pub fn hours(&self) -> FieldSet {
        self.hours
    }

    pub fn days_of_month(&self) -> FieldSet {
        self.days_of_month
    }

    pub fn months(&self) -> FieldSet {
        self.months
    }

    pub fn days_of_week(&self) -> FieldSet {
        self.days_of_week
    }

    /// Whether the spec matches `t`. Seconds are ignored.
    pub fn matches<T: Datelike + Timelike>(&self, t: &T) -> bool {
        self.minutes.contains(t.minute())
            && self.hours.contains(t.hour())
            && self.months.contains(t.month())
            && self.day_matches(t)
    }

    fn day_matches<T: Datelike>(&self, t: &T) -> bool {
        let dom = self.days_of_month.contains(t.day());
        let dow = self
            .days_of_week
            .contains(t.weekday().num_days_from_sunday());

        if self.dom_restricted && self.dow_restricted {
            match self.day_matching {
                DayMatching::Or => dom || dow,
                DayMatching::And => dom && dow,
            }
        } else {
            dom && dow
        }
    }

    /// The first matching minute strictly after `after`.
    ///
    /// Returns `None` if nothing matches within [`LOOKAHEAD_DAYS`].
    pub fn next_fire_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let limit = after + Duration::days(LOOKAHEAD_DAYS);
        let mut t = truncate_to_minute(after)? + Duration::minutes(1);

        while t <= limit {
            if !self.months.contains(t.month()) {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = chrono::NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(&t) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }

        None
    }

    /// Whether the spec fires at least once within the lookahead window
    /// starting at `from`.
    pub fn is_satisfiable_from(&self, from: NaiveDateTime) -> bool {
        self.next_fire_after(from).is_some()
    }
}

impl fmt::Display for CronSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for CronSpec {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CronSpec::parse(s)
    }
}

/// Truncate a timestamp to the start of its minute.
pub fn truncate_to_minute(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.with_second(0)?.with_nanosecond(0)
}

fn expand_macro(expr: &str) -> Result<&'static str, ValidationError> {
    match expr.to_ascii_lowercase().as_str() {
        "@hourly" => Ok("0 * * * *"),
        "@daily" | "@midnight" => Ok("0 0 * * *"),
        "@weekly" => Ok("0 0 * * 0"),
        "@monthly" => Ok("0 0 1 * *"),
        "@yearly" | "@annually" => Ok("0 0 1 1 *"),
        other if other.starts_with("@every") => Err(ValidationError::expression(
            expr,
            "@every is an interval schedule, not a cron spec",
        )),
        _ => Err(ValidationError::expression(expr, "unknown macro")),
    }
}

fn parse_field(expr: &str, field: Field, text: &str) -> Result<FieldSet, ValidationError> {
    let (min, max) = field.bounds();
    let mut set = FieldSet::default();

    for part in text.split(',') {
        if part.is_empty() {
            return Err(ValidationError::expression(
                expr,
                format!("empty list item in {} field", field.name()),
            ));
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(parse_number(expr, field, step)?)),
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(expr, field, a)?, parse_value(expr, field, b)?)
        } else {
            let value = parse_value(expr, field, range)?;
            // `5/10` means "from 5 to the end, every 10"
            if step.is_some() {
                (value, max)
            } else {
                (value, value)
            }
        };

        if start > end {
            return Err(ValidationError::expression(
                expr,
                format!("descending range {}-{} in {} field", start, end, field.name()),
            ));
        }

        let step = match step {
            Some(0) => {
                return Err(ValidationError::expression(
                    expr,
                    format!("zero step in {} field", field.name()),
                ));
            }
            Some(s) => s,
            None => 1,
        };

        let mut v = Some(start);
        while let Some(value) = v.filter(|value| *value <= end) {
            set.insert(value);
            v = value.checked_add(step);
        }
    }

    if set.is_empty() {
        return Err(ValidationError::expression(
            expr,
            format!("{} field matches nothing", field.name()),
        ));
    }

    Ok(set)
}

fn parse_number(expr: &str, field: Field, text: &str) -> Result<u32, ValidationError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::expression(
            expr,
            format!("'{}' is not a number in {} field", text, field.name()),
        ));
    }
    text.parse::<u32>().map_err(|_| {
        ValidationError::expression(
            expr,
            format!("'{}' is too large for {} field", text, field.name()),
        )
    })
}

fn parse_value(expr: &str, field: Field, text: &str) -> Result<u32, ValidationError> {
    let value = parse_number(expr, field, text)?;
    let (min, max) = field.bounds();
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field: field.name(),
            value: i64::from(value),
            min,
            max,
        });
    }
    Ok(value)
}

#[cfg(test)]
#[path = "spec_tests.rs"]
mod tests;
