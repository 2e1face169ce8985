//! Schedule validation errors.

use thiserror::Error;

/// Errors raised while parsing or building a schedule.
///
/// Every variant describes bad input. None of them are retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The cron expression could not be parsed.
    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidExpression { expr: String, reason: String },

    /// A numeric value is outside the allowed range.
    #[error("Value {value} out of range for {field} ({min}-{max})")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: u32,
        max: u32,
    },

    /// A time string is not in `HH:MM` format.
    #[error("Invalid time '{0}': expected HH:MM")]
    InvalidTime(String),

    /// An `@every` interval is malformed or not a whole number of minutes.
    #[error("Invalid interval '{0}': expected a positive whole number of minutes (e.g. 5m, 1h30m)")]
    InvalidInterval(String),

    /// The schedule never fires within the lookahead window.
    #[error("Schedule '{0}' never fires within the lookahead window")]
    Unsatisfiable(String),

    /// A required field is empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

impl ValidationError {
    pub(crate) fn expression(expr: &str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidExpression {
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }
}
