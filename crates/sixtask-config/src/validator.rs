//! Configuration validation.

use std::collections::HashSet;

use sixtask_workqueue::{MAX_CONCURRENCY, validate_queue_name};

use crate::error::ConfigError;
use crate::schema::Config;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Collapse errors into a single [`ConfigError::InvalidValue`].
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(first) => Err(ConfigError::InvalidValue {
                field: first.path,
                message: first.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_queue(config, &mut result);
        Self::validate_worker(config, &mut result);
        Self::validate_scheduler(config, &mut result);
        Self::validate_shutdown(config, &mut result);
        Self::validate_logging(config, &mut result);

        Ok(result)
    }

    fn validate_queue(config: &Config, result: &mut ValidationResult) {
        if config.queue.path.trim().is_empty() {
            result.add_error(ValidationError::new("queue.path", "Path cannot be empty"));
        }

        let retry = &config.queue.retry;
        if retry.max_attempts == 0 {
            result.add_error(ValidationError::new(
                "queue.retry.max_attempts",
                "max_attempts must be greater than 0",
            ));
        }
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            result.add_warning(ValidationWarning::new(
                "queue.retry.initial_backoff_ms",
                "initial backoff exceeds max backoff and will be capped",
            ));
        }
    }

    fn validate_worker(config: &Config, result: &mut ValidationResult) {
        let worker = &config.worker;

        if worker.concurrency == 0 {
            result.add_error(ValidationError::new(
                "worker.concurrency",
                "concurrency must be greater than 0",
            ));
        } else if worker.concurrency > MAX_CONCURRENCY {
            result.add_error(ValidationError::new(
                "worker.concurrency",
                format!("concurrency must be at most {}", MAX_CONCURRENCY),
            ));
        }

        if worker.queues.is_empty() {
            result.add_error(ValidationError::new(
                "worker.queues",
                "At least one queue is required",
            ));
        }

        for (name, weight) in &worker.queues {
            if let Err(e) = validate_queue_name(name) {
                result.add_error(ValidationError::new(
                    format!("worker.queues.{}", name),
                    e.to_string(),
                ));
            }
            if *weight == 0 {
                result.add_error(ValidationError::new(
                    format!("worker.queues.{}", name),
                    "weight must be greater than 0",
                ));
            }
        }

        if worker.poll_interval_ms == 0 {
            result.add_error(ValidationError::new(
                "worker.poll_interval_ms",
                "poll_interval_ms must be greater than 0",
            ));
        }
    }

    fn validate_scheduler(config: &Config, result: &mut ValidationResult) {
        let scheduler = &config.scheduler;

        if !scheduler.enabled && !scheduler.schedules.is_empty() {
            result.add_warning(ValidationWarning::new(
                "scheduler.enabled",
                "Scheduler is disabled, declared schedules will not fire",
            ));
        }

        let mut ids = HashSet::new();
        for (i, schedule) in scheduler.schedules.iter().enumerate() {
            let path = format!("scheduler.schedules[{}]", i);

            let record = match schedule.to_record() {
                Ok(record) => record,
                Err(e) => {
                    result.add_error(ValidationError::new(path, e.to_string()));
                    continue;
                }
            };

            if let Err(e) = validate_queue_name(&record.queue) {
                result.add_error(ValidationError::new(format!("{}.queue", path), e.to_string()));
            } else if !config.worker.queues.contains_key(&record.queue) {
                result.add_warning(ValidationWarning::new(
                    format!("{}.queue", path),
                    format!(
                        "Queue '{}' is not consumed by this worker configuration",
                        record.queue
                    ),
                ));
            }

            if !ids.insert(record.id.clone()) {
                result.add_error(ValidationError::new(
                    format!("{}.id", path),
                    format!("Duplicate schedule id '{}'", record.id),
                ));
            }
        }
    }

    fn validate_shutdown(config: &Config, result: &mut ValidationResult) {
        if config.shutdown.timeout_secs == 0 {
            result.add_warning(ValidationWarning::new(
                "shutdown.timeout_secs",
                "A zero shutdown timeout abandons every in-flight job",
            ));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let level = config.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            result.add_error(ValidationError::new(
                "logging.level",
                format!(
                    "Unknown level '{}', expected one of: {}",
                    config.logging.level,
                    LOG_LEVELS.join(", ")
                ),
            ));
        }

        if config.logging.max_files == 0 {
            result.add_error(ValidationError::new(
                "logging.max_files",
                "max_files must be greater than 0",
            ));
        }

        if config.logging.file_prefix.is_empty() {
            result.add_error(ValidationError::new(
                "logging.file_prefix",
                "file_prefix cannot be empty",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
