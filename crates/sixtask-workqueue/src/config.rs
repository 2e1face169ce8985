//! Worker and retry configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::WorkerError;

/// Upper bound on worker concurrency.
pub const MAX_CONCURRENCY: usize = 10_000;

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum number of jobs running at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Queue name to weight. Higher weights are served more often.
    #[serde(default = "default_queues")]
    pub queues: BTreeMap<String, u32>,

    /// How long to sleep when every queue is empty, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_concurrency() -> usize {
    10
}

fn default_queues() -> BTreeMap<String, u32> {
    BTreeMap::from([("planilhas".to_string(), 6), ("default".to_string(), 2)])
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queues: default_queues(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl WorkerConfig {
    /// Set concurrency.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Replace the queue map.
    pub fn with_queues<I, S>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        self.queues = queues.into_iter().map(|(q, w)| (q.into(), w)).collect();
        self
    }

    /// Set the idle poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Check that the pool can run with this config.
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.concurrency == 0 {
            return Err(WorkerError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.concurrency > MAX_CONCURRENCY {
            return Err(WorkerError::InvalidConfig(format!(
                "concurrency must be at most {}",
                MAX_CONCURRENCY
            )));
        }
        if self.queues.is_empty() {
            return Err(WorkerError::InvalidConfig(
                "at least one queue is required".to_string(),
            ));
        }
        for (name, weight) in &self.queues {
            crate::client::validate_queue_name(name)
                .map_err(|e| WorkerError::InvalidConfig(e.to_string()))?;
            if *weight == 0 {
                return Err(WorkerError::InvalidConfig(format!(
                    "queue '{}' has weight 0",
                    name
                )));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(WorkerError::InvalidConfig(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Exponential backoff for connectivity errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Cap on any single delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based), doubling each time.
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(32);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.queues.get("planilhas"), Some(&6));
        assert_eq!(config.queues.get("default"), Some(&2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_worker_config_validation() {
        assert!(WorkerConfig::default().with_concurrency(0).validate().is_err());
        assert!(
            WorkerConfig::default()
                .with_queues(Vec::<(String, u32)>::new())
                .validate()
                .is_err()
        );
        assert!(
            WorkerConfig::default()
                .with_queues([("high", 0)])
                .validate()
                .is_err()
        );
        assert!(
            WorkerConfig::default()
                .with_queues([("bad name", 1)])
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_worker_config_deserialize_partial() {
        let config: WorkerConfig = serde_json::from_str(r#"{"concurrency": 3}"#).unwrap();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.queues.len(), 2);
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(100), Duration::from_millis(1_000));
    }
}
