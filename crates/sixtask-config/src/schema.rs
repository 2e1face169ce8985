//! Configuration schema.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sixtask_cron::{DayMatching, ScheduleBuilder, ScheduleRecord, TaskTemplate, ValidationError};
use sixtask_scheduler::Timezone;
use sixtask_workqueue::{RetryPolicy, WorkerConfig};

use crate::loader::ConfigLoader;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueSection,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub shutdown: ShutdownSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

/// Which queue backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process only. Producers and consumers must share the process.
    Memory,
    /// Directory shared by every process using the same `path`.
    #[default]
    File,
}

/// `[queue]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSection {
    #[serde(default)]
    pub backend: BackendKind,

    /// Root directory of the file backend.
    #[serde(default = "default_queue_path")]
    pub path: String,

    /// Backoff for connectivity errors.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_queue_path() -> String {
    "storage/queue".to_string()
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            path: default_queue_path(),
            retry: RetryPolicy::default(),
        }
    }
}

impl QueueSection {
    /// `path` with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(ConfigLoader::expand_path(&self.path))
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Whether `run` starts the schedule registry.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Wall clock schedules are evaluated against.
    #[serde(default)]
    pub timezone: Timezone,

    /// How day-of-month and day-of-week combine when both are set.
    #[serde(default)]
    pub day_matching: DayMatching,

    /// Schedules declared in config, in addition to those registered in code.
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
}

fn default_true() -> bool {
    true
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            timezone: Timezone::default(),
            day_matching: DayMatching::default(),
            schedules: Vec::new(),
        }
    }
}

/// One `[[scheduler.schedules]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Entry identity. Defaults to `job_type:cron:queue`.
    #[serde(default)]
    pub id: Option<String>,

    pub job_type: String,

    /// Cron spec, macro or `@every` interval.
    pub cron: String,

    #[serde(default = "default_queue")]
    pub queue: String,

    /// JSON payload sent with every job.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,

    #[serde(default)]
    pub dedup_key: Option<String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_queue() -> String {
    sixtask_cron::DEFAULT_QUEUE.to_string()
}

impl ScheduleConfig {
    /// Turn the entry into a registrable record.
    pub fn to_record(&self) -> Result<ScheduleRecord, ValidationError> {
        let payload = match &self.payload {
            Some(value) => value.to_string().into_bytes(),
            None => b"{}".to_vec(),
        };

        let mut builder = ScheduleBuilder::new(TaskTemplate::with_payload(&self.job_type, payload))
            .queue(&self.queue);
        if let Some(id) = &self.id {
            builder = builder.id(id);
        }
        if let Some(key) = &self.dedup_key {
            builder = builder.dedup_key(key);
        }
        if let Some(secs) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        builder.cron(&self.cron)
    }
}

/// `[shutdown]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownSection {
    /// Seconds to wait for in-flight jobs before abandoning them.
    #[serde(default = "default_shutdown_timeout")]
    pub timeout_secs: u64,
}

fn default_shutdown_timeout() -> u64 {
    5
}

impl Default for ShutdownSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl ShutdownSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter, overridden by `RUST_LOG`.
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for daily log files.
    #[serde(default = "default_log_dir")]
    pub dir: String,

    /// Log file name prefix.
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Daily files to keep.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Emit JSON on the console.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "storage/log".to_string()
}

fn default_file_prefix() -> String {
    "app".to_string()
}

fn default_max_files() -> usize {
    15
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: default_log_dir(),
            file_prefix: default_file_prefix(),
            max_files: default_max_files(),
            json: false,
        }
    }
}

impl LoggingSection {
    /// `dir` with `~` expanded.
    pub fn resolved_dir(&self) -> PathBuf {
        PathBuf::from(ConfigLoader::expand_path(&self.dir))
    }
}
