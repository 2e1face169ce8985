//! Job definition and lifecycle.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-job options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// While a job with this key is queued or running, pushes with the same
    /// key are rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,

    /// Handler time limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued or claimed, handler not started.
    Pending,
    /// Handler is executing.
    Running,
    /// Handler returned success.
    Completed,
    /// Handler returned an error, panicked, timed out, or was never found.
    Failed,
    /// Abandoned during shutdown.
    Cancelled,
}

impl JobStatus {
    /// Whether the status is final.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A unit of work.
///
/// Jobs are immutable once enqueued; the queue name and enqueue time are
/// stamped by [`crate::QueueClient::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID.
    pub id: JobId,
    /// Handler lookup key.
    pub job_type: String,
    /// Opaque payload, JSON by convention.
    pub payload: Vec<u8>,
    /// Target queue.
    #[serde(default)]
    pub queue: String,
    /// When the job was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Options.
    #[serde(default)]
    pub options: JobOptions,
}

impl Job {
    /// Create a new job.
    pub fn new(job_type: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            payload: payload.into(),
            queue: String::new(),
            enqueued_at: Utc::now(),
            options: JobOptions::default(),
        }
    }

    /// Create a job with a JSON payload.
    pub fn json<T: Serialize>(
        job_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(job_type, serde_json::to_vec(payload)?))
    }

    /// Set all options.
    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the dedup key.
    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.options.dedup_key = Some(key.into());
        self
    }

    /// Set the handler time limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }
}

/// A job state change, published by the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub job_type: String,
    pub queue: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}
