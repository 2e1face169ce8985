//! Producer and consumer handle over a queue backend.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::backend::QueueBackend;
use crate::config::RetryPolicy;
use crate::error::QueueError;
use crate::job::{Job, JobId};

/// Longest accepted queue name.
pub const MAX_QUEUE_NAME_LEN: usize = 128;

/// Check a queue name: non-empty, at most [`MAX_QUEUE_NAME_LEN`] bytes of
/// `[A-Za-z0-9_.-]`, and not `.` or `..`.
pub fn validate_queue_name(name: &str) -> Result<(), QueueError> {
    if name.is_empty() {
        return Err(QueueError::Validation("queue name is empty".to_string()));
    }
    if name.len() > MAX_QUEUE_NAME_LEN {
        return Err(QueueError::Validation(format!(
            "queue name is longer than {} characters",
            MAX_QUEUE_NAME_LEN
        )));
    }
    if name == "." || name == ".." {
        return Err(QueueError::Validation(format!(
            "'{}' is not a valid queue name",
            name
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(QueueError::Validation(format!(
            "queue name '{}' contains invalid character {:?}",
            name, c
        )));
    }
    Ok(())
}

/// Cloneable handle for enqueueing and consuming jobs.
#[derive(Clone)]
pub struct QueueClient {
    backend: Arc<dyn QueueBackend>,
    retry: RetryPolicy,
}

impl QueueClient {
    /// Connect to `backend`, failing if it does not answer a ping.
    pub async fn connect(backend: Arc<dyn QueueBackend>) -> Result<Self, QueueError> {
        backend.ping().await?;
        debug!("Queue backend connected");
        Ok(Self {
            backend,
            retry: RetryPolicy::default(),
        })
    }

    /// Use a different retry policy for connectivity errors.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Validate, stamp and push `job` onto `queue`.
    ///
    /// Connectivity errors are retried per the [`RetryPolicy`]; validation
    /// and duplicate errors are returned immediately.
    pub async fn enqueue(&self, mut job: Job, queue: &str) -> Result<JobId, QueueError> {
        validate_queue_name(queue)?;
        if job.job_type.trim().is_empty() {
            return Err(QueueError::Validation("job type is empty".to_string()));
        }

        job.queue = queue.to_string();
        job.enqueued_at = Utc::now();

        let mut retry = 0;
        loop {
            match self.backend.push(&job).await {
                Ok(()) => {
                    debug!(
                        "Enqueued job {} ({}) on queue '{}'",
                        job.id, job.job_type, queue
                    );
                    return Ok(job.id);
                }
                Err(e) if e.is_retryable() && retry + 1 < self.retry.max_attempts => {
                    retry += 1;
                    let delay = self.retry.backoff(retry);
                    warn!(
                        "Enqueue of job {} failed ({}), retrying in {:?}",
                        job.id, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Claim the next job from `queue`.
    pub async fn dequeue(&self, queue: &str) -> Result<Option<Job>, QueueError> {
        self.backend.pop(queue).await
    }

    /// Mark a claimed job as finished.
    pub async fn ack(&self, job: &Job) -> Result<(), QueueError> {
        self.backend.ack(job).await
    }

    /// Number of jobs waiting in `queue`.
    pub async fn len(&self, queue: &str) -> Result<usize, QueueError> {
        self.backend.len(queue).await
    }
}

impl std::fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClient")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
