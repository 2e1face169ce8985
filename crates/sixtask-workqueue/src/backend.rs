//! Queue storage backends.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::QueueError;
use crate::job::Job;

/// FIFO storage for named queues.
///
/// Implementations must make `pop` exclusive: a job is handed to at most one
/// caller. Dedup keys stay reserved from `push` until `ack`.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<(), QueueError>;

    /// Append a job to `job.queue`.
    async fn push(&self, job: &Job) -> Result<(), QueueError>;

    /// Claim the oldest job in `queue`.
    async fn pop(&self, queue: &str) -> Result<Option<Job>, QueueError>;

    /// Remove a claimed job for good and release its dedup key.
    async fn ack(&self, job: &Job) -> Result<(), QueueError>;

    /// Number of jobs waiting in `queue`.
    async fn len(&self, queue: &str) -> Result<usize, QueueError>;
}

#[derive(Default)]
struct MemoryState {
    queues: HashMap<String, VecDeque<Job>>,
    live_keys: HashSet<String>,
}

/// In-process backend.
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    online: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            online: AtomicBool::new(true),
        }
    }

    /// Simulate an outage. While offline every call fails with
    /// [`QueueError::Connectivity`].
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), QueueError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::Connectivity("memory backend is offline".to_string()))
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn ping(&self) -> Result<(), QueueError> {
        self.check_online()
    }

    async fn push(&self, job: &Job) -> Result<(), QueueError> {
        self.check_online()?;
        let mut state = self.state.lock();
        if let Some(key) = &job.options.dedup_key {
            if !state.live_keys.insert(key.clone()) {
                return Err(QueueError::DuplicateJob(key.clone()));
            }
        }
        state
            .queues
            .entry(job.queue.clone())
            .or_default()
            .push_back(job.clone());
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<Job>, QueueError> {
        self.check_online()?;
        let mut state = self.state.lock();
        Ok(state.queues.get_mut(queue).and_then(|q| q.pop_front()))
    }

    async fn ack(&self, job: &Job) -> Result<(), QueueError> {
        self.check_online()?;
        if let Some(key) = &job.options.dedup_key {
            self.state.lock().live_keys.remove(key);
        }
        Ok(())
    }

    async fn len(&self, queue: &str) -> Result<usize, QueueError> {
        self.check_online()?;
        Ok(self.state.lock().queues.get(queue).map_or(0, VecDeque::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(queue: &str, job_type: &str) -> Job {
        let mut job = Job::new(job_type, vec![]);
        job.queue = queue.to_string();
        job
    }

    #[tokio::test]
    async fn test_memory_fifo() {
        let backend = MemoryBackend::new();
        backend.push(&job("default", "a")).await.unwrap();
        backend.push(&job("default", "b")).await.unwrap();
        backend.push(&job("other", "c")).await.unwrap();

        assert_eq!(backend.len("default").await.unwrap(), 2);
        assert_eq!(backend.pop("default").await.unwrap().unwrap().job_type, "a");
        assert_eq!(backend.pop("default").await.unwrap().unwrap().job_type, "b");
        assert!(backend.pop("default").await.unwrap().is_none());
        assert_eq!(backend.len("other").await.unwrap(), 1);
        assert!(backend.pop("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_dedup_until_ack() {
        let backend = MemoryBackend::new();
        let first = job("default", "a").with_dedup_key("k");
        backend.push(&first).await.unwrap();

        let dup = job("default", "a").with_dedup_key("k");
        assert_eq!(
            backend.push(&dup).await,
            Err(QueueError::DuplicateJob("k".to_string()))
        );

        // still reserved while running
        let claimed = backend.pop("default").await.unwrap().unwrap();
        assert!(backend.push(&dup).await.is_err());

        backend.ack(&claimed).await.unwrap();
        backend.push(&dup).await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_offline() {
        let backend = MemoryBackend::new();
        backend.set_online(false);
        assert!(matches!(backend.ping().await, Err(QueueError::Connectivity(_))));
        assert!(backend.push(&job("default", "a")).await.is_err());
        backend.set_online(true);
        assert!(backend.ping().await.is_ok());
    }
}
