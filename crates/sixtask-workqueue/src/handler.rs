//! Job handlers and the registry that maps job types to them.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;
use crate::job::{Job, JobId};

/// What a handler knows about the job it is running.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub job_type: String,
    pub queue: String,
    pub enqueued_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(job: &Job, cancel: CancellationToken) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type.clone(),
            queue: job.queue.clone(),
            enqueued_at: job.enqueued_at,
            cancel,
        }
    }

    /// Whether the job has been cancelled (shutdown or timeout).
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the job is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Token for passing cancellation into sub-tasks.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Executes jobs of one type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run the job.
    async fn handle(&self, ctx: &JobContext, payload: &[u8]) -> Result<(), HandlerError>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext, Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: &JobContext, payload: &[u8]) -> Result<(), HandlerError> {
        (self.f)(ctx.clone(), payload.to_vec()).await
    }
}

struct JsonHandler<T, F> {
    f: F,
    _payload: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, F, Fut> JobHandler for JsonHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(JobContext, T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: &JobContext, payload: &[u8]) -> Result<(), HandlerError> {
        let value: T =
            serde_json::from_slice(payload).map_err(|e| HandlerError::Decode(e.to_string()))?;
        (self.f)(ctx.clone(), value).await
    }
}

/// Job type to handler map.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `job_type`, replacing any previous one.
    pub fn register<H>(&mut self, job_type: impl Into<String>, handler: H) -> &mut Self
    where
        H: JobHandler + 'static,
    {
        self.handlers.insert(job_type.into(), Arc::new(handler));
        self
    }

    /// Register an async closure that receives the raw payload.
    pub fn register_fn<F, Fut>(&mut self, job_type: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(JobContext, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register(job_type, FnHandler { f })
    }

    /// Register an async closure that receives the payload decoded as JSON.
    ///
    /// A payload that does not decode fails the job with
    /// [`HandlerError::Decode`] without calling `f`.
    pub fn register_json<T, F, Fut>(&mut self, job_type: impl Into<String>, f: F) -> &mut Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(JobContext, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register(
            job_type,
            JsonHandler {
                f,
                _payload: PhantomData,
            },
        )
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}
