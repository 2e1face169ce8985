//! # sixtask Queue
//!
//! Named weighted queues and a bounded worker pool.
//!
//! ## Features
//!
//! - Pluggable queue backends (in-memory, shared directory)
//! - Dedup keys held from enqueue until the job finishes
//! - Smooth weighted round-robin across queues
//! - Semaphore-bounded worker pool with cancellation, timeouts and panic isolation
//! - Deadline-bounded graceful shutdown

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod file_backend;
pub mod handler;
pub mod job;
pub mod selector;
pub mod worker;

pub use backend::{MemoryBackend, QueueBackend};
pub use client::{QueueClient, validate_queue_name};
pub use config::{MAX_CONCURRENCY, RetryPolicy, WorkerConfig};
pub use error::{HandlerError, QueueError, WorkerError};
pub use file_backend::FileBackend;
pub use handler::{HandlerRegistry, JobContext, JobHandler};
pub use job::{Job, JobEvent, JobId, JobOptions, JobStatus};
pub use selector::WeightedSelector;
pub use worker::{PoolStats, ShutdownOutcome, WorkerPool};
