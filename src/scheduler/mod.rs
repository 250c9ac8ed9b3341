//! Generic job queue and the workers that drain it.
//!
//! - **JobQueue**: SQLite-backed priority queue with conditional claims
//! - **JobExecutor**: runs a claimed job's tool and records the outcome
//! - **Dispatcher**: one heal / claim / execute cycle
//! - **WorkerPool**: N workers repeating the dispatch cycle
//! - **RetryPolicy**: backoff decision for failed attempts
//!
//! # Job lifecycle
//!
//! ```text
//!   enqueue ──► queued ──claim──► processing ──success──► completed
//!                 ▲                   │
//!                 │   retry (backoff) │ failure, attempts left
//!                 └───────────────────┤
//!                 ▲                   │ failure, no attempts left
//!          heal   │                   ▼
//!     (stale) ────┘                 failed
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use archforge::scheduler::{Dispatcher, JobExecutor, JobQueue, NewJob};
//!
//! let queue = JobQueue::new(&db, &config);
//! queue.enqueue(NewJob::new("gpt-query", json!({"input": "hello"}))).await?;
//!
//! let executor = JobExecutor::new(queue, gateway, config.tools.clone());
//! let report = Dispatcher::new(executor).dispatch_once().await?;
//! ```

pub mod dispatcher;
pub mod executor;
pub mod job;
pub mod queue;
pub mod retry;
pub mod worker_pool;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use executor::{ExecutionReport, JobExecutor};
pub use job::{
    clamp_priority, CompletionReport, Disposition, Job, JobOutcome, JobStatus, JobView, NewJob,
    OutcomeKind, Tool, MAX_PRIORITY, MIN_PRIORITY,
};
pub use queue::{JobQueue, QueueError, QueueStats};
pub use retry::{RetryDecision, RetryPolicy};
pub use worker_pool::{PoolError, PoolStats, WorkerPool, WorkerPoolConfig};
