//! archforge: architecture lane pipeline and model job queue.
//!
//! This library turns a free-text product vision into five architecture
//! artifacts (spec, schema, UI plan, test plan, CI/CD plan), one model call
//! per lane, and runs a durable queue of ad-hoc model jobs with claim-based
//! concurrency and exponential-backoff retry.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod storage;

// Re-export commonly used error types
pub use error::{ProviderError, ValidationError};
