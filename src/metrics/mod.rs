//! Prometheus-based monitoring for the queue, the pipeline and provider calls.
//!
//! ```ignore
//! use archforge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics()?;
//! MetricsCollector::new().record_run("succeeded");
//! let text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics, metrics_handler};

pub use prometheus::{
    ACTIVE_WORKERS, JOBS_HEALED_TOTAL, JOBS_IN_PROGRESS, JOBS_TOTAL, LANES_TOTAL,
    PROVIDER_LATENCY, PROVIDER_REQUESTS_TOTAL, QUEUE_CLAIMS_TOTAL, REGISTRY, RUNS_TOTAL,
};
