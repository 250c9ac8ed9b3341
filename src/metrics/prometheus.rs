//! Prometheus metrics registration and export.
//!
//! Every archforge metric lives in a `OnceLock` so recording sites can run
//! before (or without) initialization; recording against an uninitialized
//! metric is a no-op.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all archforge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Job outcomes, labeled by tool and outcome (completed/requeued/failed).
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Claim attempts, labeled by result (claimed/empty/conflict).
pub static QUEUE_CLAIMS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Jobs recovered from a stale `processing` state.
pub static JOBS_HEALED_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Number of jobs currently being executed by this process.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Lane outcomes, labeled by lane and status.
pub static LANES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Run outcomes, labeled by status.
pub static RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Provider calls, labeled by provider and status.
pub static PROVIDER_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Provider call latency in seconds, labeled by provider.
pub static PROVIDER_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Number of active queue workers.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Safe to call more than once; later calls leave the first registry in
/// place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if a metric definition is invalid.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    // Queue metrics
    let jobs_total = CounterVec::new(
        Opts::new("archforge_jobs_total", "Job executions by outcome"),
        &["tool", "outcome"],
    )?;

    let queue_claims_total = CounterVec::new(
        Opts::new("archforge_queue_claims_total", "Queue claim attempts"),
        &["result"],
    )?;

    let jobs_healed_total = Counter::new(
        "archforge_jobs_healed_total",
        "Jobs recovered from a stale processing state",
    )?;

    let jobs_in_progress = Gauge::new(
        "archforge_jobs_in_progress",
        "Number of jobs currently being executed",
    )?;

    // Pipeline metrics
    let lanes_total = CounterVec::new(
        Opts::new("archforge_lanes_total", "Lane executions by terminal status"),
        &["lane", "status"],
    )?;

    let runs_total = CounterVec::new(
        Opts::new("archforge_runs_total", "Runs by terminal status"),
        &["status"],
    )?;

    // Provider metrics
    let provider_requests_total = CounterVec::new(
        Opts::new("archforge_provider_requests_total", "Provider API requests"),
        &["provider", "status"],
    )?;

    let provider_latency = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "archforge_provider_latency_seconds",
            "Provider API request latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 45.0]),
        &["provider"],
    )?;

    // Worker metrics
    let active_workers = Gauge::new("archforge_active_workers", "Number of active workers")?;

    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(queue_claims_total.clone()))?;
    registry.register(Box::new(jobs_healed_total.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(lanes_total.clone()))?;
    registry.register(Box::new(runs_total.clone()))?;
    registry.register(Box::new(provider_requests_total.clone()))?;
    registry.register(Box::new(provider_latency.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    // A concurrent initializer may win the race; its metrics stay in effect.
    let _ = REGISTRY.set(registry);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = QUEUE_CLAIMS_TOTAL.set(queue_claims_total);
    let _ = JOBS_HEALED_TOTAL.set(jobs_healed_total);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = LANES_TOTAL.set(lanes_total);
    let _ = RUNS_TOTAL.set(runs_total);
    let _ = PROVIDER_REQUESTS_TOTAL.set(provider_requests_total);
    let _ = PROVIDER_LATENCY.set(provider_latency);
    let _ = ACTIVE_WORKERS.set(active_workers);

    tracing::info!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// axum handler for `GET /metrics`.
pub async fn metrics_handler() -> String {
    export_metrics()
}
