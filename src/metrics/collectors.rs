//! High-level recording interface over the raw Prometheus metrics.
//!
//! `MetricsCollector` keeps label values consistent across call sites.

use super::prometheus::{
    ACTIVE_WORKERS, JOBS_HEALED_TOTAL, JOBS_IN_PROGRESS, JOBS_TOTAL, LANES_TOTAL,
    PROVIDER_LATENCY, PROVIDER_REQUESTS_TOTAL, QUEUE_CLAIMS_TOTAL, RUNS_TOTAL,
};

/// Metrics collector for archforge operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new collector. Recording is a no-op until `init_metrics()`.
    pub fn new() -> Self {
        Self
    }

    /// Record one provider call.
    ///
    /// `status` is the upstream HTTP status, or a short tag such as
    /// `"timeout"` or `"transport"` when the call never got a response.
    pub fn record_provider_request(&self, provider: &str, status: &str, latency_secs: f64) {
        if let Some(requests) = PROVIDER_REQUESTS_TOTAL.get() {
            requests.with_label_values(&[provider, status]).inc();
        }

        if let Some(latency) = PROVIDER_LATENCY.get() {
            latency.with_label_values(&[provider]).observe(latency_secs);
        }

        tracing::trace!(
            provider = provider,
            status = status,
            latency_secs = latency_secs,
            "Recorded provider request metric"
        );
    }

    /// Record a job execution outcome (`completed`, `requeued` or `failed`).
    pub fn record_job(&self, tool: &str, outcome: &str) {
        if let Some(jobs) = JOBS_TOTAL.get() {
            jobs.with_label_values(&[tool, outcome]).inc();
        }
    }

    /// Record a claim attempt result (`claimed`, `empty` or `conflict`).
    pub fn record_claim(&self, result: &str) {
        if let Some(claims) = QUEUE_CLAIMS_TOTAL.get() {
            claims.with_label_values(&[result]).inc();
        }
    }

    pub fn record_healed(&self, count: u64) {
        if count == 0 {
            return;
        }
        if let Some(healed) = JOBS_HEALED_TOTAL.get() {
            healed.inc_by(count as f64);
        }
    }

    pub fn record_lane(&self, lane: &str, status: &str) {
        if let Some(lanes) = LANES_TOTAL.get() {
            lanes.with_label_values(&[lane, status]).inc();
        }
    }

    pub fn record_run(&self, status: &str) {
        if let Some(runs) = RUNS_TOTAL.get() {
            runs.with_label_values(&[status]).inc();
        }
    }

    pub fn job_started(&self) {
        if let Some(gauge) = JOBS_IN_PROGRESS.get() {
            gauge.inc();
        }
    }

    pub fn job_finished(&self) {
        if let Some(gauge) = JOBS_IN_PROGRESS.get() {
            gauge.dec();
        }
    }

    pub fn set_active_workers(&self, count: usize) {
        if let Some(workers) = ACTIVE_WORKERS.get() {
            workers.set(count as f64);
        }
    }
}
