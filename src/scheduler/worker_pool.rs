//! Pool of workers repeatedly running the dispatch cycle.
//!
//! Each worker runs as an independent async task. Workers share nothing but
//! the database, so claim exclusivity comes from the queue's conditional
//! updates.
//!
//! # Features
//!
//! - Configurable number of workers
//! - Graceful shutdown with broadcast channel
//! - Pool statistics tracking

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::dispatcher::Dispatcher;
use crate::metrics::MetricsCollector;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// Sleep between cycles when the queue is empty.
    pub poll_interval: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            poll_interval: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStats {
    pub num_workers: usize,
    /// Workers currently executing a job.
    pub active_workers: usize,
    pub jobs_completed: u64,
    /// Jobs requeued for another attempt.
    pub jobs_requeued: u64,
    pub jobs_failed: u64,
    /// Stale jobs returned to the queue by this pool.
    pub jobs_healed: u64,
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Completed + requeued + failed.
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_requeued + self.jobs_failed
    }

    /// Percentage of processed attempts that completed.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.jobs_completed as f64 / total as f64) * 100.0
    }
}

struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_requeued: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_healed: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_requeued: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_healed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record(&self, status: &str, duration: Duration) {
        let counter = match status {
            "completed" => &self.jobs_completed,
            "requeued" => &self.jobs_requeued,
            _ => &self.jobs_failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_healed(&self, count: u64) {
        self.jobs_healed.fetch_add(count, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let requeued = self.jobs_requeued.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);

        let total_jobs = completed + requeued + failed;
        let average_duration = if total_jobs > 0 {
            Duration::from_millis(total_duration_ms / total_jobs)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: self.active_workers.load(Ordering::SeqCst) as usize,
            jobs_completed: completed,
            jobs_requeued: requeued,
            jobs_failed: failed,
            jobs_healed: self.jobs_healed.load(Ordering::SeqCst),
            average_job_duration: average_duration,
        }
    }
}

/// Manages a set of workers sharing one dispatcher.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    dispatcher: Dispatcher,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
    metrics: MetricsCollector,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, dispatcher: Dispatcher) -> Self {
        // Only one shutdown signal is ever sent.
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            dispatcher,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
            metrics: MetricsCollector::new(),
        }
    }

    /// Spawns the workers; they start polling immediately.
    pub fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                dispatcher: self.dispatcher.clone(),
                shutdown_rx: self.shutdown_tx.subscribe(),
                poll_interval: self.config.poll_interval,
                stats: Arc::clone(&self.stats),
            };
            self.worker_handles.push(tokio::spawn(worker.run()));
        }

        self.is_running.store(true, Ordering::SeqCst);
        self.metrics.set_active_workers(self.config.num_workers);
        info!(num_workers = self.config.num_workers, "Worker pool started");
        Ok(())
    }

    /// Signals all workers and waits for their in-flight cycle to finish.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");
        // Workers may already have exited.
        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = self.worker_handles.drain(..).collect();
        let join_all = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        let result = tokio::time::timeout(self.config.shutdown_timeout, join_all).await;
        self.is_running.store(false, Ordering::SeqCst);
        self.metrics.set_active_workers(0);

        match result {
            Ok(()) => {
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }
}

struct Worker {
    id: String,
    dispatcher: Dispatcher,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => break,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            let started = Instant::now();
            self.stats.increment_active();
            let result = self.dispatcher.dispatch_once().await;
            self.stats.decrement_active();

            let idle = match result {
                Ok(report) => {
                    self.stats.record_healed(report.healed);
                    match report.status.as_deref() {
                        Some(status) => {
                            self.stats.record(status, started.elapsed());
                            debug!(worker_id = %self.id, job_id = ?report.job_id, status, "Cycle finished");
                            false
                        }
                        None => true,
                    }
                }
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "Dispatch cycle failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = self.shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ToolSettings};
    use crate::llm::ProviderGateway;
    use crate::scheduler::executor::JobExecutor;
    use crate::scheduler::job::NewJob;
    use crate::scheduler::queue::JobQueue;
    use crate::storage::Database;
    use serde_json::json;

    #[test]
    fn test_worker_pool_config_builder() {
        let config = WorkerPoolConfig::new(8)
            .with_poll_interval(Duration::from_millis(250))
            .with_shutdown_timeout(Duration::from_secs(5));

        assert_eq!(config.num_workers, 8);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_shared_pool_stats() {
        let stats = SharedPoolStats::new();
        stats.record("completed", Duration::from_secs(10));
        stats.record("requeued", Duration::from_secs(20));
        stats.record("failed", Duration::from_secs(30));
        stats.record_healed(2);

        let pool_stats = stats.to_pool_stats(3);
        assert_eq!(pool_stats.num_workers, 3);
        assert_eq!(pool_stats.jobs_completed, 1);
        assert_eq!(pool_stats.jobs_requeued, 1);
        assert_eq!(pool_stats.jobs_failed, 1);
        assert_eq!(pool_stats.jobs_healed, 2);
        assert_eq!(pool_stats.average_job_duration, Duration::from_secs(20));
        assert!((pool_stats.success_rate() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_stats_success_rate() {
        assert_eq!(PoolStats::default().success_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_shuts_down() {
        let db = Database::in_memory().await.unwrap();
        let queue = JobQueue::new(&db, &AppConfig::default());
        for _ in 0..3 {
            // No input: each job fails permanently on its first attempt.
            queue
                .enqueue(NewJob::new("gpt-query", json!({})))
                .await
                .unwrap();
        }
        let dispatcher = Dispatcher::new(JobExecutor::new(
            queue.clone(),
            ProviderGateway::new(),
            ToolSettings::default(),
        ));

        let mut pool = WorkerPool::new(
            WorkerPoolConfig::new(2).with_poll_interval(Duration::from_millis(10)),
            dispatcher,
        );
        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(PoolError::AlreadyRunning)));

        for _ in 0..200 {
            if queue.stats().await.unwrap().failed == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        pool.shutdown().await.unwrap();
        assert!(!pool.is_running());
        assert_eq!(pool.stats().jobs_failed, 3);
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.queued + stats.processing, 0);
    }
}
