//! Durable priority job queue.
//!
//! This module provides the queue contract on top of [`JobStore`]:
//!
//! - Validated enqueue with priority clamping
//! - Atomic claim of the next eligible job, or of one named job
//! - Completion with retry and exponential backoff
//! - Healing of jobs whose worker died mid-execution
//!
//! # Ownership
//!
//! Each claim stamps a fresh claim token on the row. Completion writes are
//! conditional on that token, so a worker whose job was healed and
//! re-claimed elsewhere cannot overwrite the newer attempt.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use super::job::{
    CompletionReport, Disposition, Job, JobOutcome, JobStatus, NewJob, OutcomeKind,
};
use super::retry::RetryPolicy;
use crate::config::AppConfig;
use crate::error::ValidationError;
use crate::metrics::MetricsCollector;
use crate::storage::{Database, DatabaseError, FinishUpdate, JobStore};

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Caller input was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No job with this id.
    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    /// The caller does not own this job.
    #[error("Job {0} belongs to another user")]
    Forbidden(Uuid),

    /// The job is not claimable right now.
    #[error("{message}")]
    Conflict {
        message: String,
        next_at: Option<DateTime<Utc>>,
    },

    /// The claim was lost (healed and re-claimed, or already released).
    #[error("Claim on job {0} was lost")]
    ClaimLost(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.queued + self.processing + self.completed + self.failed
    }
}

/// SQLite-backed job queue.
#[derive(Clone)]
pub struct JobQueue {
    store: JobStore,
    retry: RetryPolicy,
    heal_after: Duration,
    max_attempts: u32,
    metrics: MetricsCollector,
}

impl JobQueue {
    pub fn new(db: &Database, config: &AppConfig) -> Self {
        Self {
            store: JobStore::new(db),
            retry: RetryPolicy::default(),
            heal_after: config.heal_after,
            max_attempts: config.max_attempts,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_heal_after(mut self, heal_after: Duration) -> Self {
        self.heal_after = heal_after;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Validates and stores a new `queued` job.
    pub async fn enqueue(&self, new_job: NewJob) -> Result<Job, QueueError> {
        let job = new_job.validate(self.max_attempts)?;
        self.store.insert(&job).await?;

        tracing::info!(
            job_id = %job.id,
            tool = %job.tool,
            priority = job.priority,
            "Job enqueued"
        );
        Ok(job)
    }

    /// Claims the next eligible job, or returns `None` without blocking.
    pub async fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        let token = Uuid::new_v4().to_string();
        let claimed = self
            .store
            .claim_next(&token, Utc::now().timestamp_millis())
            .await?;

        match &claimed {
            Some(job) => {
                self.metrics.record_claim("claimed");
                tracing::info!(job_id = %job.id, tool = %job.tool, attempt = job.attempts + 1, "Job claimed");
            }
            None => self.metrics.record_claim("empty"),
        }
        Ok(claimed)
    }

    /// Claims one named job.
    ///
    /// With `owner` set, the job must belong to that user. `None` is the
    /// privileged path used by the dispatcher.
    pub async fn claim(&self, job_id: Uuid, owner: Option<&str>) -> Result<Job, QueueError> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or(QueueError::JobNotFound(job_id))?;

        if let Some(user) = owner {
            if !job.is_owned_by(user) {
                return Err(QueueError::Forbidden(job_id));
            }
        }

        let token = Uuid::new_v4().to_string();
        let now = Utc::now();
        if let Some(claimed) = self
            .store
            .claim_by_id(job_id, &token, now.timestamp_millis())
            .await?
        {
            self.metrics.record_claim("claimed");
            tracing::info!(job_id = %job_id, tool = %claimed.tool, "Job claimed");
            return Ok(claimed);
        }

        self.metrics.record_claim("conflict");
        let current = self
            .store
            .get(job_id)
            .await?
            .ok_or(QueueError::JobNotFound(job_id))?;
        Err(claim_conflict(&current, now))
    }

    /// Returns stale `processing` jobs to `queued`; returns how many.
    pub async fn heal_stuck(&self) -> Result<u64, QueueError> {
        let threshold = chrono::Duration::from_std(self.heal_after)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let cutoff = (Utc::now() - threshold).timestamp_millis();
        let healed = self.store.heal_stuck(cutoff).await?;

        if healed > 0 {
            tracing::warn!(healed, "Healed stuck jobs");
            self.metrics.record_healed(healed);
        }
        Ok(healed)
    }

    /// Records the outcome of an attempt on a claimed job.
    ///
    /// Success completes the job. A retryable failure requeues it with a
    /// backoff delay while attempts remain; otherwise it fails for good.
    pub async fn complete(
        &self,
        job: &Job,
        outcome: JobOutcome,
    ) -> Result<CompletionReport, QueueError> {
        let token = job
            .claim_token
            .as_deref()
            .ok_or(QueueError::ClaimLost(job.id))?;

        let attempts = (job.attempts + 1).min(job.max_attempts);
        let now = Utc::now();
        let provider = outcome.provider.clone().or_else(|| job.provider.clone());
        let model = outcome.model.or(job.model);
        let metadata = merge_metadata(&job.metadata, &outcome, attempts, now, provider.as_deref());

        let (update, disposition, delay) = match outcome.kind {
            OutcomeKind::Succeeded(result) => (
                FinishUpdate {
                    status: JobStatus::Completed,
                    attempts,
                    next_at_ms: None,
                    completed_at_ms: Some(now.timestamp_millis()),
                    execution_ms: outcome.execution_ms,
                    result: Some(result),
                    error: None,
                    provider,
                    model,
                    metadata,
                },
                Disposition::Completed,
                None,
            ),
            OutcomeKind::Failed { error, retryable } => {
                let decision = self.retry.decide(attempts, job.max_attempts);
                if retryable && decision.retry {
                    let next_at = now + chrono::Duration::milliseconds(decision.delay.as_millis() as i64);
                    (
                        FinishUpdate {
                            status: JobStatus::Queued,
                            attempts,
                            next_at_ms: Some(next_at.timestamp_millis()),
                            completed_at_ms: None,
                            execution_ms: outcome.execution_ms,
                            result: None,
                            error: Some(error),
                            provider,
                            model,
                            metadata,
                        },
                        Disposition::Requeued,
                        Some(decision.delay),
                    )
                } else {
                    (
                        FinishUpdate {
                            status: JobStatus::Failed,
                            attempts,
                            next_at_ms: None,
                            completed_at_ms: Some(now.timestamp_millis()),
                            execution_ms: outcome.execution_ms,
                            result: None,
                            error: Some(error),
                            provider,
                            model,
                            metadata,
                        },
                        Disposition::Failed,
                        None,
                    )
                }
            }
        };

        let written = self
            .store
            .finish(job.id, token, &update)
            .await?
            .ok_or_else(|| {
                tracing::warn!(job_id = %job.id, "Claim lost before completion; outcome discarded");
                QueueError::ClaimLost(job.id)
            })?;

        self.metrics.record_job(written.tool.as_str(), disposition.as_str());
        match disposition {
            Disposition::Completed => {
                tracing::info!(job_id = %job.id, attempt = attempts, "Job completed")
            }
            Disposition::Requeued => tracing::warn!(
                job_id = %job.id,
                attempt = attempts,
                max_attempts = job.max_attempts,
                delay_secs = delay.map(|d| d.as_secs_f64()).unwrap_or_default(),
                error = written.error.as_deref().unwrap_or_default(),
                "Job failed; requeued"
            ),
            Disposition::Failed => tracing::warn!(
                job_id = %job.id,
                attempt = attempts,
                error = written.error.as_deref().unwrap_or_default(),
                "Job failed permanently"
            ),
        }

        Ok(CompletionReport {
            job: written,
            disposition,
        })
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self.store.get(job_id).await?)
    }

    /// Loads a job on behalf of `owner`.
    pub async fn get_for(&self, job_id: Uuid, owner: &str) -> Result<Job, QueueError> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or(QueueError::JobNotFound(job_id))?;
        if !job.is_owned_by(owner) {
            return Err(QueueError::Forbidden(job_id));
        }
        Ok(job)
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let counts = self.store.counts().await?;
        let count = |s: JobStatus| counts.get(&s).copied().unwrap_or_default();
        Ok(QueueStats {
            queued: count(JobStatus::Queued),
            processing: count(JobStatus::Processing),
            completed: count(JobStatus::Completed),
            failed: count(JobStatus::Failed),
        })
    }
}

fn claim_conflict(job: &Job, now: DateTime<Utc>) -> QueueError {
    let (message, next_at) = match job.status {
        JobStatus::Queued => match job.next_at {
            Some(next_at) if next_at > now => (
                format!("Job is scheduled for retry at {}", next_at.to_rfc3339()),
                Some(next_at),
            ),
            _ => ("Job was claimed by another worker".to_string(), None),
        },
        status => (format!("Job is already {}", status), None),
    };
    QueueError::Conflict { message, next_at }
}

fn merge_metadata(
    existing: &Value,
    outcome: &JobOutcome,
    attempt: u32,
    now: DateTime<Utc>,
    provider: Option<&str>,
) -> Value {
    let mut merged = match existing {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    merged.insert("execution_ms".to_string(), json!(outcome.execution_ms));
    merged.insert("provider".to_string(), json!(provider));
    merged.insert("model".to_string(), json!(outcome.model));
    merged.insert("attempt".to_string(), json!(attempt));
    merged.insert("completed_at".to_string(), json!(now.to_rfc3339()));
    Value::Object(merged)
}
