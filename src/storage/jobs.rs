//! Job-table persistence.
//!
//! Every state change is one conditional `UPDATE`. A claim only succeeds
//! against a row that is still `queued`; a completion only succeeds against
//! a row that is still `processing` under the caller's claim token.

use std::collections::HashMap;

use serde_json::{json, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::database::{from_millis, from_millis_opt, now_millis, parse_json, Database, DatabaseError};
use crate::llm::ModelId;
use crate::scheduler::job::{Job, JobStatus, Tool};

/// Values written when a claimed job is released.
#[derive(Debug, Clone)]
pub struct FinishUpdate {
    /// `Queued` (retry), `Completed` or `Failed`.
    pub status: JobStatus,
    pub attempts: u32,
    pub next_at_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
    pub execution_ms: u64,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub provider: Option<String>,
    pub model: Option<ModelId>,
    pub metadata: Value,
}

#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    pub async fn insert(&self, job: &Job) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, owner_id, tool, params, priority, model, status, attempts,
                max_attempts, metadata, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.owner_id)
        .bind(job.tool.as_str())
        .bind(job.params.to_string())
        .bind(job.priority as i64)
        .bind(job.model.map(|m| m.as_str()))
        .bind(job.status.as_str())
        .bind(job.attempts as i64)
        .bind(job.max_attempts as i64)
        .bind(job.metadata.to_string())
        .bind(job.created_at.timestamp_millis())
        .bind(job.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    /// Claims the highest-priority, oldest eligible job.
    ///
    /// Selection and transition happen in one statement, so two concurrent
    /// claimers can never both receive the same row.
    pub async fn claim_next(&self, token: &str, now_ms: i64) -> Result<Option<Job>, DatabaseError> {
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'processing', started_at = ?1, claim_token = ?2, updated_at = ?3
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'queued' AND (next_at IS NULL OR next_at <= ?4)
                ORDER BY priority DESC, created_at ASC, rowid ASC
                LIMIT 1
            )
            AND status = 'queued'
            RETURNING *
            "#,
        )
        .bind(now_ms)
        .bind(token)
        .bind(now_ms)
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    /// Claims one specific job if it is queued and eligible.
    pub async fn claim_by_id(
        &self,
        id: Uuid,
        token: &str,
        now_ms: i64,
    ) -> Result<Option<Job>, DatabaseError> {
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'processing', started_at = ?1, claim_token = ?2, updated_at = ?3
            WHERE id = ?4 AND status = 'queued' AND (next_at IS NULL OR next_at <= ?5)
            RETURNING *
            "#,
        )
        .bind(now_ms)
        .bind(token)
        .bind(now_ms)
        .bind(id.to_string())
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    /// Returns jobs that started before `cutoff_ms` and are still processing
    /// to `queued`. The attempt count is left untouched.
    pub async fn heal_stuck(&self, cutoff_ms: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued', started_at = NULL, claim_token = NULL, updated_at = ?1
            WHERE status = 'processing' AND started_at IS NOT NULL AND started_at < ?2
            "#,
        )
        .bind(now_millis())
        .bind(cutoff_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Releases a claimed job. `None` means the claim was lost.
    pub async fn finish(
        &self,
        id: Uuid,
        token: &str,
        update: &FinishUpdate,
    ) -> Result<Option<Job>, DatabaseError> {
        let requeue = update.status == JobStatus::Queued;

        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?1,
                attempts = ?2,
                next_at = ?3,
                started_at = CASE WHEN ?4 THEN NULL ELSE started_at END,
                completed_at = ?5,
                execution_ms = ?6,
                result = ?7,
                error = ?8,
                provider = COALESCE(?9, provider),
                model = COALESCE(?10, model),
                metadata = ?11,
                claim_token = NULL,
                updated_at = ?12
            WHERE id = ?13 AND status = 'processing' AND claim_token = ?14
            RETURNING *
            "#,
        )
        .bind(update.status.as_str())
        .bind(update.attempts as i64)
        .bind(update.next_at_ms)
        .bind(requeue)
        .bind(update.completed_at_ms)
        .bind(update.execution_ms as i64)
        .bind(update.result.as_ref().map(Value::to_string))
        .bind(&update.error)
        .bind(&update.provider)
        .bind(update.model.map(|m| m.as_str()))
        .bind(update.metadata.to_string())
        .bind(now_millis())
        .bind(id.to_string())
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    /// Number of jobs per status; every status is present.
    pub async fn counts(&self) -> Result<HashMap<JobStatus, u64>, DatabaseError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts: HashMap<JobStatus, u64> =
            JobStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        for row in rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            if let Some(status) = JobStatus::parse(&status) {
                counts.insert(status, n as u64);
            }
        }
        Ok(counts)
    }
}

fn corrupt(what: &str, value: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::Corrupt(format!("{what} '{value}'"))
}

fn row_to_job(row: &SqliteRow) -> Result<Job, DatabaseError> {
    let id: String = row.get("id");
    let tool: String = row.get("tool");
    let status: String = row.get("status");
    let model: Option<String> = row.get("model");
    let params: String = row.get("params");

    Ok(Job {
        id: Uuid::parse_str(&id).map_err(|_| corrupt("job id", &id))?,
        owner_id: row.get("owner_id"),
        tool: Tool::parse(&tool).map_err(|_| corrupt("tool", &tool))?,
        params: serde_json::from_str(&params)?,
        priority: row.get::<i64, _>("priority") as i32,
        model: model
            .map(|m| ModelId::parse(&m).map_err(|_| corrupt("model", &m)))
            .transpose()?,
        provider: row.get("provider"),
        status: JobStatus::parse(&status).ok_or_else(|| corrupt("job status", &status))?,
        attempts: row.get::<i64, _>("attempts") as u32,
        max_attempts: row.get::<i64, _>("max_attempts") as u32,
        claim_token: row.get("claim_token"),
        next_at: from_millis_opt(row.get("next_at"))?,
        started_at: from_millis_opt(row.get("started_at"))?,
        completed_at: from_millis_opt(row.get("completed_at"))?,
        execution_ms: row.get::<Option<i64>, _>("execution_ms").map(|v| v as u64),
        result: parse_json(row.get("result"))?,
        error: row.get("error"),
        metadata: parse_json(row.get("metadata"))?.unwrap_or_else(|| json!({})),
        created_at: from_millis(row.get("created_at"))?,
        updated_at: from_millis(row.get("updated_at"))?,
    })
}
