//! Job definitions for the scheduler.
//!
//! - `Tool`: the allow-listed tool a job invokes
//! - `NewJob`: caller input for enqueue, validated into a `Job`
//! - `Job`: the persisted work item
//! - `JobOutcome`: what an execution attempt produced
//! - `JobView`: the public status projection

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::llm::ModelId;

/// Lowest priority a job can carry.
pub const MIN_PRIORITY: i32 = -100;

/// Highest priority a job can carry.
pub const MAX_PRIORITY: i32 = 100;

/// Priority used when the caller supplies none.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Default maximum number of execution attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Clamps a caller priority into `[MIN_PRIORITY, MAX_PRIORITY]`.
pub fn clamp_priority(priority: i64) -> i32 {
    priority.clamp(MIN_PRIORITY as i64, MAX_PRIORITY as i64) as i32
}

/// Allow-listed tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tool {
    GeminiQuery,
    GptQuery,
    ClaudeQuery,
    MultiModelQuery,
}

impl Tool {
    pub const ALL: [Tool; 4] = [
        Tool::GeminiQuery,
        Tool::GptQuery,
        Tool::ClaudeQuery,
        Tool::MultiModelQuery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::GeminiQuery => "gemini-query",
            Tool::GptQuery => "gpt-query",
            Tool::ClaudeQuery => "claude-query",
            Tool::MultiModelQuery => "multi-model-query",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        Tool::ALL
            .into_iter()
            .find(|t| t.as_str() == value)
            .ok_or_else(|| ValidationError::UnknownTool {
                tool: value.to_string(),
                allowed: Self::allowed_list(),
            })
    }

    /// Comma-separated allow-list, for error messages.
    pub fn allowed_list() -> String {
        Tool::ALL
            .iter()
            .map(Tool::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Model used when neither the job nor its params name one.
    pub fn default_model(&self) -> ModelId {
        match self {
            Tool::GeminiQuery => ModelId::Gemini25Pro,
            Tool::GptQuery | Tool::MultiModelQuery => ModelId::Gpt5,
            Tool::ClaudeQuery => ModelId::Claude45Sonnet,
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        JobStatus::ALL.into_iter().find(|s| s.as_str() == value)
    }

    /// Completed and failed jobs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller input for enqueue. Raw values; validated by [`NewJob::validate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewJob {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(skip)]
    pub owner_id: Option<String>,
}

impl NewJob {
    pub fn new(tool: impl Into<String>, params: Value) -> Self {
        Self {
            tool: tool.into(),
            params,
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Validates the input and builds a fresh `queued` job.
    pub fn validate(self, max_attempts: u32) -> Result<Job, ValidationError> {
        let tool = Tool::parse(self.tool.trim())?;

        if !self.params.is_object() {
            return Err(ValidationError::InvalidParams);
        }

        let model = match self.model.as_deref() {
            Some(m) => Some(
                ModelId::parse(m).map_err(|_| ValidationError::UnsupportedModel(m.to_string()))?,
            ),
            None => None,
        };

        let metadata = match self.metadata {
            Some(Value::Object(map)) => Value::Object(map),
            _ => json!({}),
        };

        let now = Utc::now();
        Ok(Job {
            id: Uuid::new_v4(),
            owner_id: self.owner_id,
            tool,
            params: self.params,
            priority: self
                .priority
                .map(clamp_priority)
                .unwrap_or(DEFAULT_PRIORITY),
            model,
            provider: None,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts,
            claim_token: None,
            next_at: None,
            started_at: None,
            completed_at: None,
            execution_ms: None,
            result: None,
            error: None,
            metadata,
            created_at: now,
            updated_at: now,
        })
    }
}

/// A persisted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub owner_id: Option<String>,
    pub tool: Tool,
    pub params: Value,
    /// Higher runs first; always within `[MIN_PRIORITY, MAX_PRIORITY]`.
    pub priority: i32,
    pub model: Option<ModelId>,
    pub provider: Option<String>,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Proof of the current claim; present only while `processing`.
    #[serde(skip)]
    pub claim_token: Option<String>,
    pub next_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_ms: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Model the executor should use for single-model tools.
    pub fn effective_model(&self) -> ModelId {
        self.model.unwrap_or_else(|| self.tool.default_model())
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id.as_deref() == Some(user_id)
    }

    pub fn view(&self) -> JobView {
        JobView {
            job_id: self.id,
            status: self.status,
            tool: self.tool,
            model: self.model,
            provider: self.provider.clone(),
            priority: self.priority,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            result: self.result.clone(),
            error: self.error.clone(),
            execution_ms: self.execution_ms,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            next_at: self.next_at,
        }
    }
}

/// Public projection of a job returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub tool: Tool,
    pub model: Option<ModelId>,
    pub provider: Option<String>,
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub execution_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_at: Option<DateTime<Utc>>,
}

/// Result of one execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeKind {
    Succeeded(Value),
    Failed {
        error: String,
        /// `false` for input errors that a retry cannot fix.
        retryable: bool,
    },
}

/// What an executor reports back to the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub kind: OutcomeKind,
    pub execution_ms: u64,
    pub provider: Option<String>,
    pub model: Option<ModelId>,
}

impl JobOutcome {
    pub fn success(result: Value, execution_ms: u64) -> Self {
        Self {
            kind: OutcomeKind::Succeeded(result),
            execution_ms,
            provider: None,
            model: None,
        }
    }

    pub fn failure(error: impl Into<String>, execution_ms: u64) -> Self {
        Self {
            kind: OutcomeKind::Failed {
                error: error.into(),
                retryable: true,
            },
            execution_ms,
            provider: None,
            model: None,
        }
    }

    /// A failure that goes straight to `failed` regardless of attempts left.
    pub fn permanent_failure(error: impl Into<String>, execution_ms: u64) -> Self {
        Self {
            kind: OutcomeKind::Failed {
                error: error.into(),
                retryable: false,
            },
            execution_ms,
            provider: None,
            model: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_model(mut self, model: ModelId) -> Self {
        self.model = Some(model);
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.kind, OutcomeKind::Succeeded(_))
    }
}

/// Where a job ended up after `complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Completed,
    Requeued,
    Failed,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Completed => "completed",
            Disposition::Requeued => "requeued",
            Disposition::Failed => "failed",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The job as written by `complete`, plus where it ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReport {
    pub job: Job,
    pub disposition: Disposition,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_priority() {
        assert_eq!(clamp_priority(200), 100);
        assert_eq!(clamp_priority(-1000), -100);
        assert_eq!(clamp_priority(7), 7);
        assert_eq!(clamp_priority(i64::MAX), 100);
    }

    #[test]
    fn test_tool_parse_and_allow_list() {
        assert_eq!(Tool::parse("gpt-query").unwrap(), Tool::GptQuery);
        let err = Tool::parse("shell-exec").unwrap_err();
        assert!(err.to_string().contains("multi-model-query"));
    }

    #[test]
    fn test_validate_builds_queued_job() {
        let job = NewJob::new("claude-query", json!({"input": "hi"}))
            .with_priority(200)
            .with_owner("user-1")
            .validate(DEFAULT_MAX_ATTEMPTS)
            .unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.priority, 100);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.metadata, json!({}));
        assert!(job.is_owned_by("user-1"));
        assert_eq!(job.effective_model(), ModelId::Claude45Sonnet);
    }

    #[test]
    fn test_validate_rejects_non_object_params() {
        for params in [Value::Null, json!([1, 2]), json!("text"), json!(3)] {
            let err = NewJob::new("gpt-query", params).validate(3).unwrap_err();
            assert_eq!(err, ValidationError::InvalidParams);
        }
    }

    #[test]
    fn test_validate_rejects_unknown_model() {
        let err = NewJob::new("gpt-query", json!({}))
            .with_model("gpt-4o")
            .validate(3)
            .unwrap_err();
        assert_eq!(err, ValidationError::UnsupportedModel("gpt-4o".to_string()));
    }

    #[test]
    fn test_status_terminality() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert_eq!(JobStatus::parse("processing"), Some(JobStatus::Processing));
        assert_eq!(JobStatus::parse("done"), None);
    }

    #[test]
    fn test_view_serializes_public_fields() {
        let job = NewJob::new("gemini-query", json!({"input": "x"}))
            .validate(3)
            .unwrap();
        let view = serde_json::to_value(job.view()).unwrap();

        assert_eq!(view["status"], "queued");
        assert_eq!(view["tool"], "gemini-query");
        assert!(view.get("claim_token").is_none());
        assert!(view.get("params").is_none());
    }
}
