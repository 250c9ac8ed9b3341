//! Tool execution for claimed jobs.
//!
//! Each tool call runs under the per-tool deadline from [`ToolSettings`].
//! When the deadline passes, the local wait is abandoned and the attempt is
//! recorded as a retryable failure. The remote call is not guaranteed to
//! stop.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::job::{Job, JobOutcome, Tool};
use super::queue::{JobQueue, QueueError};
use crate::config::ToolSettings;
use crate::error::{ProviderError, ValidationError};
use crate::llm::{Completion, ModelId, ProviderGateway, ProviderRequest, SamplingParams};
use crate::metrics::MetricsCollector;

/// Caller-facing summary of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub job_id: Uuid,
    /// `completed`, `failed` or `requeued`.
    pub status: String,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_at: Option<DateTime<Utc>>,
}

/// Parameters shared by the query tools.
#[derive(Debug, Clone, PartialEq)]
struct QueryParams {
    input: String,
    system: Option<String>,
    sampling: SamplingParams,
}

impl QueryParams {
    fn from_value(params: &Value) -> Result<Self, ValidationError> {
        let input = match params.get("input") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(Value::String(_)) | None | Some(Value::Null) => {
                return Err(ValidationError::MissingField("input"))
            }
            Some(_) => return Err(ValidationError::InvalidParameter("input")),
        };

        let system = params
            .get("system")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut sampling = SamplingParams::new();
        if let Some(t) = params.get("temperature").and_then(Value::as_f64) {
            sampling = sampling.with_temperature(t);
        }
        if let Some(n) = params.get("max_tokens").and_then(Value::as_u64) {
            sampling = sampling.with_max_tokens(n.min(u32::MAX as u64) as u32);
        }
        if let Some(config) = params.get("generation_config").filter(|v| v.is_object()) {
            sampling.generation_config = Some(config.clone());
        }

        Ok(Self {
            input,
            system,
            sampling,
        })
    }

    fn request(&self, model: ModelId, tool: Tool) -> ProviderRequest {
        ProviderRequest::new(model, self.input.clone())
            .with_optional_system(self.system.clone())
            .with_sampling(self.sampling.clone())
            .with_origin(format!("job:{}", tool))
    }
}

/// Runs claimed jobs and writes their outcome back to the queue.
#[derive(Clone)]
pub struct JobExecutor {
    queue: JobQueue,
    gateway: ProviderGateway,
    tools: ToolSettings,
    metrics: MetricsCollector,
}

impl JobExecutor {
    pub fn new(queue: JobQueue, gateway: ProviderGateway, tools: ToolSettings) -> Self {
        Self {
            queue,
            gateway,
            tools,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    /// Claims a specific job on behalf of `owner`, then executes it.
    pub async fn claim_and_execute(
        &self,
        job_id: Uuid,
        owner: Option<&str>,
    ) -> Result<ExecutionReport, QueueError> {
        let job = self.queue.claim(job_id, owner).await?;
        self.execute(job).await
    }

    /// Executes a job already claimed by this worker.
    pub async fn execute(&self, job: Job) -> Result<ExecutionReport, QueueError> {
        self.metrics.job_started();
        let outcome = self.run_tool(&job).await;
        self.metrics.job_finished();

        let report = self.queue.complete(&job, outcome).await?;
        let written = report.job;
        Ok(ExecutionReport {
            job_id: written.id,
            status: report.disposition.as_str().to_string(),
            attempts: written.attempts,
            max_attempts: written.max_attempts,
            result: written.result,
            error: written.error,
            execution_ms: written.execution_ms,
            next_at: written.next_at,
        })
    }

    /// Runs the job's tool under its deadline and classifies the result.
    pub async fn run_tool(&self, job: &Job) -> JobOutcome {
        let started = Instant::now();
        let setting = self.tools.get(job.tool);
        let model = job.model.unwrap_or(setting.default_model);

        let params = match QueryParams::from_value(&job.params) {
            Ok(params) => params,
            Err(e) => {
                return JobOutcome::permanent_failure(e.to_string(), elapsed_ms(started))
                    .with_model(model)
            }
        };

        let deadline = setting.timeout;
        tracing::debug!(job_id = %job.id, tool = %job.tool, model = %model, "Executing tool");

        match job.tool {
            Tool::MultiModelQuery => {
                let models = requested_models(&job.params, model);
                let entries = match tokio::time::timeout(
                    deadline,
                    self.fan_out(&params, &models, job.tool),
                )
                .await
                {
                    Ok(entries) => entries,
                    Err(_) => {
                        return timed_out(deadline, started).with_model(model);
                    }
                };
                JobOutcome::success(json!({ "results": entries }), elapsed_ms(started))
                    .with_model(model)
            }
            tool => {
                let call = self.gateway.invoke(params.request(model, tool));
                match tokio::time::timeout(deadline, call).await {
                    Ok(Ok(completion)) => {
                        let provider = completion.provider.as_str();
                        JobOutcome::success(
                            json!({
                                "output": completion.text,
                                "provider": provider,
                                "model": completion.model,
                            }),
                            elapsed_ms(started),
                        )
                        .with_provider(provider)
                        .with_model(completion.model)
                    }
                    Ok(Err(e)) => JobOutcome::failure(e.to_string(), elapsed_ms(started))
                        .with_provider(model.provider().as_str())
                        .with_model(model),
                    Err(_) => timed_out(deadline, started)
                        .with_provider(model.provider().as_str())
                        .with_model(model),
                }
            }
        }
    }

    /// Calls every model concurrently; one failure does not affect the rest.
    async fn fan_out(&self, params: &QueryParams, models: &[String], tool: Tool) -> Vec<Value> {
        let calls = models.iter().map(|name| async move {
            let model = match ModelId::parse(name) {
                Ok(model) => model,
                Err(e) => return (name.clone(), Err(e)),
            };
            let result = self.gateway.invoke(params.request(model, tool)).await;
            (name.clone(), result)
        });

        join_all(calls)
            .await
            .into_iter()
            .map(|(name, result)| fan_out_entry(&name, result))
            .collect()
    }
}

fn fan_out_entry(name: &str, result: Result<Completion, ProviderError>) -> Value {
    match result {
        Ok(completion) => json!({
            "model": completion.model,
            "provider": completion.provider.as_str(),
            "output": completion.text,
            "success": true,
        }),
        Err(e) => json!({
            "model": name,
            "error": e.to_string(),
            "success": false,
        }),
    }
}

/// `params.models`, or the job's own model when absent or empty.
fn requested_models(params: &Value, fallback: ModelId) -> Vec<String> {
    let models: Vec<String> = params
        .get("models")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if models.is_empty() {
        vec![fallback.as_str().to_string()]
    } else {
        models
    }
}

fn timed_out(deadline: Duration, started: Instant) -> JobOutcome {
    JobOutcome::failure(ProviderError::Timeout(deadline).to_string(), elapsed_ms(started))
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::llm::{ProviderKind, TextProvider};
    use crate::scheduler::job::{JobStatus, NewJob, OutcomeKind};
    use crate::storage::Database;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Scripted {
        kind: ProviderKind,
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl TextProvider for Scripted {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn complete(&self, request: &ProviderRequest) -> Result<Completion, ProviderError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ProviderError::Upstream {
                    provider: self.kind.to_string(),
                    status: 500,
                    body: json!({"error": "boom"}),
                });
            }
            Ok(Completion {
                text: format!("{} says {}", self.kind, request.input),
                raw: json!({}),
                provider: self.kind,
                model: request.model,
            })
        }
    }

    fn provider(kind: ProviderKind, fail: bool) -> Arc<dyn TextProvider> {
        Arc::new(Scripted {
            kind,
            fail,
            delay: Duration::ZERO,
        })
    }

    async fn executor(gateway: ProviderGateway, tools: ToolSettings) -> JobExecutor {
        let db = Database::in_memory().await.unwrap();
        let queue = JobQueue::new(&db, &AppConfig::default());
        JobExecutor::new(queue, gateway, tools)
    }

    #[test]
    fn test_query_params_require_input() {
        assert_eq!(
            QueryParams::from_value(&json!({})).unwrap_err(),
            ValidationError::MissingField("input")
        );
        assert_eq!(
            QueryParams::from_value(&json!({"input": 4})).unwrap_err(),
            ValidationError::InvalidParameter("input")
        );

        let params =
            QueryParams::from_value(&json!({"input": "x", "temperature": 0.3, "max_tokens": 10}))
                .unwrap();
        assert_eq!(params.sampling.temperature, Some(0.3));
        assert_eq!(params.sampling.max_tokens, Some(10));
    }

    #[test]
    fn test_requested_models_fallback() {
        assert_eq!(requested_models(&json!({}), ModelId::Gpt5), vec!["GPT-5"]);
        assert_eq!(
            requested_models(&json!({"models": ["Claude-4.5-Sonnet", 3]}), ModelId::Gpt5),
            vec!["Claude-4.5-Sonnet"]
        );
    }

    #[tokio::test]
    async fn test_single_model_job_completes() {
        let gateway = ProviderGateway::new().with_provider(provider(ProviderKind::Anthropic, false));
        let executor = executor(gateway, ToolSettings::default()).await;

        executor
            .queue()
            .enqueue(NewJob::new("claude-query", json!({"input": "hi"})))
            .await
            .unwrap();
        let job = executor.queue().claim_next().await.unwrap().unwrap();
        let report = executor.execute(job).await.unwrap();

        assert_eq!(report.status, "completed");
        assert_eq!(report.attempts, 1);
        let result = report.result.unwrap();
        assert_eq!(result["output"], "anthropic says hi");
        assert_eq!(result["provider"], "anthropic");
        assert_eq!(result["model"], "Claude-4.5-Sonnet");
    }

    #[tokio::test]
    async fn test_missing_input_fails_without_retry() {
        let executor = executor(ProviderGateway::new(), ToolSettings::default()).await;
        executor
            .queue()
            .enqueue(NewJob::new("gpt-query", json!({"system": "x"})))
            .await
            .unwrap();
        let job = executor.queue().claim_next().await.unwrap().unwrap();
        let report = executor.execute(job).await.unwrap();

        assert_eq!(report.status, "failed");
        assert_eq!(report.error.as_deref(), Some("input required"));
        assert!(report.next_at.is_none());
    }

    #[tokio::test]
    async fn test_provider_error_requeues() {
        let gateway = ProviderGateway::new().with_provider(provider(ProviderKind::OpenAi, true));
        let executor = executor(gateway, ToolSettings::default()).await;
        executor
            .queue()
            .enqueue(NewJob::new("gpt-query", json!({"input": "hi"})))
            .await
            .unwrap();
        let job = executor.queue().claim_next().await.unwrap().unwrap();
        let report = executor.execute(job).await.unwrap();

        assert_eq!(report.status, "requeued");
        assert!(report.next_at.unwrap() > Utc::now());
        assert!(report.error.unwrap().contains("500"));
    }

    #[tokio::test]
    async fn test_timeout_is_retryable_failure() {
        let slow = Arc::new(Scripted {
            kind: ProviderKind::Gemini,
            fail: false,
            delay: Duration::from_millis(200),
        });
        let mut tools = ToolSettings::default();
        tools.set_timeout(Tool::GeminiQuery, Duration::from_millis(20));
        let executor = executor(ProviderGateway::new().with_provider(slow), tools).await;

        executor
            .queue()
            .enqueue(NewJob::new("gemini-query", json!({"input": "hi"})))
            .await
            .unwrap();
        let job = executor.queue().claim_next().await.unwrap().unwrap();
        let outcome = executor.run_tool(&job).await;

        match outcome.kind {
            OutcomeKind::Failed { error, retryable } => {
                assert!(retryable);
                assert!(error.contains("timed out"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_multi_model_collects_independent_outcomes() {
        let gateway = ProviderGateway::new()
            .with_provider(provider(ProviderKind::OpenAi, false))
            .with_provider(provider(ProviderKind::Anthropic, true));
        let executor = executor(gateway, ToolSettings::default()).await;

        executor
            .queue()
            .enqueue(NewJob::new(
                "multi-model-query",
                json!({
                    "input": "compare",
                    "models": ["GPT-5", "Claude-4.5-Sonnet", "Gemini-2.5-Pro", "llama"]
                }),
            ))
            .await
            .unwrap();
        let job = executor.queue().claim_next().await.unwrap().unwrap();
        let report = executor.execute(job).await.unwrap();

        assert_eq!(report.status, "completed");
        let result = report.result.unwrap();
        let entries = result["results"].as_array().unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0]["success"], true);
        assert_eq!(entries[0]["output"], "openai says compare");
        assert_eq!(entries[1]["success"], false);
        assert_eq!(entries[2]["success"], false);
        assert!(entries[2]["error"].as_str().unwrap().contains("google"));
        assert_eq!(entries[3]["model"], "llama");
        assert_eq!(entries[3]["success"], false);

        let stored = executor.queue().get(report.job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
    }
}
