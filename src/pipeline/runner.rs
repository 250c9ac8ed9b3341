//! Sequential, fail-fast lane runner.
//!
//! A run is executed to completion inside the caller's task. Lanes run one
//! at a time in [`LANE_ORDER`]; the first lane failure marks the run failed
//! and leaves every later lane `queued`. Lane state is always written before
//! run state.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use super::lane::{Lane, LANE_MAX_TOKENS, LANE_ORDER, LANE_TEMPERATURE};
use crate::error::ValidationError;
use crate::llm::{ModelId, ProviderGateway, ProviderRequest, SamplingParams};
use crate::metrics::MetricsCollector;
use crate::storage::{
    Database, DatabaseError, LaneStatus, NewRun, RunSnapshot, RunStatus, RunStore,
};

/// Errors that can occur while starting or reading a run.
///
/// Provider failures are not errors here; they fail the lane and the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Run {0} not found")]
    RunNotFound(Uuid),

    /// A lane record was not in the state this runner left it in.
    #[error("Lane {lane} of run {run_id} changed underneath the runner")]
    LaneConflict { run_id: Uuid, lane: Lane },
}

/// Final state of a run as seen by the caller that started it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_lane: Option<Lane>,
}

#[derive(Clone)]
pub struct LaneRunner {
    runs: RunStore,
    gateway: ProviderGateway,
    metrics: MetricsCollector,
}

impl LaneRunner {
    pub fn new(runs: RunStore, gateway: ProviderGateway) -> Self {
        Self {
            runs,
            gateway,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn from_database(db: &Database, gateway: ProviderGateway) -> Self {
        Self::new(RunStore::new(db), gateway)
    }

    pub fn runs(&self) -> &RunStore {
        &self.runs
    }

    /// Creates the run and drives all five lanes.
    ///
    /// A storage error mid-lane fails that lane and the run before it is
    /// returned, so no record is left `running`.
    pub async fn start_run(&self, mut new_run: NewRun) -> Result<RunReport, PipelineError> {
        let vision = new_run.vision.trim();
        if vision.is_empty() {
            return Err(ValidationError::MissingField("vision").into());
        }
        new_run.vision = vision.to_string();

        let snapshot = self.runs.create(&new_run).await?;
        let run_id = snapshot.run.id;
        tracing::info!(run_id = %run_id, default_model = ?new_run.default_model, "Run started");

        for lane in LANE_ORDER {
            match self.run_lane(run_id, lane, &new_run).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    self.runs.finish_run(run_id, RunStatus::Failed).await?;
                    self.metrics.record_run(RunStatus::Failed.as_str());
                    tracing::warn!(run_id = %run_id, lane = %lane, error = %error, "Run failed");
                    return Ok(RunReport {
                        run_id,
                        status: RunStatus::Failed,
                        failed_lane: Some(lane),
                    });
                }
                Err(e) => {
                    self.abandon(run_id, lane, lane.model_for(new_run.default_model), &e)
                        .await;
                    return Err(e);
                }
            }
        }

        self.runs.finish_run(run_id, RunStatus::Succeeded).await?;
        self.metrics.record_run(RunStatus::Succeeded.as_str());
        Ok(RunReport {
            run_id,
            status: RunStatus::Succeeded,
            failed_lane: None,
        })
    }

    /// Best-effort: fails the interrupted lane, then the run.
    async fn abandon(&self, run_id: Uuid, lane: Lane, model: ModelId, cause: &PipelineError) {
        tracing::error!(run_id = %run_id, lane = %lane, error = %cause, "Run interrupted");

        let meta = json!({ "model": model, "error": cause.to_string() });
        if let Err(e) = self.runs.abort_lane(run_id, lane, &meta).await {
            tracing::error!(run_id = %run_id, lane = %lane, error = %e, "Failed to mark lane failed");
        }
        match self.runs.finish_run(run_id, RunStatus::Failed).await {
            Ok(true) => self.metrics.record_run(RunStatus::Failed.as_str()),
            Ok(false) => {}
            Err(e) => tracing::error!(run_id = %run_id, error = %e, "Failed to mark run failed"),
        }
    }

    /// Runs one lane. The inner `Err` carries the provider error text.
    async fn run_lane(
        &self,
        run_id: Uuid,
        lane: Lane,
        new_run: &NewRun,
    ) -> Result<Result<(), String>, PipelineError> {
        let model = lane.model_for(new_run.default_model);
        if !self
            .runs
            .start_lane(run_id, lane, &json!({ "model": model }))
            .await?
        {
            return Err(PipelineError::LaneConflict { run_id, lane });
        }
        tracing::info!(run_id = %run_id, lane = %lane, model = %model, "Lane running");

        let request = lane_request(lane, model, &new_run.vision);
        match self.gateway.invoke(request).await {
            Ok(completion) => {
                let output = parse_artifact(&completion.text);
                let meta = json!({
                    "model": completion.model,
                    "provider": completion.provider.as_str(),
                });
                if !self
                    .runs
                    .finish_lane(run_id, lane, LaneStatus::Succeeded, Some(&output), &meta)
                    .await?
                {
                    return Err(PipelineError::LaneConflict { run_id, lane });
                }
                self.metrics.record_lane(lane.as_str(), LaneStatus::Succeeded.as_str());
                tracing::info!(run_id = %run_id, lane = %lane, "Lane succeeded");
                Ok(Ok(()))
            }
            Err(e) => {
                let error = e.to_string();
                let meta = json!({ "model": model, "error": error });
                if !self
                    .runs
                    .finish_lane(run_id, lane, LaneStatus::Failed, None, &meta)
                    .await?
                {
                    return Err(PipelineError::LaneConflict { run_id, lane });
                }
                self.metrics.record_lane(lane.as_str(), LaneStatus::Failed.as_str());
                Ok(Err(error))
            }
        }
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<RunSnapshot, PipelineError> {
        self.runs
            .get(run_id)
            .await?
            .ok_or(PipelineError::RunNotFound(run_id))
    }
}

fn lane_request(lane: Lane, model: ModelId, vision: &str) -> ProviderRequest {
    let sampling = SamplingParams::new()
        .with_temperature(LANE_TEMPERATURE)
        .with_max_tokens(LANE_MAX_TOKENS);
    ProviderRequest::new(model, lane.user_prompt(vision))
        .with_system(lane.system_prompt())
        .with_sampling(sampling)
        .with_origin(format!("lane:{}", lane))
}

/// Parses a lane reply as JSON, falling back to `{"text": ...}`.
///
/// Models often wrap JSON in a fenced code block; the fence is stripped
/// before parsing.
pub fn parse_artifact(text: &str) -> Value {
    let trimmed = strip_code_fence(text.trim());
    serde_json::from_str(trimmed).unwrap_or_else(|_| json!({ "text": text }))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return text;
    };
    // Drop the info string ("json") on the opening line.
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::llm::{Completion, ProviderKind, TextProvider};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        kind: ProviderKind,
        seen: Arc<Mutex<Vec<ProviderRequest>>>,
    }

    #[async_trait]
    impl TextProvider for Recorder {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn complete(&self, request: &ProviderRequest) -> Result<Completion, ProviderError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(Completion {
                text: "{\"ok\": true}".to_string(),
                raw: json!({}),
                provider: self.kind,
                model: request.model,
            })
        }
    }

    #[test]
    fn test_parse_artifact() {
        assert_eq!(parse_artifact("{\"a\": 1}"), json!({"a": 1}));
        assert_eq!(parse_artifact("```json\n{\"a\": 1}\n```"), json!({"a": 1}));
        assert_eq!(parse_artifact("not json"), json!({"text": "not json"}));
        assert_eq!(parse_artifact(""), json!({"text": ""}));
    }

    #[test]
    fn test_lane_request_shape() {
        let request = lane_request(Lane::Sql, ModelId::Gpt5, "todo app");
        assert_eq!(request.origin, "lane:sql");
        assert_eq!(request.sampling.temperature, Some(0.0));
        assert_eq!(request.sampling.max_tokens, Some(2000));
        assert!(request.input.contains("todo app"));
        assert!(request.system.is_some());
    }

    #[tokio::test]
    async fn test_empty_vision_is_rejected_before_any_write() {
        let db = Database::in_memory().await.unwrap();
        let runner = LaneRunner::from_database(&db, ProviderGateway::new());

        let err = runner.start_run(NewRun::new("   ")).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::MissingField("vision"))
        ));
    }

    #[tokio::test]
    async fn test_default_model_applies_to_every_lane() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gateway = ProviderGateway::new().with_provider(Arc::new(Recorder {
            kind: ProviderKind::OpenAi,
            seen: seen.clone(),
        }));
        let db = Database::in_memory().await.unwrap();
        let runner = LaneRunner::from_database(&db, gateway);

        let report = runner
            .start_run(NewRun::new("Build a todo app").with_default_model(ModelId::Gpt5))
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Succeeded);

        let seen = seen.lock().unwrap();
        let origins: Vec<_> = seen.iter().map(|r| r.origin.as_str()).collect();
        assert_eq!(
            origins,
            vec!["lane:spec", "lane:sql", "lane:ui", "lane:test", "lane:cicd"]
        );
        assert!(seen.iter().all(|r| r.model == ModelId::Gpt5));
    }

    fn recording_gateway() -> ProviderGateway {
        let seen = Arc::new(Mutex::new(Vec::new()));
        ProviderKind::ALL
            .into_iter()
            .fold(ProviderGateway::new(), |gateway, kind| {
                gateway.with_provider(Arc::new(Recorder {
                    kind,
                    seen: seen.clone(),
                }))
            })
    }

    #[tokio::test]
    async fn test_vision_is_stored_trimmed() {
        let db = Database::in_memory().await.unwrap();
        let runner = LaneRunner::from_database(&db, recording_gateway());

        let report = runner
            .start_run(NewRun::new("  Build a todo app \n"))
            .await
            .unwrap();
        let snapshot = runner.get_run(report.run_id).await.unwrap();
        assert_eq!(snapshot.run.vision, "Build a todo app");
    }

    #[tokio::test]
    async fn test_storage_error_fails_lane_and_run() {
        let db = Database::in_memory().await.unwrap();
        sqlx::query(
            r#"
            CREATE TRIGGER reject_sql_success BEFORE UPDATE OF status ON lanes
            WHEN NEW.lane = 'sql' AND NEW.status = 'succeeded'
            BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END
            "#,
        )
        .execute(db.pool())
        .await
        .unwrap();
        let runner = LaneRunner::from_database(&db, recording_gateway());
        let mut events = runner.runs().subscribe();

        let err = runner.start_run(NewRun::new("Inventory")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Database(_)), "{err}");

        let mut run_id = None;
        while let Ok(event) = events.try_recv() {
            run_id = Some(event.run_id);
        }
        let snapshot = runner.get_run(run_id.unwrap()).await.unwrap();
        assert_eq!(snapshot.run.status, RunStatus::Failed);

        let status = |lane| snapshot.lane(lane).unwrap().status;
        assert_eq!(status(Lane::Spec), LaneStatus::Succeeded);
        assert_eq!(status(Lane::Sql), LaneStatus::Failed);
        assert_eq!(status(Lane::Ui), LaneStatus::Queued);

        let sql = snapshot.lane(Lane::Sql).unwrap();
        assert!(sql.output.is_none());
        assert!(sql.meta["error"].as_str().unwrap().contains("disk I/O error"));
        assert_eq!(sql.meta["model"], "GPT-5");
    }

    #[tokio::test]
    async fn test_lane_moved_elsewhere_still_leaves_a_failed_lane() {
        let db = Database::in_memory().await.unwrap();
        // Another writer starts the sql lane as soon as spec succeeds.
        sqlx::query(
            r#"
            CREATE TRIGGER steal_sql AFTER UPDATE OF status ON lanes
            WHEN NEW.lane = 'spec' AND NEW.status = 'succeeded'
            BEGIN
                UPDATE lanes SET status = 'running'
                WHERE run_id = NEW.run_id AND lane = 'sql';
            END
            "#,
        )
        .execute(db.pool())
        .await
        .unwrap();
        let runner = LaneRunner::from_database(&db, recording_gateway());
        let mut events = runner.runs().subscribe();

        let err = runner.start_run(NewRun::new("Inventory")).await.unwrap_err();
        assert!(
            matches!(err, PipelineError::LaneConflict { lane: Lane::Sql, .. }),
            "{err}"
        );

        let mut run_id = None;
        while let Ok(event) = events.try_recv() {
            run_id = Some(event.run_id);
        }
        let snapshot = runner.get_run(run_id.unwrap()).await.unwrap();
        assert_eq!(snapshot.run.status, RunStatus::Failed);
        assert_eq!(snapshot.lane(Lane::Sql).unwrap().status, LaneStatus::Failed);
        assert_eq!(
            snapshot
                .lanes
                .iter()
                .filter(|l| l.status == LaneStatus::Failed)
                .count(),
            1
        );
        assert_eq!(snapshot.lane(Lane::Ui).unwrap().status, LaneStatus::Queued);
    }

    #[tokio::test]
    async fn test_get_unknown_run() {
        let db = Database::in_memory().await.unwrap();
        let runner = LaneRunner::from_database(&db, ProviderGateway::new());
        assert!(matches!(
            runner.get_run(Uuid::new_v4()).await.unwrap_err(),
            PipelineError::RunNotFound(_)
        ));
    }
}
