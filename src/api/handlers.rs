//! Request handlers.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::auth::{check_internal_key, CallerIdentity};
use super::error::ApiError;
use super::server::ApiState;
use crate::error::ValidationError;
use crate::llm::{
    choose_model, flatten_conversation, ChatMessage, Completion, ModelId, ProviderKind,
    ProviderRequest, SamplingParams,
};
use crate::pipeline::RunReport;
use crate::scheduler::{DispatchReport, ExecutionReport, JobStatus, JobView, NewJob, Tool};
use crate::storage::{NewRun, RunSnapshot};

#[derive(Debug, Deserialize)]
pub struct SubmitRunRequest {
    #[serde(default)]
    pub vision: String,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub wizard_data: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub job_id: Uuid,
    pub tool: Tool,
    pub status: JobStatus,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub job_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct DirectDispatchRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub hint_model: Option<String>,
}

/// Reply for direct and routed model calls.
#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub success: bool,
    pub model: ModelId,
    pub provider: ProviderKind,
    pub output_text: String,
    pub raw: Value,
}

impl From<Completion> for CompletionResponse {
    fn from(c: Completion) -> Self {
        Self {
            success: true,
            model: c.model,
            provider: c.provider,
            output_text: c.text,
            raw: c.raw,
        }
    }
}

pub async fn health(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    state.db.ping().await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// Runs the whole pipeline before answering.
pub async fn submit_run(
    State(state): State<ApiState>,
    payload: Result<Json<SubmitRunRequest>, JsonRejection>,
) -> Result<Json<RunReport>, ApiError> {
    let Json(request) = payload?;

    let mut new_run = NewRun::new(request.vision);
    if let Some(model) = request.default_model.as_deref() {
        let model = ModelId::parse(model)
            .map_err(|_| ValidationError::UnsupportedModel(model.to_string()))?;
        new_run = new_run.with_default_model(model);
    }
    new_run.project_name = request.project_name;
    new_run.wizard_data = request.wizard_data;

    Ok(Json(state.runner.start_run(new_run).await?))
}

pub async fn get_run(
    State(state): State<ApiState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<RunSnapshot>, ApiError> {
    let Path(run_id) = id?;
    Ok(Json(state.runner.get_run(run_id).await?))
}

pub async fn enqueue_job(
    State(state): State<ApiState>,
    caller: CallerIdentity,
    payload: Result<Json<NewJob>, JsonRejection>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let Json(new_job) = payload?;
    let job = state
        .queue()
        .enqueue(new_job.with_owner(caller.user_id))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(EnqueueResponse {
            job_id: job.id,
            tool: job.tool,
            status: job.status,
            priority: job.priority,
            created_at: job.created_at,
        }),
    ))
}

pub async fn execute_job(
    State(state): State<ApiState>,
    caller: CallerIdentity,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<ExecutionReport>, ApiError> {
    let Json(request) = payload?;
    let report = state
        .executor
        .claim_and_execute(request.job_id, Some(&caller.user_id))
        .await?;
    Ok(Json(report))
}

pub async fn get_job(
    State(state): State<ApiState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<JobView>, ApiError> {
    let Path(job_id) = id?;
    let job = state.queue().get_for(job_id, &caller.user_id).await?;
    Ok(Json(job.view()))
}

pub async fn dispatch(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<DispatchReport>, ApiError> {
    check_internal_key(&headers, state.internal_key.as_deref())?;
    Ok(Json(state.dispatcher.dispatch_once().await?))
}

pub async fn ai_dispatch(
    State(state): State<ApiState>,
    payload: Result<Json<DirectDispatchRequest>, JsonRejection>,
) -> Result<Json<CompletionResponse>, ApiError> {
    let Json(request) = payload?;
    let model = ModelId::parse(&request.model)?;
    if request.input.trim().is_empty() {
        return Err(ValidationError::MissingField("input").into());
    }

    let sampling = SamplingParams {
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        generation_config: None,
    };
    let completion = state
        .gateway
        .invoke(
            ProviderRequest::new(model, request.input)
                .with_optional_system(request.system)
                .with_sampling(sampling)
                .with_origin("ai-dispatch"),
        )
        .await?;
    Ok(Json(completion.into()))
}

pub async fn llm_route(
    State(state): State<ApiState>,
    payload: Result<Json<RouteRequest>, JsonRejection>,
) -> Result<Json<CompletionResponse>, ApiError> {
    let Json(request) = payload?;
    if request.messages.is_empty() {
        return Err(ValidationError::MissingField("messages").into());
    }

    let model = choose_model(&request.messages, request.hint_model.as_deref());
    let (system, input) = flatten_conversation(&request.messages);
    tracing::info!(model = %model, messages = request.messages.len(), "Routing chat");

    let completion = state
        .gateway
        .invoke(
            ProviderRequest::new(model, input)
                .with_optional_system(system)
                .with_origin("llm-route"),
        )
        .await?;
    Ok(Json(completion.into()))
}
