//! Error responses for the HTTP surface.
//!
//! Internal failures are logged and answered with a generic body; every
//! other kind carries enough detail for the caller to act.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::{ProviderError, ValidationError};
use crate::pipeline::PipelineError;
use crate::scheduler::QueueError;
use crate::storage::DatabaseError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Conflict {
        message: String,
        next_at: Option<DateTime<Utc>>,
    },

    /// The upstream provider call did not succeed.
    #[error("{message}")]
    Upstream {
        message: String,
        provider: Option<String>,
        status: Option<u16>,
    },

    /// Detail is logged, never returned.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> Value {
        match self {
            ApiError::Conflict { message, next_at } => json!({
                "error": message,
                "next_at": next_at,
            }),
            ApiError::Upstream {
                message,
                provider,
                status,
            } => json!({
                "error": message,
                "provider": provider,
                "upstream_status": status,
            }),
            ApiError::Internal(_) => json!({ "error": "Internal error" }),
            other => json!({ "error": other.to_string() }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            tracing::error!(error = %detail, "Request failed");
        }
        (self.status(), Json(self.body())).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Validation(v) => v.into(),
            QueueError::JobNotFound(_) => ApiError::NotFound(e.to_string()),
            QueueError::Forbidden(_) => ApiError::Forbidden(e.to_string()),
            QueueError::Conflict { message, next_at } => ApiError::Conflict { message, next_at },
            QueueError::ClaimLost(_) => ApiError::Conflict {
                message: e.to_string(),
                next_at: None,
            },
            QueueError::Database(db) => db.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Validation(v) => v.into(),
            PipelineError::RunNotFound(_) => ApiError::NotFound(e.to_string()),
            PipelineError::Database(db) => db.into(),
            PipelineError::LaneConflict { .. } => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::UnsupportedModel(_) => ApiError::BadRequest(e.to_string()),
            other => ApiError::Upstream {
                message: other.to_string(),
                provider: other.provider().map(str::to_string),
                status: other.status(),
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(e: PathRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (
                QueueError::Validation(ValidationError::InvalidParams).into(),
                StatusCode::BAD_REQUEST,
            ),
            (QueueError::JobNotFound(Uuid::nil()).into(), StatusCode::NOT_FOUND),
            (QueueError::Forbidden(Uuid::nil()).into(), StatusCode::FORBIDDEN),
            (QueueError::ClaimLost(Uuid::nil()).into(), StatusCode::CONFLICT),
            (
                ProviderError::UnsupportedModel("x".into()).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                ProviderError::MissingCredentials {
                    provider: "openai".into(),
                }
                .into(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                DatabaseError::Corrupt("bad row".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(error.status(), status, "{error:?}");
        }
    }

    #[test]
    fn test_internal_body_hides_detail() {
        let error = ApiError::Internal("disk on fire".into());
        assert_eq!(error.body(), json!({"error": "Internal error"}));
    }

    #[test]
    fn test_conflict_body_carries_retry_time() {
        let next_at = Utc::now();
        let error: ApiError = QueueError::Conflict {
            message: "Job is scheduled for retry".into(),
            next_at: Some(next_at),
        }
        .into();
        let body = error.body();
        assert_eq!(body["error"], "Job is scheduled for retry");
        assert!(body["next_at"].is_string());
    }
}
