//! Cross-origin headers for every response.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{self, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

pub const ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type, x-internal-key";
pub const ALLOW_METHODS: &str = "GET, POST, OPTIONS";

/// Origin to echo back.
///
/// A listed origin is echoed. Anything else gets the first configured
/// origin, or `*` when none are configured.
pub fn cors_allow_origin(origin: Option<&str>, allowed: &[String]) -> String {
    match origin {
        Some(origin) if allowed.iter().any(|a| a == origin) => origin.to_string(),
        _ => allowed
            .first()
            .cloned()
            .unwrap_or_else(|| "*".to_string()),
    }
}

/// Middleware adding CORS headers; answers preflight with 204.
pub async fn cors(State(allowed): State<Arc<Vec<String>>>, req: Request, next: Next) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut response = if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    let allow_origin = cors_allow_origin(origin.as_deref(), &allowed);
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&allow_origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    response
}
