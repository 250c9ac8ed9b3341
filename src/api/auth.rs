//! Caller identity.
//!
//! Authentication mechanics are outside archforge. The HTTP layer only asks
//! an [`IdentityResolver`] to turn a bearer token into a user id.

use std::collections::HashMap;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};

use super::error::ApiError;
use super::server::ApiState;

pub const INTERNAL_KEY_HEADER: &str = "x-internal-key";

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
}

/// Resolves a bearer token to a caller.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, token: &str) -> Option<CallerIdentity>;
}

/// Fixed token table, loaded from `API_TOKENS`.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, String>,
}

impl StaticTokenResolver {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }
}

impl IdentityResolver for StaticTokenResolver {
    fn resolve(&self, token: &str) -> Option<CallerIdentity> {
        self.tokens.get(token).map(|user_id| CallerIdentity {
            user_id: user_id.clone(),
        })
    }
}

/// Token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

pub fn authenticate(
    headers: &HeaderMap,
    resolver: &dyn IdentityResolver,
) -> Result<CallerIdentity, ApiError> {
    let token = bearer_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("Missing authorization".to_string()))?;
    resolver
        .resolve(token)
        .ok_or_else(|| ApiError::Unauthorized("Invalid token".to_string()))
}

/// Checks the shared secret guarding internal triggers.
///
/// With no key configured the trigger is disabled.
pub fn check_internal_key(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = expected else {
        return Err(ApiError::Forbidden("Internal trigger disabled".to_string()));
    };
    let supplied = headers
        .get(INTERNAL_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    match supplied {
        Some(key) if key == expected => Ok(()),
        _ => Err(ApiError::Unauthorized("Invalid internal key".to_string())),
    }
}

impl FromRequestParts<ApiState> for CallerIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        authenticate(&parts.headers, state.identity.as_ref())
    }
}
