//! Error types shared across archforge subsystems.
//!
//! Defines the error types that cross module boundaries:
//! - Provider gateway failures (upstream status, credentials, allow-list)
//! - Input validation failures surfaced to callers as client errors
//!
//! Subsystem-local errors (`DatabaseError`, `QueueError`, `PipelineError`,
//! `ConfigError`) live next to the code that raises them.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the provider gateway.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Unsupported model '{0}'. Allowed: GPT-5, Gemini-2.5-Pro, Claude-4.5-Sonnet")]
    UnsupportedModel(String),

    #[error("Missing credentials for provider '{provider}'")]
    MissingCredentials { provider: String },

    #[error("{provider} error: {status} {body}")]
    Upstream {
        provider: String,
        status: u16,
        body: serde_json::Value,
    },

    #[error("{provider} request failed: {message}")]
    Transport { provider: String, message: String },

    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    /// Name of the provider the error originated from, when known.
    pub fn provider(&self) -> Option<&str> {
        match self {
            ProviderError::MissingCredentials { provider }
            | ProviderError::Upstream { provider, .. }
            | ProviderError::Transport { provider, .. } => Some(provider),
            ProviderError::UnsupportedModel(_) | ProviderError::Timeout(_) => None,
        }
    }

    /// HTTP-like status reported by the upstream provider, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors caused by malformed or disallowed caller input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} required")]
    MissingField(&'static str),

    #[error("Invalid tool '{tool}'. Allowed: {allowed}")]
    UnknownTool { tool: String, allowed: String },

    #[error("Unsupported model '{0}'. Allowed: GPT-5, Gemini-2.5-Pro, Claude-4.5-Sonnet")]
    UnsupportedModel(String),

    #[error("Missing or invalid params object")]
    InvalidParams,

    #[error("Missing or invalid '{0}' parameter")]
    InvalidParameter(&'static str),
}
