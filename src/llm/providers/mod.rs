//! Provider bindings for the gateway.
//!
//! Each binding owns its provider's parameter contract: which token-limit
//! field it sends, which sampling values it fixes, and where the reply text
//! lives in the response body. Payload construction and text extraction are
//! plain functions so the contracts can be checked without network access.

pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

use serde_json::Value;

use super::model::ProviderKind;
use crate::error::ProviderError;

/// Sends a prepared request and returns the decoded body.
///
/// Non-JSON bodies are kept as a JSON string so callers can still inspect
/// them. A non-success status becomes `ProviderError::Upstream` carrying the
/// body.
pub(crate) async fn send_json(
    provider: ProviderKind,
    request: reqwest::RequestBuilder,
) -> Result<Value, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(provider, e))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| transport_error(provider, e))?;
    let body = decode_body(&text);

    if !status.is_success() {
        return Err(ProviderError::Upstream {
            provider: provider.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    Ok(body)
}

/// Request URLs are stripped from the message; they can carry credentials.
fn transport_error(provider: ProviderKind, e: reqwest::Error) -> ProviderError {
    ProviderError::Transport {
        provider: provider.to_string(),
        message: e.without_url().to_string(),
    }
}

/// Parses a response body, falling back to a JSON string for non-JSON text.
pub(crate) fn decode_body(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Concatenates `text` fields of an array of parts, skipping anything else.
pub(crate) fn join_text_parts(parts: Option<&Value>) -> String {
    parts
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}
