//! OpenAI chat-completions binding.
//!
//! Contract: sampling temperature is fixed at 1 and cannot be overridden by
//! callers; the token ceiling is sent as `max_completion_tokens`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::llm::gateway::{Completion, ProviderRequest, TextProvider};
use crate::llm::model::ProviderKind;

/// Default OpenAI API endpoint.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Temperature mandated by the provider for the bound model.
pub const FIXED_TEMPERATURE: f64 = 1.0;

/// Completion token ceiling when the caller does not supply one.
pub const DEFAULT_MAX_COMPLETION_TOKENS: u32 = 4096;

/// OpenAI provider binding.
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(client: Client, api_key: String) -> Self {
        Self::with_base_url(client, api_key, OPENAI_BASE_URL.to_string())
    }

    /// Useful for proxies and local mock servers.
    pub fn with_base_url(client: Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Builds the request body for a chat completion.
pub fn build_payload(request: &ProviderRequest) -> Value {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = &request.system {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": request.input}));

    json!({
        "model": request.model.wire_name(),
        "messages": messages,
        "temperature": FIXED_TEMPERATURE,
        "max_completion_tokens": request
            .sampling
            .max_tokens
            .unwrap_or(DEFAULT_MAX_COMPLETION_TOKENS),
    })
}

/// Pulls `choices[0].message.content`, or an empty string when absent.
pub fn extract_text(raw: &Value) -> String {
    raw.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl TextProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<Completion, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let http = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&build_payload(request));

        let raw = super::send_json(ProviderKind::OpenAi, http).await?;
        Ok(Completion {
            text: extract_text(&raw),
            raw,
            provider: ProviderKind::OpenAi,
            model: request.model,
        })
    }
}
