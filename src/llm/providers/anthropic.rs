//! Anthropic messages binding.
//!
//! Contract: `max_tokens` is always sent; temperature defaults to 0.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::llm::gateway::{Completion, ProviderRequest, TextProvider};
use crate::llm::model::ProviderKind;

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub const DEFAULT_MAX_TOKENS: u32 = 4096;

pub const DEFAULT_TEMPERATURE: f64 = 0.0;

/// Anthropic provider binding.
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(client: Client, api_key: String) -> Self {
        Self::with_base_url(client, api_key, ANTHROPIC_BASE_URL.to_string())
    }

    pub fn with_base_url(client: Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

pub fn build_payload(request: &ProviderRequest) -> Value {
    let mut payload = json!({
        "model": request.model.wire_name(),
        "max_tokens": request.sampling.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": [{"role": "user", "content": request.input}],
        "temperature": request.sampling.temperature.unwrap_or(DEFAULT_TEMPERATURE),
    });
    if let Some(system) = &request.system {
        payload["system"] = json!(system);
    }
    payload
}

/// Concatenates every `content[*].text` block.
pub fn extract_text(raw: &Value) -> String {
    super::join_text_parts(raw.get("content"))
}

#[async_trait]
impl TextProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<Completion, ProviderError> {
        let url = format!("{}/messages", self.base_url);
        let http = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&build_payload(request));

        let raw = super::send_json(ProviderKind::Anthropic, http).await?;
        Ok(Completion {
            text: extract_text(&raw),
            raw,
            provider: ProviderKind::Anthropic,
            model: request.model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::gateway::SamplingParams;
    use crate::llm::model::ModelId;

    #[test]
    fn test_max_tokens_always_present() {
        let payload = build_payload(&ProviderRequest::new(ModelId::Claude45Sonnet, "x"));
        assert_eq!(payload["max_tokens"], json!(DEFAULT_MAX_TOKENS));
        assert_eq!(payload["temperature"], json!(0.0));
        assert!(payload.get("max_completion_tokens").is_none());
        assert!(payload.get("system").is_none());
    }

    #[test]
    fn test_caller_sampling_is_honoured() {
        let request = ProviderRequest::new(ModelId::Claude45Sonnet, "x")
            .with_system("sys")
            .with_sampling(SamplingParams {
                temperature: Some(0.7),
                max_tokens: Some(2000),
                generation_config: None,
            });
        let payload = build_payload(&request);

        assert_eq!(payload["max_tokens"], json!(2000));
        assert_eq!(payload["temperature"], json!(0.7));
        assert_eq!(payload["system"], json!("sys"));
        assert_eq!(payload["model"], json!("claude-4.5-sonnet"));
    }

    #[test]
    fn test_extract_text_joins_blocks() {
        let raw = json!({"content": [{"type": "text", "text": "{\"a\":"}, {"type": "text", "text": "1}"}]});
        assert_eq!(extract_text(&raw), "{\"a\":1}");
        assert_eq!(extract_text(&json!({"type": "error"})), "");
    }
}
