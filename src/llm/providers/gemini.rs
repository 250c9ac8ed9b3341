//! Gemini generateContent binding.
//!
//! Contract: sampling travels in a free-form `generationConfig` object. The
//! caller's object is passed through; explicit temperature and token ceiling
//! are folded in only when the object does not already set them.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Map, Value};

use crate::error::ProviderError;
use crate::llm::gateway::{Completion, ProviderRequest, TextProvider};
use crate::llm::model::ProviderKind;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// The key travels in a header so it never appears in a request URL.
pub const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini provider binding.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(client: Client, api_key: String) -> Self {
        Self::with_base_url(client, api_key, GEMINI_BASE_URL.to_string())
    }

    pub fn with_base_url(client: Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl GeminiProvider {
    fn prepare(&self, request: &ProviderRequest) -> RequestBuilder {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url,
            request.model.wire_name()
        );
        self.client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&build_payload(request))
    }
}

/// Merges caller sampling into a generation config, or `None` if empty.
pub fn generation_config(request: &ProviderRequest) -> Option<Value> {
    let mut config = match &request.sampling.generation_config {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    if let Some(temperature) = request.sampling.temperature {
        config
            .entry("temperature")
            .or_insert_with(|| json!(temperature));
    }
    if let Some(max_tokens) = request.sampling.max_tokens {
        config
            .entry("maxOutputTokens")
            .or_insert_with(|| json!(max_tokens));
    }

    if config.is_empty() {
        None
    } else {
        Some(Value::Object(config))
    }
}

pub fn build_payload(request: &ProviderRequest) -> Value {
    let mut parts = Vec::with_capacity(2);
    if let Some(system) = &request.system {
        parts.push(json!({"text": system}));
    }
    parts.push(json!({"text": request.input}));

    let mut payload = json!({"contents": [{"role": "user", "parts": parts}]});
    if let Some(config) = generation_config(request) {
        payload["generationConfig"] = config;
    }
    payload
}

/// Concatenates `candidates[0].content.parts[*].text`.
pub fn extract_text(raw: &Value) -> String {
    super::join_text_parts(raw.pointer("/candidates/0/content/parts"))
}

#[async_trait]
impl TextProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<Completion, ProviderError> {
        let raw = super::send_json(ProviderKind::Gemini, self.prepare(request)).await?;
        Ok(Completion {
            text: extract_text(&raw),
            raw,
            provider: ProviderKind::Gemini,
            model: request.model,
        })
    }
}
