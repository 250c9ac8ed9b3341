//! Uniform call interface over the three provider bindings.
//!
//! The gateway resolves a model identifier to its single provider binding,
//! delegates the call, records metrics, and emits a call note. It performs
//! no persistence of its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::call_log::{CallLog, CallNote, TracingCallLog};
use super::model::{ModelId, ProviderKind};
use super::providers::{AnthropicProvider, GeminiProvider, OpenAiProvider};
use crate::config::{AppConfig, ConfigError};
use crate::error::ProviderError;
use crate::metrics::MetricsCollector;

/// Caller-supplied sampling values.
///
/// Each binding decides which of these it honours; see the provider modules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Free-form generation config, forwarded only to Gemini.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<Value>,
}

impl SamplingParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A single provider invocation.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: ModelId,
    pub input: String,
    pub system: Option<String>,
    pub sampling: SamplingParams,
    /// Which subsystem issued the call; recorded as the routing policy.
    pub origin: String,
}

impl ProviderRequest {
    pub fn new(model: ModelId, input: impl Into<String>) -> Self {
        Self {
            model,
            input: input.into(),
            system: None,
            sampling: SamplingParams::default(),
            origin: "direct".to_string(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_optional_system(mut self, system: Option<String>) -> Self {
        self.system = system;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }
}

/// Normalized provider reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    /// Extracted reply text; empty when the provider omitted it.
    pub text: String,
    /// Provider response body as received.
    pub raw: Value,
    pub provider: ProviderKind,
    pub model: ModelId,
}

/// A provider binding.
#[async_trait]
pub trait TextProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn complete(&self, request: &ProviderRequest) -> Result<Completion, ProviderError>;
}

/// Routes model calls to provider bindings.
#[derive(Clone)]
pub struct ProviderGateway {
    providers: HashMap<ProviderKind, Arc<dyn TextProvider>>,
    call_log: Arc<dyn CallLog>,
    worker: String,
    metrics: MetricsCollector,
}

impl ProviderGateway {
    /// Gateway with no bindings and a tracing-only call log.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            call_log: Arc::new(TracingCallLog),
            worker: "archforge".to_string(),
            metrics: MetricsCollector::new(),
        }
    }

    /// Builds HTTP bindings for every provider that has credentials.
    ///
    /// With `require_all_providers` set, a missing credential fails here
    /// instead of on first use.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        let mut gateway = Self::new();

        for kind in ProviderKind::ALL {
            let Some(key) = config.api_key(kind) else {
                if config.require_all_providers {
                    return Err(ConfigError::MissingCredentials(kind.to_string()));
                }
                tracing::warn!(provider = %kind, "No credentials configured; provider disabled");
                continue;
            };
            let key = key.to_string();
            let base_url = config.base_url(kind).map(str::to_string);

            let binding: Arc<dyn TextProvider> = match (kind, base_url) {
                (ProviderKind::OpenAi, Some(url)) => {
                    Arc::new(OpenAiProvider::with_base_url(client.clone(), key, url))
                }
                (ProviderKind::OpenAi, None) => Arc::new(OpenAiProvider::new(client.clone(), key)),
                (ProviderKind::Gemini, Some(url)) => {
                    Arc::new(GeminiProvider::with_base_url(client.clone(), key, url))
                }
                (ProviderKind::Gemini, None) => Arc::new(GeminiProvider::new(client.clone(), key)),
                (ProviderKind::Anthropic, Some(url)) => {
                    Arc::new(AnthropicProvider::with_base_url(client.clone(), key, url))
                }
                (ProviderKind::Anthropic, None) => {
                    Arc::new(AnthropicProvider::new(client.clone(), key))
                }
            };
            gateway = gateway.with_provider(binding);
        }

        Ok(gateway)
    }

    /// Binds (or replaces) the provider for `provider.kind()`.
    pub fn with_provider(mut self, provider: Arc<dyn TextProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn with_call_log(mut self, call_log: Arc<dyn CallLog>) -> Self {
        self.call_log = call_log;
        self
    }

    pub fn with_worker_name(mut self, worker: impl Into<String>) -> Self {
        self.worker = worker.into();
        self
    }

    pub fn has_provider(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    /// Invokes `request.model` through its provider binding.
    pub async fn invoke(&self, request: ProviderRequest) -> Result<Completion, ProviderError> {
        let kind = request.model.provider();
        let provider = self
            .providers
            .get(&kind)
            .ok_or_else(|| ProviderError::MissingCredentials {
                provider: kind.to_string(),
            })?;

        tracing::debug!(
            model = %request.model,
            provider = %kind,
            origin = %request.origin,
            "Invoking provider"
        );

        let started = Instant::now();
        let result = provider.complete(&request).await;
        let elapsed = started.elapsed();

        let status = match &result {
            Ok(_) => "200".to_string(),
            Err(ProviderError::Upstream { status, .. }) => status.to_string(),
            Err(ProviderError::Timeout(_)) => "timeout".to_string(),
            Err(_) => "error".to_string(),
        };
        self.metrics
            .record_provider_request(kind.as_str(), &status, elapsed.as_secs_f64());

        let mut note = CallNote::new(&self.worker, &request, kind);
        note.latency_ms = elapsed.as_millis() as u64;
        if let Err(e) = &result {
            note.error = Some(e.to_string());
            tracing::warn!(model = %request.model, provider = %kind, error = %e, "Provider call failed");
        }
        self.call_log.record(note);

        result
    }

    /// Parses a public model identifier and invokes it.
    pub async fn invoke_named(
        &self,
        model: &str,
        input: &str,
        system: Option<&str>,
        sampling: SamplingParams,
    ) -> Result<Completion, ProviderError> {
        let model = ModelId::parse(model)?;
        let request = ProviderRequest::new(model, input)
            .with_optional_system(system.map(str::to_string))
            .with_sampling(sampling);
        self.invoke(request).await
    }
}

impl Default for ProviderGateway {
    fn default() -> Self {
        Self::new()
    }
}
