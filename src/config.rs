//! Process configuration.
//!
//! `AppConfig` is read from the environment once at start-up and passed by
//! reference into the gateway, the queue and the HTTP surface. Nothing else
//! reads the environment.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::llm::{ModelId, ProviderKind};
use crate::scheduler::Tool;

/// Errors that can occur while building configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// A provider key is absent and every provider is required.
    #[error("Missing credentials for provider '{0}'")]
    MissingCredentials(String),

    /// The shared HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

/// Per-tool execution settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolSetting {
    /// Deadline for one execution of the tool.
    pub timeout: Duration,
    /// Model used when the job does not name one.
    pub default_model: ModelId,
}

/// Settings for every allow-listed tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSettings {
    settings: HashMap<Tool, ToolSetting>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        let settings = Tool::ALL
            .into_iter()
            .map(|tool| {
                let timeout = match tool {
                    Tool::MultiModelQuery => Duration::from_secs(45),
                    _ => Duration::from_secs(30),
                };
                (
                    tool,
                    ToolSetting {
                        timeout,
                        default_model: tool.default_model(),
                    },
                )
            })
            .collect();
        Self { settings }
    }
}

impl ToolSettings {
    pub fn get(&self, tool: Tool) -> ToolSetting {
        self.settings.get(&tool).copied().unwrap_or(ToolSetting {
            timeout: Duration::from_secs(30),
            default_model: tool.default_model(),
        })
    }

    pub fn set_timeout(&mut self, tool: Tool, timeout: Duration) {
        let mut setting = self.get(tool);
        setting.timeout = timeout;
        self.settings.insert(tool, setting);
    }
}

/// Configuration for the whole process.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Storage
    /// SQLite URL, e.g. `sqlite://archforge.db`.
    pub database_url: String,

    // Providers
    pub openai_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub gemini_base_url: Option<String>,
    pub anthropic_base_url: Option<String>,
    /// Fail at start-up unless every provider has credentials.
    pub require_all_providers: bool,
    /// Transport-level timeout for provider HTTP calls.
    pub http_timeout: Duration,

    // HTTP surface
    pub bind_addr: String,
    /// Allowed caller origins; empty means any.
    pub cors_origins: Vec<String>,
    /// Shared secret for the dispatch trigger.
    pub internal_key: Option<String>,
    /// Bearer token to user id.
    pub api_tokens: HashMap<String, String>,

    // Queue
    pub heal_after: Duration,
    pub max_attempts: u32,
    pub poll_interval: Duration,
    pub tools: ToolSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://archforge.db".to_string(),
            openai_api_key: None,
            google_api_key: None,
            anthropic_api_key: None,
            openai_base_url: None,
            gemini_base_url: None,
            anthropic_base_url: None,
            require_all_providers: false,
            http_timeout: Duration::from_secs(120),
            bind_addr: "127.0.0.1:8787".to_string(),
            cors_origins: Vec::new(),
            internal_key: None,
            api_tokens: HashMap::new(),
            heal_after: Duration::from_secs(300),
            max_attempts: 3,
            poll_interval: Duration::from_secs(2),
            tools: ToolSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DATABASE_URL`: SQLite URL (default: sqlite://archforge.db)
    /// - `OPENAI_API_KEY`, `GOOGLE_API_KEY`, `ANTHROPIC_API_KEY`: provider keys
    /// - `OPENAI_BASE_URL`, `GEMINI_BASE_URL`, `ANTHROPIC_BASE_URL`: endpoint overrides
    /// - `CORS_ORIGINS`: comma-separated allowed origins
    /// - `INTERNAL_KEY`: shared secret for the dispatch trigger
    /// - `API_TOKENS`: comma-separated `token:user_id` pairs
    /// - `ARCHFORGE_BIND`: listen address (default: 127.0.0.1:8787)
    /// - `ARCHFORGE_HEAL_AFTER_SECS`: staleness threshold (default: 300)
    /// - `ARCHFORGE_MAX_ATTEMPTS`: attempts per job (default: 3)
    /// - `ARCHFORGE_POLL_INTERVAL_MS`: idle worker poll interval (default: 2000)
    /// - `ARCHFORGE_HTTP_TIMEOUT_SECS`: provider transport timeout (default: 120)
    /// - `ARCHFORGE_REQUIRE_ALL_PROVIDERS`: require every provider key (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(val) = get("DATABASE_URL") {
            config.database_url = val;
        }

        config.openai_api_key = get("OPENAI_API_KEY");
        config.google_api_key = get("GOOGLE_API_KEY");
        config.anthropic_api_key = get("ANTHROPIC_API_KEY");
        config.openai_base_url = get("OPENAI_BASE_URL");
        config.gemini_base_url = get("GEMINI_BASE_URL");
        config.anthropic_base_url = get("ANTHROPIC_BASE_URL");

        if let Some(val) = get("ARCHFORGE_REQUIRE_ALL_PROVIDERS") {
            config.require_all_providers = parse_env_bool(&val, "ARCHFORGE_REQUIRE_ALL_PROVIDERS")?;
        }

        if let Some(val) = get("ARCHFORGE_HTTP_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "ARCHFORGE_HTTP_TIMEOUT_SECS")?;
            config.http_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = get("ARCHFORGE_BIND") {
            config.bind_addr = val;
        }

        if let Some(val) = get("CORS_ORIGINS") {
            config.cors_origins = parse_list(&val);
        }

        config.internal_key = get("INTERNAL_KEY");

        if let Some(val) = get("API_TOKENS") {
            config.api_tokens = parse_token_pairs(&val)?;
        }

        if let Some(val) = get("ARCHFORGE_HEAL_AFTER_SECS") {
            let secs: u64 = parse_env_value(&val, "ARCHFORGE_HEAL_AFTER_SECS")?;
            config.heal_after = Duration::from_secs(secs);
        }

        if let Some(val) = get("ARCHFORGE_MAX_ATTEMPTS") {
            config.max_attempts = parse_env_value(&val, "ARCHFORGE_MAX_ATTEMPTS")?;
        }

        if let Some(val) = get("ARCHFORGE_POLL_INTERVAL_MS") {
            let ms: u64 = parse_env_value(&val, "ARCHFORGE_POLL_INTERVAL_MS")?;
            config.poll_interval = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.heal_after.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "heal_after must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.http_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "http_timeout must be greater than 0".to_string(),
            ));
        }

        if self.bind_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidValue {
                key: "ARCHFORGE_BIND".to_string(),
                message: format!("'{}' is not a socket address", self.bind_addr),
            });
        }

        if self.require_all_providers {
            for kind in ProviderKind::ALL {
                if self.api_key(kind).is_none() {
                    return Err(ConfigError::MissingCredentials(kind.to_string()));
                }
            }
        }

        Ok(())
    }

    pub fn api_key(&self, provider: ProviderKind) -> Option<&str> {
        match provider {
            ProviderKind::OpenAi => self.openai_api_key.as_deref(),
            ProviderKind::Gemini => self.google_api_key.as_deref(),
            ProviderKind::Anthropic => self.anthropic_api_key.as_deref(),
        }
    }

    pub fn base_url(&self, provider: ProviderKind) -> Option<&str> {
        match provider {
            ProviderKind::OpenAi => self.openai_base_url.as_deref(),
            ProviderKind::Gemini => self.gemini_base_url.as_deref(),
            ProviderKind::Anthropic => self.anthropic_base_url.as_deref(),
        }
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    pub fn with_api_key(mut self, provider: ProviderKind, key: impl Into<String>) -> Self {
        let key = Some(key.into());
        match provider {
            ProviderKind::OpenAi => self.openai_api_key = key,
            ProviderKind::Gemini => self.google_api_key = key,
            ProviderKind::Anthropic => self.anthropic_api_key = key,
        }
        self
    }

    pub fn with_base_url(mut self, provider: ProviderKind, url: impl Into<String>) -> Self {
        let url = Some(url.into());
        match provider {
            ProviderKind::OpenAi => self.openai_base_url = url,
            ProviderKind::Gemini => self.gemini_base_url = url,
            ProviderKind::Anthropic => self.anthropic_base_url = url,
        }
        self
    }

    pub fn with_require_all_providers(mut self, required: bool) -> Self {
        self.require_all_providers = required;
        self
    }

    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    pub fn with_internal_key(mut self, key: impl Into<String>) -> Self {
        self.internal_key = Some(key.into());
        self
    }

    pub fn with_api_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.api_tokens.insert(token.into(), user_id.into());
        self
    }

    pub fn with_heal_after(mut self, heal_after: Duration) -> Self {
        self.heal_after = heal_after;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_tool_timeout(mut self, tool: Tool, timeout: Duration) -> Self {
        self.tools.set_timeout(tool, timeout);
        self
    }
}

fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_token_pairs(value: &str) -> Result<HashMap<String, String>, ConfigError> {
    parse_list(value)
        .into_iter()
        .map(|pair| match pair.split_once(':') {
            Some((token, user)) if !token.is_empty() && !user.is_empty() => {
                Ok((token.to_string(), user.to_string()))
            }
            _ => Err(ConfigError::InvalidValue {
                key: "API_TOKENS".to_string(),
                message: format!("expected token:user_id, got '{}'", pair),
            }),
        })
        .collect()
}
