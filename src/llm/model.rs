//! Model and provider identifiers.
//!
//! The gateway accepts exactly three public model identifiers, each bound to
//! exactly one provider. Parsing is exact: no aliases, no case folding.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ProviderError;

/// Text-generation providers the gateway can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Gemini,
    Anthropic,
}

impl ProviderKind {
    /// All providers, in a stable order.
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::OpenAi,
        ProviderKind::Gemini,
        ProviderKind::Anthropic,
    ];

    /// Provider name as recorded in lane meta and job records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "google",
            ProviderKind::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ProviderKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Allow-listed public model identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelId {
    Gpt5,
    Gemini25Pro,
    Claude45Sonnet,
}

impl ModelId {
    pub const ALL: [ModelId; 3] = [ModelId::Gpt5, ModelId::Gemini25Pro, ModelId::Claude45Sonnet];

    /// Public identifier accepted from callers.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Gpt5 => "GPT-5",
            ModelId::Gemini25Pro => "Gemini-2.5-Pro",
            ModelId::Claude45Sonnet => "Claude-4.5-Sonnet",
        }
    }

    /// Identifier sent on the wire to the provider.
    pub fn wire_name(&self) -> &'static str {
        match self {
            ModelId::Gpt5 => "gpt-5",
            ModelId::Gemini25Pro => "gemini-2.5-pro",
            ModelId::Claude45Sonnet => "claude-4.5-sonnet",
        }
    }

    /// The single provider this model is bound to.
    pub fn provider(&self) -> ProviderKind {
        match self {
            ModelId::Gpt5 => ProviderKind::OpenAi,
            ModelId::Gemini25Pro => ProviderKind::Gemini,
            ModelId::Claude45Sonnet => ProviderKind::Anthropic,
        }
    }

    /// Parses a caller-supplied identifier against the allow-list.
    pub fn parse(value: &str) -> Result<Self, ProviderError> {
        value.parse()
    }
}

impl FromStr for ModelId {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelId::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ProviderError::UnsupportedModel(s.to_string()))
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ModelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ModelId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_exact() {
        assert_eq!(ModelId::parse("GPT-5").unwrap(), ModelId::Gpt5);
        assert_eq!(
            ModelId::parse("Claude-4.5-Sonnet").unwrap(),
            ModelId::Claude45Sonnet
        );
        assert!(ModelId::parse("gpt-5").is_err());
        assert!(ModelId::parse("GPT-5 ").is_err());
        assert!(ModelId::parse("GPT-4").is_err());
    }

    #[test]
    fn test_each_model_has_one_provider() {
        assert_eq!(ModelId::Gpt5.provider(), ProviderKind::OpenAi);
        assert_eq!(ModelId::Gemini25Pro.provider(), ProviderKind::Gemini);
        assert_eq!(ModelId::Claude45Sonnet.provider(), ProviderKind::Anthropic);
    }

    #[test]
    fn test_serde_uses_public_identifier() {
        let json = serde_json::to_string(&ModelId::Gemini25Pro).unwrap();
        assert_eq!(json, "\"Gemini-2.5-Pro\"");

        let parsed: ModelId = serde_json::from_str("\"GPT-5\"").unwrap();
        assert_eq!(parsed, ModelId::Gpt5);

        let bad: Result<ModelId, _> = serde_json::from_str("\"o3\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_provider_names() {
        assert_eq!(ProviderKind::Gemini.to_string(), "google");
        assert_eq!(ProviderKind::OpenAi.as_str(), "openai");
    }
}
