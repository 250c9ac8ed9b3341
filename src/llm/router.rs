//! Model selection for free-form chat requests.
//!
//! A chat conversation is routed to one model by a small set of rules:
//! a valid caller hint wins, visual topics go to Gemini, long contexts go to
//! Claude, everything else goes to GPT.

use serde::{Deserialize, Serialize};

use super::model::ModelId;

/// Total conversation length (in characters) above which the long-context
/// model is chosen.
pub const LONG_CONTEXT_CHARS: usize = 6000;

const VISUAL_KEYWORDS: [&str; 3] = ["image", "vision", "diagram"];

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn is_system(&self) -> bool {
        self.role.eq_ignore_ascii_case("system")
    }
}

/// Picks the model for a conversation.
///
/// An unrecognised hint is ignored rather than rejected.
pub fn choose_model(messages: &[ChatMessage], hint: Option<&str>) -> ModelId {
    if let Some(model) = hint.and_then(|h| ModelId::parse(h).ok()) {
        return model;
    }

    let text = messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let lowered = text.to_lowercase();

    if VISUAL_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        ModelId::Gemini25Pro
    } else if text.chars().count() > LONG_CONTEXT_CHARS {
        ModelId::Claude45Sonnet
    } else {
        ModelId::Gpt5
    }
}

/// Flattens a conversation into a system prompt and a single prompt body.
///
/// The first system message becomes the system prompt. The remaining
/// messages are rendered as `ROLE: content` paragraphs.
pub fn flatten_conversation(messages: &[ChatMessage]) -> (Option<String>, String) {
    let system = messages
        .iter()
        .find(|m| m.is_system())
        .map(|m| m.content.clone());

    let body = messages
        .iter()
        .filter(|m| !m.is_system())
        .map(|m| format!("{}: {}", m.role.to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    (system, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_hint_wins() {
        let messages = vec![ChatMessage::user("draw a diagram")];
        assert_eq!(
            choose_model(&messages, Some("Claude-4.5-Sonnet")),
            ModelId::Claude45Sonnet
        );
    }

    #[test]
    fn test_invalid_hint_falls_through() {
        let messages = vec![ChatMessage::user("hello")];
        assert_eq!(choose_model(&messages, Some("gpt-4")), ModelId::Gpt5);
    }

    #[test]
    fn test_visual_keywords_route_to_gemini() {
        let messages = vec![ChatMessage::user("Describe this IMAGE please")];
        assert_eq!(choose_model(&messages, None), ModelId::Gemini25Pro);
    }

    #[test]
    fn test_long_context_routes_to_claude() {
        let messages = vec![ChatMessage::user("a".repeat(LONG_CONTEXT_CHARS + 1))];
        assert_eq!(choose_model(&messages, None), ModelId::Claude45Sonnet);

        let short = vec![ChatMessage::user("a".repeat(LONG_CONTEXT_CHARS - 10))];
        assert_eq!(choose_model(&short, None), ModelId::Gpt5);
    }

    #[test]
    fn test_flatten_conversation() {
        let messages = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("hi"),
            ChatMessage::new("assistant", "hello"),
            ChatMessage::user("bye"),
        ];
        let (system, body) = flatten_conversation(&messages);

        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(body, "USER: hi\n\nASSISTANT: hello\n\nUSER: bye");
    }

    #[test]
    fn test_flatten_without_system() {
        let (system, body) = flatten_conversation(&[ChatMessage::user("only")]);
        assert!(system.is_none());
        assert_eq!(body, "USER: only");
    }
}
