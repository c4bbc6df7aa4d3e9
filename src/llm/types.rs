//! Data types for the structured-completion API.

use serde::{Deserialize, Serialize};

/// Role of a chat message participant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single message in a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling and sizing options for one completion call.
///
/// `structured` asks the upstream service for a JSON-only response; it is set
/// by [`complete_structured`](super::CompletionClient::complete_structured)
/// and should not be toggled by callers directly.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    /// 0.0 = deterministic .. 1.0 = exploratory.
    pub temperature: f64,
    pub max_tokens: u32,
    pub structured: bool,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 2048,
            structured: false,
        }
    }
}

impl CompletionOptions {
    pub fn deterministic() -> Self {
        Self {
            temperature: 0.0,
            ..Self::default()
        }
    }
}
