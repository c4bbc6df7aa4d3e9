//! Structured completion client.
//!
//! Wraps a remote text-generation capability behind the [`CompletionClient`]
//! trait: free-text completions and completions that must parse as JSON.
//! The HTTP implementation bounds every call with a per-attempt timeout and
//! a two-attempt retry so a stuck upstream can never stall a pipeline run.

use async_trait::async_trait;
use serde_json::Value;

pub mod canned;
pub mod client;
pub mod error;
pub mod types;

pub use canned::{CannedCompletionClient, FailingCompletionClient};
pub use client::{CompletionConfig, HttpCompletionClient};
pub use error::LlmError;
pub use types::{ChatMessage, ChatRole, CompletionOptions};

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Free-text completion.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<String, LlmError>;

    /// Completion that must parse as structured data. Fails with
    /// [`LlmError::MalformedResponse`] when the response text is not valid
    /// JSON; callers never receive partially-parsed data.
    async fn complete_structured(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<Value, LlmError>;
}
