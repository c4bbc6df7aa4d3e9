//! Scripted completion clients for tests and offline demos.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::client::parse_structured;
use super::error::LlmError;
use super::types::{ChatMessage, CompletionOptions};
use super::CompletionClient;

/// Replays a fixed queue of responses in order. Once the queue is drained,
/// further calls fail with `UpstreamUnavailable`.
pub struct CannedCompletionClient {
    responses: Mutex<VecDeque<String>>,
}

impl CannedCompletionClient {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }

    fn next(&self) -> Result<String, LlmError> {
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| LlmError::UpstreamUnavailable("canned responses exhausted".into()))
    }
}

#[async_trait]
impl CompletionClient for CannedCompletionClient {
    async fn complete(
        &self,
        _messages: Vec<ChatMessage>,
        _options: CompletionOptions,
    ) -> Result<String, LlmError> {
        self.next()
    }

    async fn complete_structured(
        &self,
        _messages: Vec<ChatMessage>,
        _options: CompletionOptions,
    ) -> Result<Value, LlmError> {
        parse_structured(&self.next()?)
    }
}

/// Always fails with the configured error kind. Used to exercise fallback
/// paths and fatal completion failures.
pub struct FailingCompletionClient {
    malformed: bool,
}

impl FailingCompletionClient {
    pub fn unavailable() -> Self {
        Self { malformed: false }
    }

    pub fn malformed() -> Self {
        Self { malformed: true }
    }

    fn error(&self) -> LlmError {
        if self.malformed {
            LlmError::MalformedResponse("scripted malformed response".into())
        } else {
            LlmError::UpstreamUnavailable("scripted outage".into())
        }
    }
}

#[async_trait]
impl CompletionClient for FailingCompletionClient {
    async fn complete(
        &self,
        _messages: Vec<ChatMessage>,
        _options: CompletionOptions,
    ) -> Result<String, LlmError> {
        Err(self.error())
    }

    async fn complete_structured(
        &self,
        _messages: Vec<ChatMessage>,
        _options: CompletionOptions,
    ) -> Result<Value, LlmError> {
        Err(self.error())
    }
}
