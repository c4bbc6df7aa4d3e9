//! HTTP completion client against an OpenAI-compatible chat endpoint.
//!
//! One instance is constructed at process start from [`CompletionConfig`] and
//! shared by every pipeline. The client is stateless across calls: prompts
//! are assembled by stage functions, nothing is remembered here.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::error::LlmError;
use super::types::{ChatMessage, ChatRole, CompletionOptions};
use super::CompletionClient;

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Per-attempt timeout. A stuck upstream must never stall the executor.
    pub timeout: Duration,
    /// Total attempts per call, including the first.
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            model: "gpt-4o".into(),
            timeout: Duration::from_secs(120),
            attempts: 2,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl CompletionConfig {
    /// Build from process environment. Returns `None` when no API key is
    /// configured, so callers can fall back to a canned client.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("GRCFLOW_COMPLETION_API_KEY").ok()?;
        let mut config = Self {
            api_key,
            ..Self::default()
        };
        if let Ok(base_url) = std::env::var("GRCFLOW_COMPLETION_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(model) = std::env::var("GRCFLOW_COMPLETION_MODEL") {
            config.model = model;
        }
        Some(config)
    }
}

pub struct HttpCompletionClient {
    config: CompletionConfig,
    client: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(config: CompletionConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn build_payload(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Value {
        let messages = messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                };
                serde_json::json!({ "role": role, "content": m.content })
            })
            .collect::<Vec<_>>();

        let mut payload = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });
        if options.structured {
            payload["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        payload
    }

    fn map_error(status: u16, body: &str) -> LlmError {
        if status == 401 || status == 403 {
            return LlmError::AuthenticationError(body.to_string());
        }
        if status == 429 {
            return LlmError::RateLimitExceeded { retry_after: None };
        }
        LlmError::ApiError {
            status,
            message: body.to_string(),
        }
    }

    fn parse_content(body: &Value) -> Result<String, LlmError> {
        body.get("choices")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::UpstreamUnavailable("response missing content".into()))
    }

    async fn attempt(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let payload = self.build_payload(messages, options);

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| LlmError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::UpstreamUnavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(Self::map_error(status.as_u16(), &text));
        }

        let body: Value = serde_json::from_str(&text)
            .map_err(|e| LlmError::UpstreamUnavailable(format!("invalid response body: {e}")))?;
        Self::parse_content(&body)
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        let attempts = self.config.attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.attempt(messages, options).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    if attempt < attempts && e.is_retryable() {
                        tracing::warn!(attempt, error = %e, "completion attempt failed, retrying");
                        tokio::time::sleep(self.config.retry_delay).await;
                        last_error = Some(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| LlmError::UpstreamUnavailable("no attempts executed".into())))
    }
}

/// Parse a structured completion body. Tolerates the model wrapping its JSON
/// in a markdown code fence, nothing else.
pub(crate) fn parse_structured(text: &str) -> Result<Value, LlmError> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    let value: Value = serde_json::from_str(inner)
        .map_err(|e| LlmError::MalformedResponse(format!("{e}: {inner}")))?;
    if !value.is_object() && !value.is_array() {
        return Err(LlmError::MalformedResponse(format!(
            "expected a JSON object or array, got: {value}"
        )));
    }
    Ok(value)
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<String, LlmError> {
        let options = CompletionOptions {
            structured: false,
            ..options
        };
        self.send(&messages, &options).await
    }

    async fn complete_structured(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<Value, LlmError> {
        let options = CompletionOptions {
            structured: true,
            ..options
        };
        let text = self.send(&messages, &options).await?;
        parse_structured(&text)
    }
}
