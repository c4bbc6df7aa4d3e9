use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("malformed structured response: {0}")]
    MalformedResponse(String),

    #[error("authentication error: {0}")]
    AuthenticationError(String),

    #[error("rate limit exceeded: retry after {retry_after:?}s")]
    RateLimitExceeded { retry_after: Option<u64> },

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl LlmError {
    /// Errors worth a second attempt inside the client's bounded retry loop.
    /// Auth and request-shape errors will fail identically on retry.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            LlmError::UpstreamUnavailable(_) | LlmError::RateLimitExceeded { .. } => true,
            LlmError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
