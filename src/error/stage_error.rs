use thiserror::Error;

use crate::llm::LlmError;
use crate::store::StoreError;

/// Stage-level errors
#[derive(Debug, Error)]
pub enum StageError {
    #[error("no matching input records: {0}")]
    InputNotFound(String),
    #[error("completion service unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("completion response malformed: {0}")]
    MalformedResponse(String),
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
    #[error("check execution failed: {0}")]
    CheckExecution(String),
    #[error("invalid stage input: {0}")]
    InvalidInput(String),
    #[error("run aborted before stage '{0}'")]
    Aborted(&'static str),
    #[error("internal error: {0}")]
    Internal(String),
}

impl StageError {
    /// Whether this error came from the completion client. Pipelines with a
    /// deterministic fallback catch exactly these and no others.
    pub fn is_completion_failure(&self) -> bool {
        matches!(
            self,
            StageError::UpstreamUnavailable(_) | StageError::MalformedResponse(_)
        )
    }
}

impl From<LlmError> for StageError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::MalformedResponse(msg) => StageError::MalformedResponse(msg),
            other => StageError::UpstreamUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_mapping() {
        let e: StageError = LlmError::MalformedResponse("not json".into()).into();
        assert!(matches!(e, StageError::MalformedResponse(_)));

        let e: StageError = LlmError::UpstreamUnavailable("timeout".into()).into();
        assert!(matches!(e, StageError::UpstreamUnavailable(_)));

        let e: StageError = LlmError::ApiError {
            status: 500,
            message: "boom".into(),
        }
        .into();
        assert!(matches!(e, StageError::UpstreamUnavailable(_)));
    }

    #[test]
    fn test_completion_failure_predicate() {
        assert!(StageError::UpstreamUnavailable("x".into()).is_completion_failure());
        assert!(StageError::MalformedResponse("x".into()).is_completion_failure());
        assert!(!StageError::InputNotFound("x".into()).is_completion_failure());
        assert!(!StageError::Internal("x".into()).is_completion_failure());
    }
}
