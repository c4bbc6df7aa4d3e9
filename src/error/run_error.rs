use thiserror::Error;

use super::StageError;

/// Run-level errors surfaced to the caller of `run_pipeline`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),
    #[error("invalid run input: {0}")]
    InvalidInput(String),
    #[error("stage '{stage}' failed: {error}")]
    StageFailed {
        stage: &'static str,
        #[source]
        error: StageError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            PipelineError::UnknownWorkflow("foo".into()).to_string(),
            "unknown workflow: foo"
        );
        let e = PipelineError::StageFailed {
            stage: "load_controls",
            error: StageError::InputNotFound("no controls".into()),
        };
        assert!(e.to_string().contains("load_controls"));
        assert!(e.to_string().contains("no controls"));
    }
}
