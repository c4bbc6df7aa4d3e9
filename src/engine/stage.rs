use async_trait::async_trait;

use super::context::StageState;
use super::PipelineDeps;
use crate::error::StageError;

/// What the executor does with an error returned by a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Stop the run; the error is surfaced to the caller.
    Fatal,
    /// Downgrade to a warning and keep going.
    Recover,
}

/// One step of a pipeline. Stages mutate the typed run context directly and
/// report failure through their return value; they must not spawn work that
/// outlives the call.
#[async_trait]
pub trait Stage<C: StageState>: Send + Sync {
    fn name(&self) -> &'static str;

    fn on_error(&self) -> ErrorPolicy {
        ErrorPolicy::Fatal
    }

    async fn run(&self, ctx: &mut C, deps: &PipelineDeps) -> Result<(), StageError>;
}
