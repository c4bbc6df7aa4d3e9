//! Sequential pipeline executor.
//!
//! Drives the stages of a [`PipelineDefinition`] strictly in order against a
//! typed context, applying the per-stage error policy: a fatal error stops
//! the run and is surfaced with the partial context; a recoverable error is
//! downgraded to a warning and the next stage still runs. A panicking stage
//! is always fatal so partially-constructed state can never masquerade as a
//! successful run.

use futures::FutureExt;

use super::cancel::CancelSignal;
use super::context::{StageFailure, StageState};
use super::definition::PipelineDefinition;
use super::stage::ErrorPolicy;
use super::PipelineDeps;
use crate::error::StageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
}

/// Result of one pipeline run. The context snapshot is always returned,
/// partial or not; persistence decisions belong to the caller and to the
/// stages that already wrote through the store.
pub struct PipelineRun<C> {
    pub context: C,
    pub outcome: RunOutcome,
}

pub struct PipelineExecutor {
    deps: std::sync::Arc<PipelineDeps>,
}

impl PipelineExecutor {
    pub fn new(deps: std::sync::Arc<PipelineDeps>) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &std::sync::Arc<PipelineDeps> {
        &self.deps
    }

    pub async fn run<C: StageState>(
        &self,
        definition: &PipelineDefinition<C>,
        mut ctx: C,
        cancel: Option<&CancelSignal>,
    ) -> PipelineRun<C> {
        for stage in definition.stages() {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                ctx.core_mut().failure = Some(StageFailure {
                    stage: stage.name(),
                    error: StageError::Aborted(stage.name()),
                });
                break;
            }

            let result = std::panic::AssertUnwindSafe(stage.run(&mut ctx, &self.deps))
                .catch_unwind()
                .await;

            match result {
                Ok(Ok(())) => {}
                Ok(Err(error)) => match stage.on_error() {
                    ErrorPolicy::Fatal => {
                        ctx.core_mut().failure = Some(StageFailure {
                            stage: stage.name(),
                            error,
                        });
                        break;
                    }
                    ErrorPolicy::Recover => {
                        tracing::warn!(
                            pipeline = definition.name(),
                            stage = stage.name(),
                            error = %error,
                            "recoverable stage error, continuing"
                        );
                        let message = error.to_string();
                        ctx.core_mut().push_warning(stage.name(), message);
                    }
                },
                Err(panic) => {
                    let message = panic_message(panic);
                    tracing::error!(
                        pipeline = definition.name(),
                        stage = stage.name(),
                        "stage panicked: {message}"
                    );
                    ctx.core_mut().failure = Some(StageFailure {
                        stage: stage.name(),
                        error: StageError::Internal(format!("stage panicked: {message}")),
                    });
                    break;
                }
            }
        }

        let outcome = if ctx.core().failure.is_some() {
            RunOutcome::Failed
        } else {
            RunOutcome::Completed
        };
        PipelineRun { context: ctx, outcome }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
