//! Workflow definitions built on the pipeline engine.
//!
//! Eight linear pipelines: seven generation/assessment workflows driven by
//! the completion client, plus the fully deterministic monitoring daemon.
//! [`run_pipeline`] is the single entry point the API layer and the schedule
//! reconciler call.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

pub mod audit_prep;
pub mod controls;
pub mod evidence;
pub mod generation;
pub mod monitoring;
pub mod policies;
pub mod remediation;
pub mod risk;
pub mod vendor_risk;

pub use generation::FallbackPolicy;

use crate::engine::{PipelineDeps, PipelineRun, RunOutcome, StageState};
use crate::error::PipelineError;

/// All workflow names accepted by [`run_pipeline`].
pub const WORKFLOWS: &[&str] = &[
    controls::WORKFLOW,
    policies::WORKFLOW,
    evidence::WORKFLOW,
    risk::WORKFLOW,
    vendor_risk::WORKFLOW,
    remediation::WORKFLOW,
    audit_prep::WORKFLOW,
    monitoring::WORKFLOW,
];

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// What a pipeline run hands back to its caller: a success/failure
/// indicator, the failing stage when there is one, warnings (including
/// fallback notices), and a workflow-specific summary of created/updated
/// records.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub workflow: &'static str,
    pub run_id: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub summary: Value,
}

/// Start one pipeline run. A run that fails mid-pipeline still returns
/// `Ok` with `status: Failed` and the partial summary; `Err` is reserved
/// for requests that never started (unknown workflow, bad input shape).
pub async fn run_pipeline(
    deps: &Arc<PipelineDeps>,
    workflow: &str,
    tenant_id: &str,
    input: Value,
) -> Result<RunReport, PipelineError> {
    match workflow {
        w if w == controls::WORKFLOW => controls::run(deps, tenant_id, input, None).await,
        w if w == policies::WORKFLOW => policies::run(deps, tenant_id, input, None).await,
        w if w == evidence::WORKFLOW => evidence::run(deps, tenant_id, input, None).await,
        w if w == risk::WORKFLOW => risk::run(deps, tenant_id, input, None).await,
        w if w == vendor_risk::WORKFLOW => vendor_risk::run(deps, tenant_id, input, None).await,
        w if w == remediation::WORKFLOW => remediation::run(deps, tenant_id, input, None).await,
        w if w == audit_prep::WORKFLOW => audit_prep::run(deps, tenant_id, input, None).await,
        w if w == monitoring::WORKFLOW => monitoring::run(deps, tenant_id, input, None).await,
        other => Err(PipelineError::UnknownWorkflow(other.to_string())),
    }
}

/// Assemble the caller-facing report from a finished run.
pub(crate) fn report_from<C: StageState>(
    workflow: &'static str,
    run: &PipelineRun<C>,
    summary: Value,
) -> RunReport {
    let core = run.context.core();
    RunReport {
        workflow,
        run_id: core.run_id.clone(),
        status: match run.outcome {
            RunOutcome::Completed => RunStatus::Completed,
            RunOutcome::Failed => RunStatus::Failed,
        },
        failed_stage: core.failure.as_ref().map(|f| f.stage),
        error: core.failure.as_ref().map(|f| f.error.to_string()),
        warnings: core
            .warnings
            .iter()
            .map(|w| format!("{}: {}", w.stage, w.message))
            .collect(),
        summary,
    }
}

pub(crate) fn parse_input<T: serde::de::DeserializeOwned>(
    input: Value,
) -> Result<T, PipelineError> {
    serde_json::from_value(input).map_err(|e| PipelineError::InvalidInput(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CannedCompletionClient;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn test_unknown_workflow_rejected() {
        let deps = PipelineDeps::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(CannedCompletionClient::new(vec![])),
        );
        let err = run_pipeline(&deps, "espresso_brewing", "acme", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownWorkflow(_)));
    }

    #[test]
    fn test_workflow_names_unique() {
        let mut names = WORKFLOWS.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), WORKFLOWS.len());
    }
}
