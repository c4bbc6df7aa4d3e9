//! Remediation pipeline.
//!
//! Loads controls that are not yet implemented, asks the completion client
//! for a structured remediation plan per control, prioritizes, and persists
//! guidance onto each control. This pipeline carries the canonical
//! model-failure fallback: when the completion client is unavailable or
//! returns garbage, it synthesizes a deterministic checklist per control
//! instead of failing the run.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::generation::FallbackPolicy;
use super::{parse_input, report_from, RunReport};
use crate::engine::{
    CancelSignal, PipelineDefinition, PipelineDeps, PipelineExecutor, RunCore, Stage, StageState,
};
use crate::error::{PipelineError, StageError};
use crate::llm::{ChatMessage, CompletionOptions};
use crate::store::{Control, ControlStatus};

pub const WORKFLOW: &str = "remediation";

/// Fixed checklist used when the model cannot produce plans.
const FALLBACK_STEPS: [&str; 6] = [
    "Review the control objective and its current implementation state",
    "Assign a remediation owner and agree a target date",
    "Document the required configuration or process changes",
    "Implement the changes through a tracked change request",
    "Collect evidence demonstrating the control operates as intended",
    "Schedule a follow-up review to confirm sustained operation",
];

#[derive(Debug, Default, Deserialize)]
pub struct RemediationInput {
    /// Restrict the run to these controls; all open controls otherwise.
    #[serde(default)]
    pub control_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationPlan {
    pub control_id: String,
    pub summary: String,
    pub steps: Vec<String>,
    pub priority_score: u8,
}

pub struct RemediationContext {
    core: RunCore,
    input: RemediationInput,
    controls: Vec<Control>,
    plans: Vec<RemediationPlan>,
    updated: usize,
    used_fallback: bool,
}

impl RemediationContext {
    pub fn new(tenant_id: &str, input: RemediationInput) -> Self {
        Self {
            core: RunCore::new(tenant_id, None),
            input,
            controls: Vec::new(),
            plans: Vec::new(),
            updated: 0,
            used_fallback: false,
        }
    }

    pub fn plans(&self) -> &[RemediationPlan] {
        &self.plans
    }
}

impl StageState for RemediationContext {
    fn core(&self) -> &RunCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut RunCore {
        &mut self.core
    }
}

struct LoadOpenControls;

#[async_trait]
impl Stage<RemediationContext> for LoadOpenControls {
    fn name(&self) -> &'static str {
        "load_open_controls"
    }

    async fn run(
        &self,
        ctx: &mut RemediationContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let mut controls = deps.store.list_controls(&ctx.core.tenant_id).await?;
        controls.retain(|c| {
            !matches!(
                c.status,
                ControlStatus::Implemented | ControlStatus::NotApplicable
            )
        });
        if let Some(ids) = &ctx.input.control_ids {
            controls.retain(|c| ids.contains(&c.id));
        }
        if controls.is_empty() {
            return Err(StageError::InputNotFound(
                "no controls need remediation".into(),
            ));
        }
        ctx.controls = controls;
        Ok(())
    }
}

struct DraftPlans {
    fallback: FallbackPolicy,
}

impl DraftPlans {
    async fn draft_via_model(
        &self,
        ctx: &RemediationContext,
        deps: &PipelineDeps,
    ) -> Result<Vec<RemediationPlan>, StageError> {
        let control_lines = ctx
            .controls
            .iter()
            .map(|c| {
                format!(
                    "- id: {} | name: {} | status: {:?} | {}",
                    c.id, c.name, c.status, c.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let messages = vec![
            ChatMessage::system(
                "You are a compliance remediation planner. Respond with a JSON object \
                 {\"plans\": [{\"control_id\", \"summary\", \"steps\", \"priority_score\"}]} \
                 where steps is a list of concrete actions and priority_score is 0-100.",
            ),
            ChatMessage::user(format!(
                "Draft a remediation plan for each of these controls:\n{control_lines}"
            )),
        ];

        let response = deps
            .llm
            .complete_structured(messages, CompletionOptions::deterministic())
            .await?;
        let plans: Vec<RemediationPlan> = super::generation::parse_items(&response, "plans")?;

        // A plan for a control we did not ask about, or an empty checklist,
        // means the response as a whole cannot be trusted.
        for plan in &plans {
            if !ctx.controls.iter().any(|c| c.id == plan.control_id) {
                return Err(StageError::MalformedResponse(format!(
                    "plan references unknown control {}",
                    plan.control_id
                )));
            }
            if plan.steps.is_empty() {
                return Err(StageError::MalformedResponse(format!(
                    "plan for {} has no steps",
                    plan.control_id
                )));
            }
        }
        Ok(plans)
    }

    fn fallback_plans(controls: &[Control]) -> Vec<RemediationPlan> {
        controls
            .iter()
            .map(|control| RemediationPlan {
                control_id: control.id.clone(),
                summary: format!("Bring '{}' to an implemented state", control.name),
                steps: FALLBACK_STEPS.iter().map(|s| s.to_string()).collect(),
                priority_score: if control.status == ControlStatus::Draft {
                    80
                } else {
                    60
                },
            })
            .collect()
    }
}

#[async_trait]
impl Stage<RemediationContext> for DraftPlans {
    fn name(&self) -> &'static str {
        "draft_plans"
    }

    async fn run(
        &self,
        ctx: &mut RemediationContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        match self.draft_via_model(ctx, deps).await {
            Ok(plans) => {
                ctx.plans = plans;
                Ok(())
            }
            Err(e) if e.is_completion_failure() && self.fallback == FallbackPolicy::Deterministic => {
                tracing::warn!(error = %e, "completion failed, using deterministic fallback plans");
                ctx.plans = Self::fallback_plans(&ctx.controls);
                ctx.used_fallback = true;
                ctx.core.push_warning(
                    self.name(),
                    "deterministic fallback plans were generated instead of model output; \
                     flag for human review",
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

struct PrioritizePlans;

#[async_trait]
impl Stage<RemediationContext> for PrioritizePlans {
    fn name(&self) -> &'static str {
        "prioritize_plans"
    }

    async fn run(
        &self,
        ctx: &mut RemediationContext,
        _deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        // Stable sort: ties keep their original order.
        ctx.plans
            .sort_by(|a, b| b.priority_score.cmp(&a.priority_score));
        Ok(())
    }
}

struct PersistGuidance;

#[async_trait]
impl Stage<RemediationContext> for PersistGuidance {
    fn name(&self) -> &'static str {
        "persist_guidance"
    }

    async fn run(
        &self,
        ctx: &mut RemediationContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let mut updated = 0;
        for plan in &ctx.plans {
            let Some(control) = ctx.controls.iter().find(|c| c.id == plan.control_id) else {
                continue;
            };
            let mut control = control.clone();
            control.implementation_notes = Some(render_guidance(plan));
            control.updated_at = chrono::Utc::now();
            deps.store.update_control(control).await?;
            updated += 1;
        }
        ctx.updated = updated;
        Ok(())
    }
}

fn render_guidance(plan: &RemediationPlan) -> String {
    let steps = plan
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {step}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}\n\n{steps}", plan.summary)
}

pub fn definition(fallback: FallbackPolicy) -> PipelineDefinition<RemediationContext> {
    PipelineDefinition::new(WORKFLOW)
        .stage(LoadOpenControls)
        .stage(DraftPlans { fallback })
        .stage(PrioritizePlans)
        .stage(PersistGuidance)
}

pub async fn run(
    deps: &Arc<PipelineDeps>,
    tenant_id: &str,
    input: serde_json::Value,
    cancel: Option<&CancelSignal>,
) -> Result<RunReport, PipelineError> {
    let input: RemediationInput = parse_input(input)?;
    let definition = definition(FallbackPolicy::Deterministic);
    let executor = PipelineExecutor::new(deps.clone());
    let run = executor
        .run(&definition, RemediationContext::new(tenant_id, input), cancel)
        .await;

    let summary = serde_json::json!({
        "controls_considered": run.context.controls.len(),
        "plans": run.context.plans,
        "updated_controls": run.context.updated,
        "used_fallback": run.context.used_fallback,
    });
    Ok(report_from(WORKFLOW, &run, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RunOutcome;
    use crate::llm::CannedCompletionClient;
    use crate::store::InMemoryStore;
    use chrono::Utc;

    fn control(id: &str, status: ControlStatus) -> Control {
        Control {
            id: id.into(),
            tenant_id: "acme".into(),
            framework_id: "soc2".into(),
            requirement_code: "CC6.1".into(),
            name: format!("Control {id}"),
            description: "Restrict access".into(),
            status,
            owner: None,
            implementation_notes: None,
            updated_at: Utc::now(),
        }
    }

    fn deps_with(
        store: Arc<InMemoryStore>,
        responses: Vec<String>,
    ) -> Arc<PipelineDeps> {
        PipelineDeps::new(store, Arc::new(CannedCompletionClient::new(responses)))
    }

    #[tokio::test]
    async fn test_no_open_controls_is_fatal() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_control(control("c1", ControlStatus::Implemented));
        let deps = deps_with(store, vec![]);

        let report = run(&deps, "acme", serde_json::json!({}), None)
            .await
            .unwrap();
        assert_eq!(report.status, super::super::RunStatus::Failed);
        assert_eq!(report.failed_stage, Some("load_open_controls"));
    }

    #[tokio::test]
    async fn test_model_plans_sorted_by_priority() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_control(control("c1", ControlStatus::InProgress));
        store.seed_control(control("c2", ControlStatus::Draft));
        let response = serde_json::json!({
            "plans": [
                {"control_id": "c1", "summary": "fix c1", "steps": ["a", "b"], "priority_score": 40},
                {"control_id": "c2", "summary": "fix c2", "steps": ["a"], "priority_score": 90},
            ]
        })
        .to_string();
        let deps = deps_with(store.clone(), vec![response]);

        let executor = PipelineExecutor::new(deps.clone());
        let run = executor
            .run(
                &definition(FallbackPolicy::Deterministic),
                RemediationContext::new("acme", RemediationInput::default()),
                None,
            )
            .await;
        assert_eq!(run.outcome, RunOutcome::Completed);
        assert_eq!(run.context.plans[0].control_id, "c2");
        assert_eq!(run.context.updated, 2);
        assert!(!run.context.used_fallback);

        let c1 = store.control("c1").unwrap();
        assert!(c1.implementation_notes.unwrap().contains("fix c1"));
    }

    #[tokio::test]
    async fn test_plan_for_unknown_control_is_malformed() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_control(control("c1", ControlStatus::Draft));
        let response = serde_json::json!({
            "plans": [{"control_id": "ghost", "summary": "s", "steps": ["a"], "priority_score": 10}]
        })
        .to_string();
        let deps = deps_with(store, vec![response]);

        // With fallback enabled, a malformed response degrades to the
        // deterministic plans rather than failing the run.
        let executor = PipelineExecutor::new(deps.clone());
        let run = executor
            .run(
                &definition(FallbackPolicy::Deterministic),
                RemediationContext::new("acme", RemediationInput::default()),
                None,
            )
            .await;
        assert_eq!(run.outcome, RunOutcome::Completed);
        assert!(run.context.used_fallback);
        assert_eq!(run.context.plans.len(), 1);
        assert_eq!(run.context.plans[0].priority_score, 80);
    }

    #[tokio::test]
    async fn test_fail_run_policy_propagates_model_failure() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_control(control("c1", ControlStatus::Draft));
        // Empty canned queue: the first structured call fails as unavailable.
        let deps = deps_with(store, vec![]);

        let executor = PipelineExecutor::new(deps.clone());
        let run = executor
            .run(
                &definition(FallbackPolicy::FailRun),
                RemediationContext::new("acme", RemediationInput::default()),
                None,
            )
            .await;
        assert_eq!(run.outcome, RunOutcome::Failed);
        let failure = run.context.core().failure.as_ref().unwrap();
        assert_eq!(failure.stage, "draft_plans");
        assert!(matches!(failure.error, StageError::UpstreamUnavailable(_)));
    }

    #[test]
    fn test_fallback_priorities() {
        let controls = vec![
            control("c1", ControlStatus::Draft),
            control("c2", ControlStatus::InProgress),
        ];
        let plans = DraftPlans::fallback_plans(&controls);
        assert_eq!(plans[0].priority_score, 80);
        assert_eq!(plans[1].priority_score, 60);
        assert!(plans.iter().all(|p| p.steps.len() == 6));
    }
}
