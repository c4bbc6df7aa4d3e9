//! Controls-generation pipeline.
//!
//! Loads framework requirements, asks the completion client to draft controls
//! tailored to the company profile, refines ownership with a second
//! (recoverable) model pass, then dedupes and persists.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::generation::{
    company_context_block, dedupe_by_key, default_owner, parse_items, FallbackPolicy,
};
use super::{parse_input, report_from, RunReport};
use crate::engine::{
    CancelSignal, ErrorPolicy, PipelineDefinition, PipelineDeps, PipelineExecutor, RunCore,
    Stage, StageState,
};
use crate::error::{PipelineError, StageError};
use crate::llm::{ChatMessage, CompletionOptions};
use crate::store::{CompanyProfile, Control, ControlStatus, Framework};

pub const WORKFLOW: &str = "controls_generation";

#[derive(Debug, Deserialize)]
pub struct ControlsInput {
    pub framework_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlDraft {
    pub requirement_code: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub owner: Option<String>,
}

pub struct ControlsContext {
    core: RunCore,
    input: ControlsInput,
    profile: Option<CompanyProfile>,
    frameworks: Vec<Framework>,
    drafts: Vec<ControlDraft>,
    created_ids: Vec<String>,
}

impl ControlsContext {
    pub fn new(tenant_id: &str, input: ControlsInput) -> Self {
        Self {
            core: RunCore::new(tenant_id, None),
            input,
            profile: None,
            frameworks: Vec::new(),
            drafts: Vec::new(),
            created_ids: Vec::new(),
        }
    }

    /// Framework owning a requirement code, searched in load order.
    fn framework_for(&self, requirement_code: &str) -> Option<&Framework> {
        self.frameworks
            .iter()
            .find(|f| f.requirements.iter().any(|r| r.code == requirement_code))
    }
}

impl StageState for ControlsContext {
    fn core(&self) -> &RunCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut RunCore {
        &mut self.core
    }
}

struct LoadFrameworks;

#[async_trait]
impl Stage<ControlsContext> for LoadFrameworks {
    fn name(&self) -> &'static str {
        "load_frameworks"
    }

    async fn run(
        &self,
        ctx: &mut ControlsContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let frameworks = deps.store.list_frameworks(&ctx.input.framework_ids).await?;
        if frameworks.is_empty() || frameworks.iter().all(|f| f.requirements.is_empty()) {
            return Err(StageError::InputNotFound(
                "no framework requirements to generate controls from".into(),
            ));
        }
        ctx.profile = deps.store.company_profile(&ctx.core.tenant_id).await?;
        ctx.frameworks = frameworks;
        Ok(())
    }
}

struct DraftControls {
    fallback: FallbackPolicy,
}

impl DraftControls {
    async fn draft_via_model(
        &self,
        ctx: &ControlsContext,
        deps: &PipelineDeps,
    ) -> Result<Vec<ControlDraft>, StageError> {
        let requirement_lines = ctx
            .frameworks
            .iter()
            .flat_map(|f| {
                f.requirements
                    .iter()
                    .map(move |r| format!("- [{}] {}: {}", r.code, r.title, r.description))
            })
            .collect::<Vec<_>>()
            .join("\n");

        let messages = vec![
            ChatMessage::system(
                "You are a compliance program designer. Respond with a JSON object \
                 {\"controls\": [{\"requirement_code\", \"name\", \"description\"}]} with one \
                 control per requirement, tailored to the company context.",
            ),
            ChatMessage::user(format!(
                "{}\n\nRequirements:\n{}",
                company_context_block(ctx.profile.as_ref()),
                requirement_lines
            )),
        ];

        let response = deps
            .llm
            .complete_structured(messages, CompletionOptions::default())
            .await?;
        let mut drafts: Vec<ControlDraft> = parse_items(&response, "controls")?;
        // Drop drafts pointing at requirements we never asked about.
        drafts.retain(|d| ctx.framework_for(&d.requirement_code).is_some());
        if drafts.is_empty() {
            return Err(StageError::MalformedResponse(
                "no draft matched a loaded requirement".into(),
            ));
        }
        Ok(drafts)
    }

    fn fallback_drafts(ctx: &ControlsContext) -> Vec<ControlDraft> {
        ctx.frameworks
            .iter()
            .flat_map(|f| f.requirements.iter())
            .map(|r| ControlDraft {
                requirement_code: r.code.clone(),
                name: r.title.clone(),
                description: r.description.clone(),
                owner: None,
            })
            .collect()
    }
}

#[async_trait]
impl Stage<ControlsContext> for DraftControls {
    fn name(&self) -> &'static str {
        "draft_controls"
    }

    async fn run(
        &self,
        ctx: &mut ControlsContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        match self.draft_via_model(ctx, deps).await {
            Ok(drafts) => {
                ctx.drafts = drafts;
                Ok(())
            }
            Err(e) if e.is_completion_failure() && self.fallback == FallbackPolicy::Deterministic => {
                tracing::warn!(error = %e, "completion failed, deriving controls from requirements");
                ctx.drafts = Self::fallback_drafts(ctx);
                ctx.core.push_warning(
                    self.name(),
                    "controls were derived directly from requirement text instead of model \
                     output; flag for human review",
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Ownership suggestions are nice to have; a model failure here must not
/// abort the run, so this stage is flagged recoverable and the assemble
/// stage fills any remaining gaps deterministically.
struct SuggestOwnership;

#[derive(Debug, Deserialize)]
struct OwnerSuggestion {
    requirement_code: String,
    owner: String,
}

#[async_trait]
impl Stage<ControlsContext> for SuggestOwnership {
    fn name(&self) -> &'static str {
        "suggest_ownership"
    }

    fn on_error(&self) -> ErrorPolicy {
        ErrorPolicy::Recover
    }

    async fn run(
        &self,
        ctx: &mut ControlsContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let draft_lines = ctx
            .drafts
            .iter()
            .map(|d| format!("- [{}] {}", d.requirement_code, d.name))
            .collect::<Vec<_>>()
            .join("\n");

        let messages = vec![
            ChatMessage::system(
                "Assign an owning team to each control. Respond with a JSON object \
                 {\"owners\": [{\"requirement_code\", \"owner\"}]}.",
            ),
            ChatMessage::user(format!(
                "{}\n\nControls:\n{}",
                company_context_block(ctx.profile.as_ref()),
                draft_lines
            )),
        ];

        let response = deps
            .llm
            .complete_structured(messages, CompletionOptions::default())
            .await?;
        let suggestions: Vec<OwnerSuggestion> = parse_items(&response, "owners")?;
        for suggestion in suggestions {
            for draft in ctx
                .drafts
                .iter_mut()
                .filter(|d| d.requirement_code == suggestion.requirement_code)
            {
                draft.owner = Some(suggestion.owner.clone());
            }
        }
        Ok(())
    }
}

struct AssembleControls;

#[async_trait]
impl Stage<ControlsContext> for AssembleControls {
    fn name(&self) -> &'static str {
        "assemble_controls"
    }

    async fn run(
        &self,
        ctx: &mut ControlsContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let fallback_owner = default_owner(ctx.profile.as_ref());
        let drafts = std::mem::take(&mut ctx.drafts);
        let drafts = dedupe_by_key(drafts, |d| {
            format!("{}|{}", d.requirement_code, d.name.to_lowercase())
        });

        let mut created_ids = Vec::with_capacity(drafts.len());
        for draft in &drafts {
            let Some(framework) = ctx.framework_for(&draft.requirement_code) else {
                continue;
            };
            let control = Control {
                id: uuid::Uuid::new_v4().to_string(),
                tenant_id: ctx.core.tenant_id.clone(),
                framework_id: framework.id.clone(),
                requirement_code: draft.requirement_code.clone(),
                name: draft.name.clone(),
                description: draft.description.clone(),
                status: ControlStatus::Draft,
                owner: Some(draft.owner.clone().unwrap_or_else(|| fallback_owner.clone())),
                implementation_notes: None,
                updated_at: chrono::Utc::now(),
            };
            created_ids.push(control.id.clone());
            deps.store.create_control(control).await?;
        }
        ctx.drafts = drafts;
        ctx.created_ids = created_ids;
        Ok(())
    }
}

pub fn definition(fallback: FallbackPolicy) -> PipelineDefinition<ControlsContext> {
    PipelineDefinition::new(WORKFLOW)
        .stage(LoadFrameworks)
        .stage(DraftControls { fallback })
        .stage(SuggestOwnership)
        .stage(AssembleControls)
}

pub async fn run(
    deps: &Arc<PipelineDeps>,
    tenant_id: &str,
    input: Value,
    cancel: Option<&CancelSignal>,
) -> Result<RunReport, PipelineError> {
    let input: ControlsInput = parse_input(input)?;
    let definition = definition(FallbackPolicy::FailRun);
    let executor = PipelineExecutor::new(deps.clone());
    let run = executor
        .run(&definition, ControlsContext::new(tenant_id, input), cancel)
        .await;

    let summary = serde_json::json!({
        "frameworks": run.context.frameworks.len(),
        "created": run.context.created_ids.len(),
        "control_ids": run.context.created_ids,
    });
    Ok(report_from(WORKFLOW, &run, summary))
}
