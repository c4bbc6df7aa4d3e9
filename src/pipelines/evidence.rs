//! Evidence-generation pipeline: propose evidence collection tasks for the
//! tenant's controls.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::generation::{company_context_block, dedupe_by_key, parse_items, FallbackPolicy};
use super::{parse_input, report_from, RunReport};
use crate::engine::{
    CancelSignal, PipelineDefinition, PipelineDeps, PipelineExecutor, RunCore, Stage, StageState,
};
use crate::error::{PipelineError, StageError};
use crate::llm::{ChatMessage, CompletionOptions};
use crate::store::{CompanyProfile, Control, EvidenceItem, EvidenceStatus};

pub const WORKFLOW: &str = "evidence_generation";

#[derive(Debug, Default, Deserialize)]
pub struct EvidenceInput {
    #[serde(default)]
    pub control_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvidenceProposal {
    pub control_id: String,
    pub title: String,
    pub description: String,
}

pub struct EvidenceContext {
    core: RunCore,
    input: EvidenceInput,
    profile: Option<CompanyProfile>,
    controls: Vec<Control>,
    proposals: Vec<EvidenceProposal>,
    created_ids: Vec<String>,
}

impl EvidenceContext {
    pub fn new(tenant_id: &str, input: EvidenceInput) -> Self {
        Self {
            core: RunCore::new(tenant_id, None),
            input,
            profile: None,
            controls: Vec::new(),
            proposals: Vec::new(),
            created_ids: Vec::new(),
        }
    }
}

impl StageState for EvidenceContext {
    fn core(&self) -> &RunCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut RunCore {
        &mut self.core
    }
}

struct LoadControls;

#[async_trait]
impl Stage<EvidenceContext> for LoadControls {
    fn name(&self) -> &'static str {
        "load_controls"
    }

    async fn run(
        &self,
        ctx: &mut EvidenceContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let mut controls = deps.store.list_controls(&ctx.core.tenant_id).await?;
        if let Some(ids) = &ctx.input.control_ids {
            controls.retain(|c| ids.contains(&c.id));
        }
        if controls.is_empty() {
            return Err(StageError::InputNotFound(
                "no controls to collect evidence for".into(),
            ));
        }
        ctx.profile = deps.store.company_profile(&ctx.core.tenant_id).await?;
        ctx.controls = controls;
        Ok(())
    }
}

struct ProposeEvidence {
    fallback: FallbackPolicy,
}

impl ProposeEvidence {
    async fn propose_via_model(
        &self,
        ctx: &EvidenceContext,
        deps: &PipelineDeps,
    ) -> Result<Vec<EvidenceProposal>, StageError> {
        let control_lines = ctx
            .controls
            .iter()
            .map(|c| format!("- id: {} | {}: {}", c.id, c.name, c.description))
            .collect::<Vec<_>>()
            .join("\n");

        let messages = vec![
            ChatMessage::system(
                "You are a compliance auditor. Propose one or more evidence items per control \
                 that would demonstrate it operates. Respond with a JSON object \
                 {\"evidence\": [{\"control_id\", \"title\", \"description\"}]}.",
            ),
            ChatMessage::user(format!(
                "{}\n\nControls:\n{}",
                company_context_block(ctx.profile.as_ref()),
                control_lines
            )),
        ];

        let response = deps
            .llm
            .complete_structured(messages, CompletionOptions::default())
            .await?;
        let mut proposals: Vec<EvidenceProposal> = parse_items(&response, "evidence")?;
        proposals.retain(|p| ctx.controls.iter().any(|c| c.id == p.control_id));
        if proposals.is_empty() {
            return Err(StageError::MalformedResponse(
                "no proposal matched a loaded control".into(),
            ));
        }
        Ok(proposals)
    }

    fn fallback_proposals(controls: &[Control]) -> Vec<EvidenceProposal> {
        controls
            .iter()
            .map(|c| EvidenceProposal {
                control_id: c.id.clone(),
                title: format!("Configuration export for '{}'", c.name),
                description: format!(
                    "Export the current configuration or records demonstrating that '{}' \
                     operates as described.",
                    c.name
                ),
            })
            .collect()
    }
}

#[async_trait]
impl Stage<EvidenceContext> for ProposeEvidence {
    fn name(&self) -> &'static str {
        "propose_evidence"
    }

    async fn run(
        &self,
        ctx: &mut EvidenceContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        match self.propose_via_model(ctx, deps).await {
            Ok(proposals) => {
                ctx.proposals = proposals;
                Ok(())
            }
            Err(e) if e.is_completion_failure() && self.fallback == FallbackPolicy::Deterministic => {
                tracing::warn!(error = %e, "completion failed, using generic evidence proposals");
                ctx.proposals = Self::fallback_proposals(&ctx.controls);
                ctx.core.push_warning(
                    self.name(),
                    "generic evidence requests were generated instead of model output; \
                     flag for human review",
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

struct PersistEvidence;

#[async_trait]
impl Stage<EvidenceContext> for PersistEvidence {
    fn name(&self) -> &'static str {
        "persist_evidence"
    }

    async fn run(
        &self,
        ctx: &mut EvidenceContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let proposals = std::mem::take(&mut ctx.proposals);
        let proposals = dedupe_by_key(proposals, |p| {
            format!("{}|{}", p.control_id, p.title.to_lowercase())
        });

        let mut created_ids = Vec::with_capacity(proposals.len());
        for proposal in &proposals {
            let item = EvidenceItem {
                id: uuid::Uuid::new_v4().to_string(),
                tenant_id: ctx.core.tenant_id.clone(),
                control_id: proposal.control_id.clone(),
                title: proposal.title.clone(),
                description: proposal.description.clone(),
                status: EvidenceStatus::Requested,
                collected_at: None,
            };
            created_ids.push(item.id.clone());
            deps.store.create_evidence(item).await?;
        }
        ctx.proposals = proposals;
        ctx.created_ids = created_ids;
        Ok(())
    }
}

pub fn definition(fallback: FallbackPolicy) -> PipelineDefinition<EvidenceContext> {
    PipelineDefinition::new(WORKFLOW)
        .stage(LoadControls)
        .stage(ProposeEvidence { fallback })
        .stage(PersistEvidence)
}

pub async fn run(
    deps: &Arc<PipelineDeps>,
    tenant_id: &str,
    input: Value,
    cancel: Option<&CancelSignal>,
) -> Result<RunReport, PipelineError> {
    let input: EvidenceInput = parse_input(input)?;
    let definition = definition(FallbackPolicy::FailRun);
    let executor = PipelineExecutor::new(deps.clone());
    let run = executor
        .run(&definition, EvidenceContext::new(tenant_id, input), cancel)
        .await;

    let summary = serde_json::json!({
        "controls": run.context.controls.len(),
        "created": run.context.created_ids.len(),
        "evidence_ids": run.context.created_ids,
    });
    Ok(report_from(WORKFLOW, &run, summary))
}
