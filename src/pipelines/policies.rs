//! Policy-generation pipeline: customize stored policy templates to the
//! tenant's company profile and persist the drafts.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::generation::{
    company_context_block, dedupe_by_key, default_owner, parse_items, FallbackPolicy,
};
use super::{parse_input, report_from, RunReport};
use crate::engine::{
    CancelSignal, PipelineDefinition, PipelineDeps, PipelineExecutor, RunCore, Stage, StageState,
};
use crate::error::{PipelineError, StageError};
use crate::llm::{ChatMessage, CompletionOptions};
use crate::store::{CompanyProfile, PolicyDoc, PolicyStatus, PolicyTemplate};

pub const WORKFLOW: &str = "policy_generation";

#[derive(Debug, Default, Deserialize)]
pub struct PoliciesInput {
    /// Restrict generation to templates in this category.
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyDraft {
    pub template_id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub owner: Option<String>,
}

pub struct PoliciesContext {
    core: RunCore,
    input: PoliciesInput,
    profile: Option<CompanyProfile>,
    templates: Vec<PolicyTemplate>,
    drafts: Vec<PolicyDraft>,
    created_ids: Vec<String>,
}

impl PoliciesContext {
    pub fn new(tenant_id: &str, input: PoliciesInput) -> Self {
        Self {
            core: RunCore::new(tenant_id, None),
            input,
            profile: None,
            templates: Vec::new(),
            drafts: Vec::new(),
            created_ids: Vec::new(),
        }
    }
}

impl StageState for PoliciesContext {
    fn core(&self) -> &RunCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut RunCore {
        &mut self.core
    }
}

struct LoadTemplates;

#[async_trait]
impl Stage<PoliciesContext> for LoadTemplates {
    fn name(&self) -> &'static str {
        "load_templates"
    }

    async fn run(
        &self,
        ctx: &mut PoliciesContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let mut templates = deps.store.list_policy_templates().await?;
        if let Some(category) = &ctx.input.category {
            templates.retain(|t| &t.category == category);
        }
        if templates.is_empty() {
            return Err(StageError::InputNotFound(
                "no policy templates match the request".into(),
            ));
        }
        ctx.profile = deps.store.company_profile(&ctx.core.tenant_id).await?;
        ctx.templates = templates;
        Ok(())
    }
}

struct DraftPolicies {
    fallback: FallbackPolicy,
}

impl DraftPolicies {
    async fn draft_via_model(
        &self,
        ctx: &PoliciesContext,
        deps: &PipelineDeps,
    ) -> Result<Vec<PolicyDraft>, StageError> {
        let template_lines = ctx
            .templates
            .iter()
            .map(|t| format!("- id: {} | {} ({}):\n{}", t.id, t.name, t.category, t.body))
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages = vec![
            ChatMessage::system(
                "You are a compliance policy writer. Customize each template to the company \
                 context. Respond with a JSON object \
                 {\"policies\": [{\"template_id\", \"title\", \"body\"}]}.",
            ),
            ChatMessage::user(format!(
                "{}\n\nTemplates:\n{}",
                company_context_block(ctx.profile.as_ref()),
                template_lines
            )),
        ];

        let response = deps
            .llm
            .complete_structured(messages, CompletionOptions::default())
            .await?;
        let mut drafts: Vec<PolicyDraft> = parse_items(&response, "policies")?;
        drafts.retain(|d| ctx.templates.iter().any(|t| t.id == d.template_id));
        if drafts.is_empty() {
            return Err(StageError::MalformedResponse(
                "no draft matched a loaded template".into(),
            ));
        }
        Ok(drafts)
    }

    fn fallback_drafts(ctx: &PoliciesContext) -> Vec<PolicyDraft> {
        let company = ctx
            .profile
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "the organization".to_string());
        ctx.templates
            .iter()
            .map(|t| PolicyDraft {
                template_id: t.id.clone(),
                title: t.name.clone(),
                body: format!("This policy applies to {company}.\n\n{}", t.body),
                owner: None,
            })
            .collect()
    }
}

#[async_trait]
impl Stage<PoliciesContext> for DraftPolicies {
    fn name(&self) -> &'static str {
        "draft_policies"
    }

    async fn run(
        &self,
        ctx: &mut PoliciesContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        match self.draft_via_model(ctx, deps).await {
            Ok(drafts) => {
                ctx.drafts = drafts;
                Ok(())
            }
            Err(e) if e.is_completion_failure() && self.fallback == FallbackPolicy::Deterministic => {
                tracing::warn!(error = %e, "completion failed, instantiating templates verbatim");
                ctx.drafts = Self::fallback_drafts(ctx);
                ctx.core.push_warning(
                    self.name(),
                    "policies were instantiated from templates without model customization; \
                     flag for human review",
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

struct PersistPolicies;

#[async_trait]
impl Stage<PoliciesContext> for PersistPolicies {
    fn name(&self) -> &'static str {
        "persist_policies"
    }

    async fn run(
        &self,
        ctx: &mut PoliciesContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let owner = default_owner(ctx.profile.as_ref());
        let drafts = std::mem::take(&mut ctx.drafts);
        let drafts = dedupe_by_key(drafts, |d| d.title.to_lowercase());

        let mut created_ids = Vec::with_capacity(drafts.len());
        for draft in &drafts {
            let policy = PolicyDoc {
                id: uuid::Uuid::new_v4().to_string(),
                tenant_id: ctx.core.tenant_id.clone(),
                template_id: Some(draft.template_id.clone()),
                title: draft.title.clone(),
                body: draft.body.clone(),
                owner: Some(draft.owner.clone().unwrap_or_else(|| owner.clone())),
                status: PolicyStatus::Draft,
                next_review_at: Some(Utc::now() + Duration::days(365)),
                created_at: Utc::now(),
            };
            created_ids.push(policy.id.clone());
            deps.store.create_policy(policy).await?;
        }
        ctx.drafts = drafts;
        ctx.created_ids = created_ids;
        Ok(())
    }
}

pub fn definition(fallback: FallbackPolicy) -> PipelineDefinition<PoliciesContext> {
    PipelineDefinition::new(WORKFLOW)
        .stage(LoadTemplates)
        .stage(DraftPolicies { fallback })
        .stage(PersistPolicies)
}

pub async fn run(
    deps: &Arc<PipelineDeps>,
    tenant_id: &str,
    input: Value,
    cancel: Option<&CancelSignal>,
) -> Result<RunReport, PipelineError> {
    let input: PoliciesInput = parse_input(input)?;
    let definition = definition(FallbackPolicy::FailRun);
    let executor = PipelineExecutor::new(deps.clone());
    let run = executor
        .run(&definition, PoliciesContext::new(tenant_id, input), cancel)
        .await;

    let summary = serde_json::json!({
        "templates": run.context.templates.len(),
        "created": run.context.created_ids.len(),
        "policy_ids": run.context.created_ids,
    });
    Ok(report_from(WORKFLOW, &run, summary))
}
