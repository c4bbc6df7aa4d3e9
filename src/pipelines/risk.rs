//! Risk-assessment pipeline.
//!
//! Two-phase model use: a qualitative pass produces five weighted risk
//! dimensions with a level and rationale each, then a deterministic pass
//! turns the analysis into a 0-100 score and one of four tiers.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::generation::{company_context_block, parse_items};
use super::{parse_input, report_from, RunReport};
use crate::engine::{
    CancelSignal, PipelineDefinition, PipelineDeps, PipelineExecutor, RunCore, Stage, StageState,
};
use crate::error::{PipelineError, StageError};
use crate::llm::{ChatMessage, CompletionOptions};
use crate::store::{CompanyProfile, DimensionScore, RiskEntry, RiskTier};

pub const WORKFLOW: &str = "risk_assessment";

/// Fixed dimension weights. Order is the canonical reporting order.
pub const DIMENSION_WEIGHTS: [(&str, f64); 5] = [
    ("data_access", 0.30),
    ("continuity", 0.25),
    ("compliance", 0.25),
    ("contractual", 0.10),
    ("reputational", 0.10),
];

/// Weighted 0-100 score from five dimension levels (1-5 each). Fails when a
/// dimension is missing, duplicated, unknown, or out of range — a partial
/// analysis must never silently score.
pub fn weighted_score(dimensions: &[DimensionScore]) -> Result<u8, StageError> {
    let mut total = 0.0;
    for (name, weight) in DIMENSION_WEIGHTS {
        let matches: Vec<_> = dimensions.iter().filter(|d| d.dimension == name).collect();
        let dimension = match matches.as_slice() {
            [one] => *one,
            [] => {
                return Err(StageError::MalformedResponse(format!(
                    "missing risk dimension '{name}'"
                )))
            }
            _ => {
                return Err(StageError::MalformedResponse(format!(
                    "duplicate risk dimension '{name}'"
                )))
            }
        };
        if !(1..=5).contains(&dimension.level) {
            return Err(StageError::MalformedResponse(format!(
                "dimension '{name}' level {} out of range 1-5",
                dimension.level
            )));
        }
        total += f64::from(dimension.level) * 20.0 * weight;
    }
    if dimensions.len() != DIMENSION_WEIGHTS.len() {
        return Err(StageError::MalformedResponse(
            "analysis contains unknown risk dimensions".into(),
        ));
    }
    Ok(total.round() as u8)
}

pub fn tier_for(score: u8) -> RiskTier {
    match score {
        0..=25 => RiskTier::Low,
        26..=50 => RiskTier::Medium,
        51..=75 => RiskTier::High,
        _ => RiskTier::Critical,
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RiskInput {
    #[serde(default)]
    pub risk_ids: Option<Vec<String>>,
}

pub struct RiskContext {
    core: RunCore,
    input: RiskInput,
    profile: Option<CompanyProfile>,
    risks: Vec<RiskEntry>,
    analyses: Vec<(String, Vec<DimensionScore>)>,
    scored: Vec<(String, u8, RiskTier)>,
    updated: usize,
}

impl RiskContext {
    pub fn new(tenant_id: &str, input: RiskInput) -> Self {
        Self {
            core: RunCore::new(tenant_id, None),
            input,
            profile: None,
            risks: Vec::new(),
            analyses: Vec::new(),
            scored: Vec::new(),
            updated: 0,
        }
    }
}

impl StageState for RiskContext {
    fn core(&self) -> &RunCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut RunCore {
        &mut self.core
    }
}

struct LoadRisks;

#[async_trait]
impl Stage<RiskContext> for LoadRisks {
    fn name(&self) -> &'static str {
        "load_risks"
    }

    async fn run(&self, ctx: &mut RiskContext, deps: &PipelineDeps) -> Result<(), StageError> {
        let mut risks = deps.store.list_risks(&ctx.core.tenant_id).await?;
        if let Some(ids) = &ctx.input.risk_ids {
            risks.retain(|r| ids.contains(&r.id));
        }
        if risks.is_empty() {
            return Err(StageError::InputNotFound("no risks to assess".into()));
        }
        ctx.profile = deps.store.company_profile(&ctx.core.tenant_id).await?;
        ctx.risks = risks;
        Ok(())
    }
}

struct AnalyzeRisks;

impl AnalyzeRisks {
    fn prompt(profile: Option<&CompanyProfile>, title: &str, description: &str) -> Vec<ChatMessage> {
        let dimension_list = DIMENSION_WEIGHTS
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ");
        vec![
            ChatMessage::system(format!(
                "You are a risk analyst. Rate the risk on exactly these dimensions: \
                 {dimension_list}. Respond with a JSON object \
                 {{\"dimensions\": [{{\"dimension\", \"level\", \"rationale\"}}]}} where level \
                 is an integer 1-5."
            )),
            ChatMessage::user(format!(
                "{}\n\nRisk: {title}\n{description}",
                company_context_block(profile)
            )),
        ]
    }
}

#[async_trait]
impl Stage<RiskContext> for AnalyzeRisks {
    fn name(&self) -> &'static str {
        "analyze_risks"
    }

    async fn run(&self, ctx: &mut RiskContext, deps: &PipelineDeps) -> Result<(), StageError> {
        let mut analyses = Vec::with_capacity(ctx.risks.len());
        for risk in &ctx.risks {
            let messages = Self::prompt(ctx.profile.as_ref(), &risk.title, &risk.description);
            let response = deps
                .llm
                .complete_structured(messages, CompletionOptions::deterministic())
                .await?;
            let dimensions: Vec<DimensionScore> = parse_items(&response, "dimensions")?;
            analyses.push((risk.id.clone(), dimensions));
        }
        ctx.analyses = analyses;
        Ok(())
    }
}

struct ScoreRisks;

#[async_trait]
impl Stage<RiskContext> for ScoreRisks {
    fn name(&self) -> &'static str {
        "score_risks"
    }

    async fn run(&self, ctx: &mut RiskContext, _deps: &PipelineDeps) -> Result<(), StageError> {
        let mut scored = Vec::with_capacity(ctx.analyses.len());
        for (risk_id, dimensions) in &ctx.analyses {
            let score = weighted_score(dimensions)?;
            scored.push((risk_id.clone(), score, tier_for(score)));
        }
        ctx.scored = scored;
        Ok(())
    }
}

struct PersistAssessments;

#[async_trait]
impl Stage<RiskContext> for PersistAssessments {
    fn name(&self) -> &'static str {
        "persist_assessments"
    }

    async fn run(&self, ctx: &mut RiskContext, deps: &PipelineDeps) -> Result<(), StageError> {
        let mut updated = 0;
        for (risk_id, score, tier) in &ctx.scored {
            let Some(risk) = ctx.risks.iter().find(|r| &r.id == risk_id) else {
                continue;
            };
            let analysis = ctx
                .analyses
                .iter()
                .find(|(id, _)| id == risk_id)
                .map(|(_, dims)| dims.clone())
                .unwrap_or_default();
            let mut risk = risk.clone();
            risk.score = Some(*score);
            risk.tier = Some(*tier);
            risk.analysis = analysis;
            risk.assessed_at = Some(chrono::Utc::now());
            deps.store.update_risk(risk).await?;
            updated += 1;
        }
        ctx.updated = updated;
        Ok(())
    }
}

pub fn definition() -> PipelineDefinition<RiskContext> {
    PipelineDefinition::new(WORKFLOW)
        .stage(LoadRisks)
        .stage(AnalyzeRisks)
        .stage(ScoreRisks)
        .stage(PersistAssessments)
}

pub async fn run(
    deps: &Arc<PipelineDeps>,
    tenant_id: &str,
    input: Value,
    cancel: Option<&CancelSignal>,
) -> Result<RunReport, PipelineError> {
    let input: RiskInput = parse_input(input)?;
    let definition = definition();
    let executor = PipelineExecutor::new(deps.clone());
    let run = executor
        .run(&definition, RiskContext::new(tenant_id, input), cancel)
        .await;

    let tiers = |wanted: RiskTier| {
        run.context
            .scored
            .iter()
            .filter(|(_, _, tier)| *tier == wanted)
            .count()
    };
    let summary = serde_json::json!({
        "assessed": run.context.updated,
        "tiers": {
            "low": tiers(RiskTier::Low),
            "medium": tiers(RiskTier::Medium),
            "high": tiers(RiskTier::High),
            "critical": tiers(RiskTier::Critical),
        },
    });
    Ok(report_from(WORKFLOW, &run, summary))
}
