//! Vendor-risk pipeline. Same two-phase analysis and scoring as the risk
//! pipeline, run against vendor records.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::generation::{company_context_block, parse_items};
use super::risk::{tier_for, weighted_score, DIMENSION_WEIGHTS};
use super::{parse_input, report_from, RunReport};
use crate::engine::{
    CancelSignal, PipelineDefinition, PipelineDeps, PipelineExecutor, RunCore, Stage, StageState,
};
use crate::error::{PipelineError, StageError};
use crate::llm::{ChatMessage, CompletionOptions};
use crate::store::{CompanyProfile, DimensionScore, RiskTier, Vendor};

pub const WORKFLOW: &str = "vendor_risk_assessment";

#[derive(Debug, Default, Deserialize)]
pub struct VendorRiskInput {
    #[serde(default)]
    pub vendor_ids: Option<Vec<String>>,
}

pub struct VendorRiskContext {
    core: RunCore,
    input: VendorRiskInput,
    profile: Option<CompanyProfile>,
    vendors: Vec<Vendor>,
    analyses: Vec<(String, Vec<DimensionScore>)>,
    scored: Vec<(String, u8, RiskTier)>,
    updated: usize,
}

impl VendorRiskContext {
    pub fn new(tenant_id: &str, input: VendorRiskInput) -> Self {
        Self {
            core: RunCore::new(tenant_id, None),
            input,
            profile: None,
            vendors: Vec::new(),
            analyses: Vec::new(),
            scored: Vec::new(),
            updated: 0,
        }
    }
}

impl StageState for VendorRiskContext {
    fn core(&self) -> &RunCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut RunCore {
        &mut self.core
    }
}

struct LoadVendors;

#[async_trait]
impl Stage<VendorRiskContext> for LoadVendors {
    fn name(&self) -> &'static str {
        "load_vendors"
    }

    async fn run(
        &self,
        ctx: &mut VendorRiskContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let mut vendors = deps.store.list_vendors(&ctx.core.tenant_id).await?;
        if let Some(ids) = &ctx.input.vendor_ids {
            vendors.retain(|v| ids.contains(&v.id));
        }
        if vendors.is_empty() {
            return Err(StageError::InputNotFound("no vendors to assess".into()));
        }
        ctx.profile = deps.store.company_profile(&ctx.core.tenant_id).await?;
        ctx.vendors = vendors;
        Ok(())
    }
}

struct AnalyzeVendors;

#[async_trait]
impl Stage<VendorRiskContext> for AnalyzeVendors {
    fn name(&self) -> &'static str {
        "analyze_vendors"
    }

    async fn run(
        &self,
        ctx: &mut VendorRiskContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let dimension_list = DIMENSION_WEIGHTS
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ");
        let mut analyses = Vec::with_capacity(ctx.vendors.len());
        for vendor in &ctx.vendors {
            let messages = vec![
                ChatMessage::system(format!(
                    "You are a third-party risk analyst. Rate the vendor relationship on \
                     exactly these dimensions: {dimension_list}. Respond with a JSON object \
                     {{\"dimensions\": [{{\"dimension\", \"level\", \"rationale\"}}]}} where \
                     level is an integer 1-5."
                )),
                ChatMessage::user(format!(
                    "{}\n\nVendor: {}\nServices provided: {}",
                    company_context_block(ctx.profile.as_ref()),
                    vendor.name,
                    vendor.services
                )),
            ];
            let response = deps
                .llm
                .complete_structured(messages, CompletionOptions::deterministic())
                .await?;
            let dimensions: Vec<DimensionScore> = parse_items(&response, "dimensions")?;
            analyses.push((vendor.id.clone(), dimensions));
        }
        ctx.analyses = analyses;
        Ok(())
    }
}

struct ScoreVendors;

#[async_trait]
impl Stage<VendorRiskContext> for ScoreVendors {
    fn name(&self) -> &'static str {
        "score_vendors"
    }

    async fn run(
        &self,
        ctx: &mut VendorRiskContext,
        _deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let mut scored = Vec::with_capacity(ctx.analyses.len());
        for (vendor_id, dimensions) in &ctx.analyses {
            let score = weighted_score(dimensions)?;
            scored.push((vendor_id.clone(), score, tier_for(score)));
        }
        ctx.scored = scored;
        Ok(())
    }
}

struct PersistVendorAssessments;

#[async_trait]
impl Stage<VendorRiskContext> for PersistVendorAssessments {
    fn name(&self) -> &'static str {
        "persist_vendor_assessments"
    }

    async fn run(
        &self,
        ctx: &mut VendorRiskContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let mut updated = 0;
        for (vendor_id, score, tier) in &ctx.scored {
            let Some(vendor) = ctx.vendors.iter().find(|v| &v.id == vendor_id) else {
                continue;
            };
            let analysis = ctx
                .analyses
                .iter()
                .find(|(id, _)| id == vendor_id)
                .map(|(_, dims)| dims.clone())
                .unwrap_or_default();
            let mut vendor = vendor.clone();
            vendor.score = Some(*score);
            vendor.tier = Some(*tier);
            vendor.analysis = analysis;
            vendor.last_assessed_at = Some(chrono::Utc::now());
            deps.store.update_vendor(vendor).await?;
            updated += 1;
        }
        ctx.updated = updated;
        Ok(())
    }
}

pub fn definition() -> PipelineDefinition<VendorRiskContext> {
    PipelineDefinition::new(WORKFLOW)
        .stage(LoadVendors)
        .stage(AnalyzeVendors)
        .stage(ScoreVendors)
        .stage(PersistVendorAssessments)
}

pub async fn run(
    deps: &Arc<PipelineDeps>,
    tenant_id: &str,
    input: Value,
    cancel: Option<&CancelSignal>,
) -> Result<RunReport, PipelineError> {
    let input: VendorRiskInput = parse_input(input)?;
    let definition = definition();
    let executor = PipelineExecutor::new(deps.clone());
    let run = executor
        .run(&definition, VendorRiskContext::new(tenant_id, input), cancel)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CannedCompletionClient;
    use crate::store::{ComplianceStore, InMemoryStore};

    fn vendor(id: &str) -> Vendor {
        Vendor {
            id: id.into(),
            tenant_id: "acme".into(),
            name: "CloudCo".into(),
            services: "Managed database hosting".into(),
            score: None,
            tier: None,
            analysis: Vec::new(),
            last_assessed_at: None,
        }
    }

    fn analysis_response(levels: [u8; 5]) -> String {
        serde_json::json!({
            "dimensions": DIMENSION_WEIGHTS
                .iter()
                .zip(levels)
                .map(|((name, _), level)| serde_json::json!({
                    "dimension": name,
                    "level": level,
                    "rationale": "because",
                }))
                .collect::<Vec<_>>()
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_vendor_assessment_persists_score() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_vendor(vendor("v1"));
        let deps = PipelineDeps::new(
            store.clone(),
            Arc::new(CannedCompletionClient::new(vec![analysis_response([
                3, 3, 3, 3, 3,
            ])])),
        );

        let report = run(&deps, "acme", serde_json::json!({}), None).await.unwrap();
        assert_eq!(report.status, super::super::RunStatus::Completed);
        assert_eq!(report.summary["assessed"], 1);

        let vendors = store.list_vendors("acme").await.unwrap();
        assert_eq!(vendors[0].score, Some(60));
        assert_eq!(vendors[0].tier, Some(RiskTier::High));
        assert!(vendors[0].last_assessed_at.is_some());
    }

    #[tokio::test]
    async fn test_no_vendors_fatal() {
        let deps = PipelineDeps::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(CannedCompletionClient::new(vec![])),
        );
        let report = run(&deps, "acme", serde_json::json!({}), None).await.unwrap();
        assert_eq!(report.status, super::super::RunStatus::Failed);
        assert_eq!(report.failed_stage, Some("load_vendors"));
    }
}
