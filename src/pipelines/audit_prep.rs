//! Audit-preparation pipeline.
//!
//! Loads the audit scope, computes evidence coverage per in-scope control,
//! asks the completion client for gap findings, then drafts workpaper
//! summaries and an overall effectiveness conclusion.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::generation::parse_items;
use super::{parse_input, report_from, RunReport};
use crate::engine::{
    CancelSignal, PipelineDefinition, PipelineDeps, PipelineExecutor, RunCore, Stage, StageState,
};
use crate::error::{PipelineError, StageError};
use crate::llm::{ChatMessage, CompletionOptions};
use crate::store::{Audit, Control, EvidenceItem};

pub const WORKFLOW: &str = "audit_preparation";

#[derive(Debug, Deserialize)]
pub struct AuditPrepInput {
    pub audit_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GapSeverity {
    Critical,
    Major,
    Minor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditGap {
    pub control_id: String,
    pub severity: GapSeverity,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workpaper {
    pub control_id: String,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditConclusion {
    Effective,
    EffectiveWithExceptions,
    NotEffective,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlCoverage {
    pub control_id: String,
    pub evidence_count: usize,
}

pub struct AuditPrepContext {
    core: RunCore,
    input: AuditPrepInput,
    audit: Option<Audit>,
    controls: Vec<Control>,
    evidence: Vec<EvidenceItem>,
    coverage: Vec<ControlCoverage>,
    gaps: Vec<AuditGap>,
    workpapers: Vec<Workpaper>,
    conclusion: Option<AuditConclusion>,
}

impl AuditPrepContext {
    pub fn new(tenant_id: &str, input: AuditPrepInput) -> Self {
        Self {
            core: RunCore::new(tenant_id, None),
            input,
            audit: None,
            controls: Vec::new(),
            evidence: Vec::new(),
            coverage: Vec::new(),
            gaps: Vec::new(),
            workpapers: Vec::new(),
            conclusion: None,
        }
    }

    fn covered_controls(&self) -> Vec<&Control> {
        self.controls
            .iter()
            .filter(|c| {
                self.coverage
                    .iter()
                    .any(|cov| cov.control_id == c.id && cov.evidence_count > 0)
            })
            .collect()
    }
}

impl StageState for AuditPrepContext {
    fn core(&self) -> &RunCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut RunCore {
        &mut self.core
    }
}

struct LoadAuditScope;

#[async_trait]
impl Stage<AuditPrepContext> for LoadAuditScope {
    fn name(&self) -> &'static str {
        "load_audit_scope"
    }

    async fn run(
        &self,
        ctx: &mut AuditPrepContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let audit = deps
            .store
            .audit(&ctx.core.tenant_id, &ctx.input.audit_id)
            .await?
            .ok_or_else(|| {
                StageError::InputNotFound(format!("audit {} not found", ctx.input.audit_id))
            })?;

        let controls = deps.store.list_controls(&ctx.core.tenant_id).await?;
        let in_scope: Vec<Control> = controls
            .into_iter()
            .filter(|c| audit.control_ids.contains(&c.id))
            .collect();
        if in_scope.is_empty() {
            return Err(StageError::InputNotFound(
                "audit scope contains no known controls".into(),
            ));
        }

        ctx.evidence = deps.store.list_evidence(&ctx.core.tenant_id).await?;
        ctx.audit = Some(audit);
        ctx.controls = in_scope;
        Ok(())
    }
}

struct ComputeCoverage;

#[async_trait]
impl Stage<AuditPrepContext> for ComputeCoverage {
    fn name(&self) -> &'static str {
        "compute_coverage"
    }

    async fn run(
        &self,
        ctx: &mut AuditPrepContext,
        _deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        ctx.coverage = ctx
            .controls
            .iter()
            .map(|control| ControlCoverage {
                control_id: control.id.clone(),
                evidence_count: ctx
                    .evidence
                    .iter()
                    .filter(|e| e.control_id == control.id)
                    .count(),
            })
            .collect();
        Ok(())
    }
}

struct IdentifyGaps;

#[async_trait]
impl Stage<AuditPrepContext> for IdentifyGaps {
    fn name(&self) -> &'static str {
        "identify_gaps"
    }

    async fn run(
        &self,
        ctx: &mut AuditPrepContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let coverage_lines = ctx
            .controls
            .iter()
            .map(|c| {
                let count = ctx
                    .coverage
                    .iter()
                    .find(|cov| cov.control_id == c.id)
                    .map(|cov| cov.evidence_count)
                    .unwrap_or(0);
                format!(
                    "- id: {} | {} | status: {:?} | evidence items: {count}",
                    c.id, c.name, c.status
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let messages = vec![
            ChatMessage::system(
                "You are an audit readiness reviewer. Identify evidence or implementation \
                 gaps. Respond with a JSON object {\"gaps\": [{\"control_id\", \"severity\", \
                 \"description\"}]} where severity is one of critical, major, minor. An empty \
                 list is a valid answer.",
            ),
            ChatMessage::user(format!("Controls in audit scope:\n{coverage_lines}")),
        ];

        let response = deps
            .llm
            .complete_structured(messages, CompletionOptions::default())
            .await?;
        let mut gaps: Vec<AuditGap> = parse_items(&response, "gaps")?;
        gaps.retain(|g| ctx.controls.iter().any(|c| c.id == g.control_id));
        ctx.gaps = gaps;
        Ok(())
    }
}

struct DraftWorkpapers;

#[async_trait]
impl Stage<AuditPrepContext> for DraftWorkpapers {
    fn name(&self) -> &'static str {
        "draft_workpapers"
    }

    async fn run(
        &self,
        ctx: &mut AuditPrepContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let covered = ctx.covered_controls();
        if covered.is_empty() {
            // Nothing to summarize; the conclusion still has to be drawn
            // from the gap list alone.
            ctx.conclusion = Some(if ctx.gaps.is_empty() {
                AuditConclusion::Effective
            } else {
                AuditConclusion::NotEffective
            });
            return Ok(());
        }

        let control_lines = covered
            .iter()
            .map(|c| {
                let titles = ctx
                    .evidence
                    .iter()
                    .filter(|e| e.control_id == c.id)
                    .map(|e| e.title.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                format!("- id: {} | {} | evidence: {titles}", c.id, c.name)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let messages = vec![
            ChatMessage::system(
                "You are preparing audit workpapers. For each control draft a short summary \
                 of how its evidence supports operating effectiveness, then give an overall \
                 conclusion. Respond with a JSON object {\"workpapers\": [{\"control_id\", \
                 \"summary\"}], \"conclusion\": one of \"effective\", \
                 \"effective_with_exceptions\", \"not_effective\"}.",
            ),
            ChatMessage::user(format!("Controls with evidence:\n{control_lines}")),
        ];

        let response = deps
            .llm
            .complete_structured(messages, CompletionOptions::default())
            .await?;
        let mut workpapers: Vec<Workpaper> = parse_items(&response, "workpapers")?;
        workpapers.retain(|w| ctx.controls.iter().any(|c| c.id == w.control_id));

        let conclusion: AuditConclusion = response
            .get("conclusion")
            .cloned()
            .ok_or_else(|| StageError::MalformedResponse("missing 'conclusion'".into()))
            .and_then(|v| {
                serde_json::from_value(v)
                    .map_err(|e| StageError::MalformedResponse(format!("bad conclusion: {e}")))
            })?;

        ctx.workpapers = workpapers;
        ctx.conclusion = Some(conclusion);
        Ok(())
    }
}

pub fn definition() -> PipelineDefinition<AuditPrepContext> {
    PipelineDefinition::new(WORKFLOW)
        .stage(LoadAuditScope)
        .stage(ComputeCoverage)
        .stage(IdentifyGaps)
        .stage(DraftWorkpapers)
}

pub async fn run(
    deps: &Arc<PipelineDeps>,
    tenant_id: &str,
    input: Value,
    cancel: Option<&CancelSignal>,
) -> Result<RunReport, PipelineError> {
    let input: AuditPrepInput = parse_input(input)?;
    let definition = definition();
    let executor = PipelineExecutor::new(deps.clone());
    let run = executor
        .run(&definition, AuditPrepContext::new(tenant_id, input), cancel)
        .await;

    let ctx = &run.context;
    let covered = ctx
        .coverage
        .iter()
        .filter(|c| c.evidence_count > 0)
        .count();
    let coverage_pct = if ctx.controls.is_empty() {
        0.0
    } else {
        (covered as f64 / ctx.controls.len() as f64 * 1000.0).round() / 10.0
    };
    let gap_count = |wanted: GapSeverity| {
        ctx.gaps.iter().filter(|g| g.severity == wanted).count()
    };
    let summary = serde_json::json!({
        "controls_in_scope": ctx.controls.len(),
        "coverage_pct": coverage_pct,
        "gaps": {
            "critical": gap_count(GapSeverity::Critical),
            "major": gap_count(GapSeverity::Major),
            "minor": gap_count(GapSeverity::Minor),
        },
        "workpapers": ctx.workpapers,
        "conclusion": ctx.conclusion,
    });
    Ok(report_from(WORKFLOW, &run, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CannedCompletionClient;
    use crate::store::{ControlStatus, EvidenceStatus, InMemoryStore};
    use chrono::Utc;

    fn control(id: &str) -> Control {
        Control {
            id: id.into(),
            tenant_id: "acme".into(),
            framework_id: "soc2".into(),
            requirement_code: "CC6.1".into(),
            name: format!("Control {id}"),
            description: "desc".into(),
            status: ControlStatus::Implemented,
            owner: None,
            implementation_notes: None,
            updated_at: Utc::now(),
        }
    }

    fn evidence(id: &str, control_id: &str) -> EvidenceItem {
        EvidenceItem {
            id: id.into(),
            tenant_id: "acme".into(),
            control_id: control_id.into(),
            title: format!("Evidence {id}"),
            description: String::new(),
            status: EvidenceStatus::Collected,
            collected_at: Some(Utc::now()),
        }
    }

    fn audit(control_ids: &[&str]) -> Audit {
        Audit {
            id: "a1".into(),
            tenant_id: "acme".into(),
            name: "SOC 2 Type II".into(),
            framework_id: "soc2".into(),
            period_start: Utc::now(),
            period_end: Utc::now(),
            control_ids: control_ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_missing_audit_fatal() {
        let deps = PipelineDeps::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(CannedCompletionClient::new(vec![])),
        );
        let report = run(&deps, "acme", serde_json::json!({"audit_id": "a1"}), None)
            .await
            .unwrap();
        assert_eq!(report.status, super::super::RunStatus::Failed);
        assert_eq!(report.failed_stage, Some("load_audit_scope"));
    }

    #[tokio::test]
    async fn test_full_preparation_flow() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_control(control("c1"));
        store.seed_control(control("c2"));
        store.seed_evidence(evidence("e1", "c1"));
        store.seed_audit(audit(&["c1", "c2"]));

        let gaps_response = serde_json::json!({
            "gaps": [{"control_id": "c2", "severity": "major", "description": "no evidence"}]
        })
        .to_string();
        let workpapers_response = serde_json::json!({
            "workpapers": [{"control_id": "c1", "summary": "Evidence supports operation."}],
            "conclusion": "effective_with_exceptions"
        })
        .to_string();
        let deps = PipelineDeps::new(
            store,
            Arc::new(CannedCompletionClient::new(vec![
                gaps_response,
                workpapers_response,
            ])),
        );

        let report = run(&deps, "acme", serde_json::json!({"audit_id": "a1"}), None)
            .await
            .unwrap();
        assert_eq!(report.status, super::super::RunStatus::Completed);
        assert_eq!(report.summary["controls_in_scope"], 2);
        assert_eq!(report.summary["coverage_pct"], 50.0);
        assert_eq!(report.summary["gaps"]["major"], 1);
        assert_eq!(report.summary["conclusion"], "effective_with_exceptions");
    }

    #[tokio::test]
    async fn test_invalid_conclusion_is_malformed() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_control(control("c1"));
        store.seed_evidence(evidence("e1", "c1"));
        store.seed_audit(audit(&["c1"]));

        let deps = PipelineDeps::new(
            store,
            Arc::new(CannedCompletionClient::new(vec![
                serde_json::json!({"gaps": []}).to_string(),
                serde_json::json!({"workpapers": [], "conclusion": "mostly_fine"}).to_string(),
            ])),
        );

        let report = run(&deps, "acme", serde_json::json!({"audit_id": "a1"}), None)
            .await
            .unwrap();
        assert_eq!(report.status, super::super::RunStatus::Failed);
        assert_eq!(report.failed_stage, Some("draft_workpapers"));
        assert!(report.error.unwrap().contains("malformed"));
    }

    #[tokio::test]
    async fn test_no_evidence_skips_model_workpapers() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_control(control("c1"));
        store.seed_audit(audit(&["c1"]));

        // Only the gap call gets a response; the workpaper stage must not
        // call the model at all when nothing has evidence.
        let deps = PipelineDeps::new(
            store,
            Arc::new(CannedCompletionClient::new(vec![
                serde_json::json!({"gaps": []}).to_string(),
            ])),
        );

        let report = run(&deps, "acme", serde_json::json!({"audit_id": "a1"}), None)
            .await
            .unwrap();
        assert_eq!(report.status, super::super::RunStatus::Completed);
        assert_eq!(report.summary["conclusion"], "effective");
        assert_eq!(report.summary["coverage_pct"], 0.0);
    }
}
