//! Monitoring pipeline — fully deterministic, no completion client.
//!
//! Runs every active rule's check, isolates per-rule failures, detects
//! outcome drift against each rule's previous result, and aggregates a
//! summary for the caller.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{parse_input, report_from, RunReport};
use crate::engine::{
    CancelSignal, PipelineDefinition, PipelineDeps, PipelineExecutor, RunCore, Stage, StageState,
};
use crate::error::{PipelineError, StageError};
use crate::monitor::checks::{CheckExecution, CheckRunner};
use crate::monitor::drift::{self, DriftRecord};
use crate::store::{CheckStatus, MonitoringRule};

pub const WORKFLOW: &str = "monitoring";

#[derive(Debug, Default, Deserialize)]
pub struct MonitoringInput {
    /// Restrict the run to these rules; the scheduler passes exactly one id
    /// per trigger firing. All active rules otherwise.
    #[serde(default)]
    pub rule_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoringSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    /// passed / total * 100, rounded to one decimal.
    pub pass_rate: f64,
    pub alerts_created: usize,
    pub alert_ids: Vec<String>,
    pub drift_events: Vec<DriftRecord>,
}

pub struct MonitoringContext {
    core: RunCore,
    input: MonitoringInput,
    /// Rule snapshots taken before any result is persisted; drift detection
    /// compares against these, not the refreshed records.
    rules: Vec<MonitoringRule>,
    executions: Vec<CheckExecution>,
    drifts: Vec<DriftRecord>,
    summary: Option<MonitoringSummary>,
}

impl MonitoringContext {
    pub fn new(tenant_id: &str, input: MonitoringInput) -> Self {
        Self {
            core: RunCore::new(tenant_id, None),
            input,
            rules: Vec::new(),
            executions: Vec::new(),
            drifts: Vec::new(),
            summary: None,
        }
    }

    pub fn summary(&self) -> Option<&MonitoringSummary> {
        self.summary.as_ref()
    }
}

impl StageState for MonitoringContext {
    fn core(&self) -> &RunCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut RunCore {
        &mut self.core
    }
}

struct LoadActiveRules;

#[async_trait]
impl Stage<MonitoringContext> for LoadActiveRules {
    fn name(&self) -> &'static str {
        "load_active_rules"
    }

    async fn run(
        &self,
        ctx: &mut MonitoringContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let mut rules = deps
            .store
            .monitoring_rules(&ctx.core.tenant_id, true)
            .await?;
        if let Some(ids) = &ctx.input.rule_ids {
            rules.retain(|r| ids.contains(&r.id));
        }
        if rules.is_empty() {
            return Err(StageError::InputNotFound(
                "no active monitoring rules".into(),
            ));
        }
        ctx.rules = rules;
        Ok(())
    }
}

struct RunChecks;

#[async_trait]
impl Stage<MonitoringContext> for RunChecks {
    fn name(&self) -> &'static str {
        "run_checks"
    }

    async fn run(
        &self,
        ctx: &mut MonitoringContext,
        deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let mut executions = Vec::with_capacity(ctx.rules.len());
        for rule in &ctx.rules {
            // Per-rule check failures are isolated inside the runner; only
            // persistence failures surface here and abort the batch.
            executions.push(CheckRunner::execute(deps.store.as_ref(), rule).await?);
        }
        ctx.executions = executions;
        Ok(())
    }
}

struct DetectDrift;

#[async_trait]
impl Stage<MonitoringContext> for DetectDrift {
    fn name(&self) -> &'static str {
        "detect_drift"
    }

    async fn run(
        &self,
        ctx: &mut MonitoringContext,
        _deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let mut drifts = Vec::new();
        for execution in &ctx.executions {
            let Some(rule) = ctx.rules.iter().find(|r| r.id == execution.rule_id) else {
                continue;
            };
            if let Some(record) = drift::detect(rule, execution.status) {
                drifts.push(record);
            }
        }
        ctx.drifts = drifts;
        Ok(())
    }
}

struct Summarize;

#[async_trait]
impl Stage<MonitoringContext> for Summarize {
    fn name(&self) -> &'static str {
        "summarize"
    }

    async fn run(
        &self,
        ctx: &mut MonitoringContext,
        _deps: &PipelineDeps,
    ) -> Result<(), StageError> {
        let total = ctx.executions.len();
        let count = |wanted: CheckStatus| {
            ctx.executions
                .iter()
                .filter(|e| e.status == wanted)
                .count()
        };
        let passed = count(CheckStatus::Pass);
        let pass_rate = if total == 0 {
            0.0
        } else {
            (passed as f64 / total as f64 * 1000.0).round() / 10.0
        };
        let alert_ids: Vec<String> = ctx
            .executions
            .iter()
            .flat_map(|e| e.alert_ids.iter().cloned())
            .collect();

        ctx.summary = Some(MonitoringSummary {
            total,
            passed,
            failed: count(CheckStatus::Fail),
            errored: count(CheckStatus::Error),
            pass_rate,
            alerts_created: alert_ids.len(),
            alert_ids,
            drift_events: ctx.drifts.clone(),
        });
        Ok(())
    }
}

pub fn definition() -> PipelineDefinition<MonitoringContext> {
    PipelineDefinition::new(WORKFLOW)
        .stage(LoadActiveRules)
        .stage(RunChecks)
        .stage(DetectDrift)
        .stage(Summarize)
}

pub async fn run(
    deps: &Arc<PipelineDeps>,
    tenant_id: &str,
    input: Value,
    cancel: Option<&CancelSignal>,
) -> Result<RunReport, PipelineError> {
    let input: MonitoringInput = parse_input(input)?;
    let definition = definition();
    let executor = PipelineExecutor::new(deps.clone());
    let run = executor
        .run(&definition, MonitoringContext::new(tenant_id, input), cancel)
        .await;

    let summary = run
        .context
        .summary()
        .map(|s| serde_json::to_value(s).unwrap_or(Value::Null))
        .unwrap_or(Value::Null);
    Ok(report_from(WORKFLOW, &run, summary))
}
