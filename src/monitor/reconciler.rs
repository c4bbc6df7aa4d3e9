//! Schedule reconciler.
//!
//! Keeps the installed set of periodic monitoring triggers consistent with
//! the active rule records. Reconciliation always recomputes the desired set
//! from current records and diffs it against what is actually installed; it
//! never assumes its own previous run succeeded, so re-running it on every
//! tick is safe.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::engine::{CancelSignal, PipelineDeps};
use crate::pipelines::{self, monitoring, RunStatus};
use crate::store::{MonitoringRule, ScheduleBucket};

/// Trigger identity is derived deterministically from the rule id so a
/// reschedule keeps the same identity.
pub fn trigger_id(rule_id: &str) -> String {
    format!("trigger-{rule_id}")
}

/// Interval for a schedule bucket. Unrecognized buckets default to daily.
pub fn interval_for(bucket: ScheduleBucket) -> Duration {
    match bucket {
        ScheduleBucket::Hourly => Duration::from_secs(60 * 60),
        ScheduleBucket::Daily => Duration::from_secs(24 * 60 * 60),
        ScheduleBucket::Weekly => Duration::from_secs(7 * 24 * 60 * 60),
        ScheduleBucket::Unknown => {
            tracing::warn!("unrecognized schedule bucket, defaulting to daily");
            Duration::from_secs(24 * 60 * 60)
        }
    }
}

struct InstalledTrigger {
    rule_id: String,
    tenant_id: String,
    interval: Duration,
    handle: JoinHandle<()>,
}

/// Diagnostics snapshot of one installed trigger.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerInfo {
    pub trigger_id: String,
    pub rule_id: String,
    pub tenant_id: String,
    pub interval_secs: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct ReconcileReport {
    pub installed: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.installed.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

pub struct ScheduleReconciler {
    deps: Arc<PipelineDeps>,
    triggers: DashMap<String, InstalledTrigger>,
}

impl ScheduleReconciler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self {
            deps,
            triggers: DashMap::new(),
        }
    }

    /// Diff the desired trigger set (derived from `rules`) against the
    /// installed set: install missing triggers, reschedule interval changes
    /// in place, remove triggers whose rule is gone or inactive.
    pub async fn reconcile(&self, rules: &[MonitoringRule]) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let desired: Vec<(String, &MonitoringRule, Duration)> = rules
            .iter()
            .filter(|r| r.active)
            .map(|r| (trigger_id(&r.id), r, interval_for(r.schedule)))
            .collect();

        let stale: Vec<String> = self
            .triggers
            .iter()
            .filter(|entry| !desired.iter().any(|(id, _, _)| id == entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for id in stale {
            if let Some((id, trigger)) = self.triggers.remove(&id) {
                trigger.handle.abort();
                tracing::info!(trigger_id = %id, rule_id = %trigger.rule_id, "trigger removed");
                report.removed.push(id);
            }
        }

        for (id, rule, interval) in desired {
            let current_interval = self.triggers.get(&id).map(|t| t.interval);
            match current_interval {
                Some(current) if current == interval => {}
                Some(_) => {
                    if let Some((_, old)) = self.triggers.remove(&id) {
                        old.handle.abort();
                    }
                    self.triggers.insert(id.clone(), self.spawn_trigger(rule, interval));
                    tracing::info!(trigger_id = %id, ?interval, "trigger rescheduled");
                    report.updated.push(id);
                }
                None => {
                    self.triggers.insert(id.clone(), self.spawn_trigger(rule, interval));
                    tracing::info!(trigger_id = %id, ?interval, "trigger installed");
                    report.installed.push(id);
                }
            }
        }

        report
    }

    /// Tick loop: reload active rules and reconcile on a fixed cadence until
    /// cancelled. Load failures are logged and the loop keeps going.
    pub async fn run(&self, period: Duration, cancel: CancelSignal) {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.shutdown();
                    return;
                }
                _ = ticker.tick() => {
                    match self.deps.store.active_rules().await {
                        Ok(rules) => {
                            let report = self.reconcile(&rules).await;
                            if !report.is_noop() {
                                tracing::info!(
                                    installed = report.installed.len(),
                                    updated = report.updated.len(),
                                    removed = report.removed.len(),
                                    "schedules reconciled"
                                );
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to load rules for reconciliation");
                        }
                    }
                }
            }
        }
    }

    pub fn installed_triggers(&self) -> Vec<TriggerInfo> {
        self.triggers
            .iter()
            .map(|entry| TriggerInfo {
                trigger_id: entry.key().clone(),
                rule_id: entry.rule_id.clone(),
                tenant_id: entry.tenant_id.clone(),
                interval_secs: entry.interval.as_secs(),
            })
            .collect()
    }

    pub fn shutdown(&self) {
        for entry in self.triggers.iter() {
            entry.handle.abort();
        }
        self.triggers.clear();
    }

    /// One task per trigger. The interval's immediate first tick is consumed
    /// so the first firing happens one full interval after install. A firing
    /// that fails is logged and the trigger stays scheduled.
    fn spawn_trigger(&self, rule: &MonitoringRule, interval: Duration) -> InstalledTrigger {
        let deps = self.deps.clone();
        let tenant_id = rule.tenant_id.clone();
        let rule_id = rule.id.clone();
        let task_tenant = tenant_id.clone();
        let task_rule = rule_id.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let input = serde_json::json!({ "rule_ids": [task_rule.clone()] });
                match pipelines::run_pipeline(&deps, monitoring::WORKFLOW, &task_tenant, input)
                    .await
                {
                    Ok(report) if report.status == RunStatus::Failed => {
                        tracing::warn!(
                            rule_id = %task_rule,
                            stage = ?report.failed_stage,
                            error = ?report.error,
                            "scheduled monitoring run failed"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(rule_id = %task_rule, error = %e, "scheduled monitoring run rejected");
                    }
                }
            }
        });

        InstalledTrigger {
            rule_id,
            tenant_id,
            interval,
            handle,
        }
    }
}

impl Drop for ScheduleReconciler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CannedCompletionClient;
    use crate::store::{CheckStatus, ComplianceStore, InMemoryStore};

    fn rule(id: &str, schedule: ScheduleBucket, active: bool) -> MonitoringRule {
        MonitoringRule {
            id: id.into(),
            tenant_id: "acme".into(),
            name: format!("rule {id}"),
            check_type: "evidence_freshness".into(),
            schedule,
            active,
            config: serde_json::Value::Null,
            last_result: None,
            last_checked_at: None,
        }
    }

    fn reconciler_with(store: Arc<InMemoryStore>) -> ScheduleReconciler {
        ScheduleReconciler::new(PipelineDeps::new(
            store,
            Arc::new(CannedCompletionClient::new(vec![])),
        ))
    }

    #[test]
    fn test_interval_resolution() {
        assert_eq!(interval_for(ScheduleBucket::Hourly).as_secs(), 3600);
        assert_eq!(interval_for(ScheduleBucket::Daily).as_secs(), 86400);
        assert_eq!(interval_for(ScheduleBucket::Weekly).as_secs(), 604800);
        assert_eq!(interval_for(ScheduleBucket::Unknown).as_secs(), 86400);
    }

    #[tokio::test]
    async fn test_install_then_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = reconciler_with(store);
        let rules = vec![
            rule("r1", ScheduleBucket::Hourly, true),
            rule("r2", ScheduleBucket::Daily, true),
            rule("r3", ScheduleBucket::Weekly, true),
        ];

        let report = reconciler.reconcile(&rules).await;
        assert_eq!(report.installed.len(), 3);
        assert!(report.updated.is_empty());
        assert!(report.removed.is_empty());
        assert_eq!(reconciler.installed_triggers().len(), 3);

        // Unchanged rule set: the second pass is a no-op.
        let report = reconciler.reconcile(&rules).await;
        assert!(report.is_noop());
    }

    #[tokio::test]
    async fn test_schedule_flip_is_single_reschedule() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = reconciler_with(store);

        reconciler
            .reconcile(&[rule("r1", ScheduleBucket::Daily, true)])
            .await;
        let report = reconciler
            .reconcile(&[rule("r1", ScheduleBucket::Hourly, true)])
            .await;

        assert!(report.installed.is_empty());
        assert!(report.removed.is_empty());
        assert_eq!(report.updated, vec![trigger_id("r1")]);
        let triggers = reconciler.installed_triggers();
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].interval_secs, 3600);
    }

    #[tokio::test]
    async fn test_deactivated_rule_removed() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = reconciler_with(store);

        reconciler
            .reconcile(&[rule("r1", ScheduleBucket::Daily, true)])
            .await;
        let report = reconciler
            .reconcile(&[rule("r1", ScheduleBucket::Daily, false)])
            .await;

        assert_eq!(report.removed, vec![trigger_id("r1")]);
        assert!(reconciler.installed_triggers().is_empty());

        // Deleted rule behaves the same as a deactivated one.
        reconciler
            .reconcile(&[rule("r1", ScheduleBucket::Daily, true)])
            .await;
        let report = reconciler.reconcile(&[]).await;
        assert_eq!(report.removed, vec![trigger_id("r1")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_firing_runs_monitoring() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_rule(rule("r1", ScheduleBucket::Hourly, true));
        let reconciler = reconciler_with(store.clone());

        let rules = store.active_rules().await.unwrap();
        reconciler.reconcile(&rules).await;
        assert!(store.rule("r1").unwrap().last_result.is_none());

        // Advance past one hourly interval; the paused clock only moves when
        // every task is idle, so the trigger task gets to run.
        tokio::time::sleep(Duration::from_secs(3601)).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        let fired = store.rule("r1").unwrap();
        assert_eq!(fired.last_result, Some(CheckStatus::Pass));
        assert!(fired.last_checked_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_firing_keeps_trigger_installed() {
        let store = Arc::new(InMemoryStore::new());
        // Rule exists for reconciliation but is then deleted from the store,
        // so each firing fails its load stage.
        store.seed_rule(rule("r1", ScheduleBucket::Hourly, true));
        let reconciler = reconciler_with(store.clone());

        let rules = store.active_rules().await.unwrap();
        reconciler.reconcile(&rules).await;
        store.remove_rule("r1");

        tokio::time::sleep(Duration::from_secs(3601)).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        // The firing failed but the trigger is still installed.
        assert_eq!(reconciler.installed_triggers().len(), 1);
    }
}
