//! Reconciler contract tests driven through the store, the way the tick
//! loop uses it.

use std::sync::Arc;

use grcflow::engine::PipelineDeps;
use grcflow::llm::CannedCompletionClient;
use grcflow::monitor::{trigger_id, ScheduleReconciler};
use grcflow::store::{ComplianceStore, InMemoryStore, MonitoringRule, ScheduleBucket};

fn rule(id: &str, schedule: ScheduleBucket) -> MonitoringRule {
    MonitoringRule {
        id: id.into(),
        tenant_id: "acme".into(),
        name: format!("rule {id}"),
        check_type: "evidence_freshness".into(),
        schedule,
        active: true,
        config: serde_json::Value::Null,
        last_result: None,
        last_checked_at: None,
    }
}

#[tokio::test]
async fn repeated_reconcile_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    store.seed_rule(rule("r1", ScheduleBucket::Hourly));
    store.seed_rule(rule("r2", ScheduleBucket::Weekly));
    let deps = PipelineDeps::new(store.clone(), Arc::new(CannedCompletionClient::new(vec![])));
    let reconciler = ScheduleReconciler::new(deps);

    let rules = store.active_rules().await.unwrap();
    let first = reconciler.reconcile(&rules).await;
    assert_eq!(first.installed.len(), 2);

    let rules = store.active_rules().await.unwrap();
    let second = reconciler.reconcile(&rules).await;
    assert!(second.is_noop());

    reconciler.shutdown();
}

#[tokio::test]
async fn schedule_change_reschedules_in_place() {
    let store = Arc::new(InMemoryStore::new());
    store.seed_rule(rule("r1", ScheduleBucket::Daily));
    let deps = PipelineDeps::new(store.clone(), Arc::new(CannedCompletionClient::new(vec![])));
    let reconciler = ScheduleReconciler::new(deps);

    let rules = store.active_rules().await.unwrap();
    reconciler.reconcile(&rules).await;

    store.replace_rule(rule("r1", ScheduleBucket::Hourly));
    let rules = store.active_rules().await.unwrap();
    let report = reconciler.reconcile(&rules).await;

    assert_eq!(report.updated, vec![trigger_id("r1")]);
    assert!(report.installed.is_empty());
    assert!(report.removed.is_empty());

    // Same trigger identity, new interval.
    let triggers = reconciler.installed_triggers();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].trigger_id, trigger_id("r1"));
    assert_eq!(triggers[0].interval_secs, 3600);

    reconciler.shutdown();
}

#[tokio::test]
async fn rule_deletion_removes_trigger() {
    let store = Arc::new(InMemoryStore::new());
    store.seed_rule(rule("r1", ScheduleBucket::Daily));
    let deps = PipelineDeps::new(store.clone(), Arc::new(CannedCompletionClient::new(vec![])));
    let reconciler = ScheduleReconciler::new(deps);

    let rules = store.active_rules().await.unwrap();
    reconciler.reconcile(&rules).await;
    assert_eq!(reconciler.installed_triggers().len(), 1);

    store.remove_rule("r1");
    let rules = store.active_rules().await.unwrap();
    let report = reconciler.reconcile(&rules).await;
    assert_eq!(report.removed, vec![trigger_id("r1")]);
    assert!(reconciler.installed_triggers().is_empty());

    reconciler.shutdown();
}
