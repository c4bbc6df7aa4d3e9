//! End-to-end monitoring scenario: reconcile three schedules, run the
//! pipeline twice, observe exactly one degradation drift after an outcome
//! flip.

use std::sync::Arc;

use chrono::{Duration, Utc};
use grcflow::engine::PipelineDeps;
use grcflow::llm::CannedCompletionClient;
use grcflow::monitor::ScheduleReconciler;
use grcflow::pipelines::{monitoring, run_pipeline, RunStatus};
use grcflow::store::{
    CheckStatus, ComplianceStore, EvidenceItem, EvidenceStatus, InMemoryStore, MonitoringRule,
    ScheduleBucket, Vendor,
};

fn rule(id: &str, check_type: &str, schedule: ScheduleBucket) -> MonitoringRule {
    MonitoringRule {
        id: id.into(),
        tenant_id: "acme".into(),
        name: format!("rule {id}"),
        check_type: check_type.into(),
        schedule,
        active: true,
        config: serde_json::Value::Null,
        last_result: None,
        last_checked_at: None,
    }
}

fn deps_with(store: Arc<InMemoryStore>) -> Arc<PipelineDeps> {
    PipelineDeps::new(store, Arc::new(CannedCompletionClient::new(vec![])))
}

#[tokio::test]
async fn full_monitoring_cycle_with_drift() {
    let store = Arc::new(InMemoryStore::new());
    store.seed_rule(rule("r-hourly", "evidence_freshness", ScheduleBucket::Hourly));
    store.seed_rule(rule("r-daily", "policy_review", ScheduleBucket::Daily));
    store.seed_rule(rule("r-weekly", "vendor_assessment", ScheduleBucket::Weekly));
    // A vendor that has never been assessed makes the weekly rule fail from
    // the first run onward.
    store.seed_vendor(Vendor {
        id: "v1".into(),
        tenant_id: "acme".into(),
        name: "CloudCo".into(),
        services: "Hosting".into(),
        score: None,
        tier: None,
        analysis: Vec::new(),
        last_assessed_at: None,
    });
    let deps = deps_with(store.clone());

    // First reconciliation installs exactly one trigger per active rule.
    let reconciler = ScheduleReconciler::new(deps.clone());
    let rules = store.active_rules().await.unwrap();
    let report = reconciler.reconcile(&rules).await;
    assert_eq!(report.installed.len(), 3);
    assert!(report.updated.is_empty() && report.removed.is_empty());

    // First monitoring run: every rule gets a recorded result, nothing has
    // a previous outcome so there is no drift.
    let first = run_pipeline(&deps, monitoring::WORKFLOW, "acme", serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(first.status, RunStatus::Completed);
    assert_eq!(first.summary["total"], 3);
    assert_eq!(first.summary["drift_events"].as_array().unwrap().len(), 0);
    for id in ["r-hourly", "r-daily", "r-weekly"] {
        assert!(store.rule(id).unwrap().last_result.is_some());
    }
    // vendor_assessment fails outright: the vendor has never been assessed.
    assert_eq!(store.rule("r-weekly").unwrap().last_result, Some(CheckStatus::Fail));
    assert_eq!(store.rule("r-hourly").unwrap().last_result, Some(CheckStatus::Pass));

    // Flip the evidence rule from pass to fail by aging an item past the
    // default 90-day window.
    store.seed_evidence(EvidenceItem {
        id: "e-old".into(),
        tenant_id: "acme".into(),
        control_id: "c1".into(),
        title: "stale pentest report".into(),
        description: String::new(),
        status: EvidenceStatus::Collected,
        collected_at: Some(Utc::now() - Duration::days(365)),
    });

    let second = run_pipeline(&deps, monitoring::WORKFLOW, "acme", serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(second.status, RunStatus::Completed);
    let drifts = second.summary["drift_events"].as_array().unwrap();
    assert_eq!(drifts.len(), 1);
    assert_eq!(drifts[0]["rule_id"], "r-hourly");
    assert_eq!(drifts[0]["kind"], "degradation");
    assert_eq!(drifts[0]["previous"], "pass");
    assert_eq!(drifts[0]["current"], "fail");

    // The failing rules raised alerts both runs; drift is only the flip.
    assert!(second.summary["alerts_created"].as_u64().unwrap() >= 1);

    reconciler.shutdown();
}

#[tokio::test]
async fn check_errors_do_not_fail_the_batch() {
    let store = Arc::new(InMemoryStore::new());
    store.seed_rule(rule("ok", "evidence_freshness", ScheduleBucket::Daily));
    store.seed_rule(rule("broken", "definitely_not_a_check", ScheduleBucket::Daily));
    let deps = deps_with(store.clone());

    let report = run_pipeline(&deps, monitoring::WORKFLOW, "acme", serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.summary["errored"], 1);
    assert_eq!(report.summary["passed"], 1);
    assert_eq!(report.summary["pass_rate"], 50.0);
    assert_eq!(store.rule("broken").unwrap().last_result, Some(CheckStatus::Error));
}
