use std::sync::Arc;

use chrono::{Duration, Utc};
use grcflow::engine::PipelineDeps;
use grcflow::llm::{CannedCompletionClient, CompletionConfig, CompletionClient, HttpCompletionClient};
use grcflow::monitor::ScheduleReconciler;
use grcflow::pipelines::{monitoring, run_pipeline};
use grcflow::store::{
    CompanyProfile, ComplianceStore, Control, ControlStatus, EvidenceItem, EvidenceStatus,
    InMemoryStore, MonitoringRule, ScheduleBucket,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== grcflow demo: monitoring + schedule reconciliation ===\n");

    let store = Arc::new(InMemoryStore::new());
    seed(&store);

    let llm: Arc<dyn CompletionClient> = match CompletionConfig::from_env() {
        Some(config) => match HttpCompletionClient::new(config) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                eprintln!("completion client misconfigured ({e}), using canned responses");
                Arc::new(CannedCompletionClient::new(vec![]))
            }
        },
        None => Arc::new(CannedCompletionClient::new(vec![])),
    };
    let deps = PipelineDeps::new(store.clone(), llm);

    let report = run_pipeline(&deps, monitoring::WORKFLOW, "acme", serde_json::json!({}))
        .await
        .expect("monitoring run");
    println!(
        "monitoring run {}: {:?}\nsummary: {}\n",
        report.run_id,
        report.status,
        serde_json::to_string_pretty(&report.summary).unwrap_or_default()
    );

    let reconciler = ScheduleReconciler::new(deps.clone());
    let rules = deps.store.active_rules().await.expect("load rules");
    let reconcile = reconciler.reconcile(&rules).await;
    println!(
        "reconciled schedules: {} installed, {} updated, {} removed",
        reconcile.installed.len(),
        reconcile.updated.len(),
        reconcile.removed.len()
    );
    for trigger in reconciler.installed_triggers() {
        println!(
            "  {} -> rule {} every {}s",
            trigger.trigger_id, trigger.rule_id, trigger.interval_secs
        );
    }
    reconciler.shutdown();
}

fn seed(store: &InMemoryStore) {
    store.seed_profile(CompanyProfile {
        tenant_id: "acme".into(),
        name: "Acme Analytics".into(),
        industry: "B2B SaaS".into(),
        size: "51-200".into(),
        cloud_providers: vec!["aws".into()],
        tech_stack: vec!["rust".into(), "postgres".into()],
        default_owner: Some("security-team".into()),
    });

    store.seed_control(Control {
        id: "ctl-access-review".into(),
        tenant_id: "acme".into(),
        framework_id: "soc2".into(),
        requirement_code: "CC6.1".into(),
        name: "Quarterly access review".into(),
        description: "Review user access to production systems every quarter.".into(),
        status: ControlStatus::Implemented,
        owner: Some("security-team".into()),
        implementation_notes: None,
        updated_at: Utc::now(),
    });

    store.seed_evidence(EvidenceItem {
        id: "ev-access-q2".into(),
        tenant_id: "acme".into(),
        control_id: "ctl-access-review".into(),
        title: "Q2 access review export".into(),
        description: "Signed-off review spreadsheet.".into(),
        status: EvidenceStatus::Collected,
        collected_at: Some(Utc::now() - Duration::days(10)),
    });

    for (id, name, check_type, schedule) in [
        (
            "rule-evidence",
            "Evidence freshness",
            "evidence_freshness",
            ScheduleBucket::Hourly,
        ),
        (
            "rule-controls",
            "Control implementation",
            "control_implementation",
            ScheduleBucket::Daily,
        ),
        (
            "rule-policies",
            "Policy review dates",
            "policy_review",
            ScheduleBucket::Weekly,
        ),
    ] {
        store.seed_rule(MonitoringRule {
            id: id.into(),
            tenant_id: "acme".into(),
            name: name.into(),
            check_type: check_type.into(),
            schedule,
            active: true,
            config: serde_json::Value::Null,
            last_result: None,
            last_checked_at: None,
        });
    }
}
