//! Deterministic check runner for monitoring rules.
//!
//! Each rule's `check_type` dispatches to one evaluation against collaborator
//! data. A failure in the check logic itself is isolated to that rule and
//! recorded as outcome `error`; only store-write failures abort the batch.

use chrono::{Duration, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StageError;
use crate::store::{
    Alert, AlertSeverity, CheckStatus, ComplianceStore, ControlStatus, MonitoringRule,
};

/// Result of executing one rule, with the rule's pre-execution outcome kept
/// for drift detection.
#[derive(Debug, Clone)]
pub struct CheckExecution {
    pub rule_id: String,
    pub rule_name: String,
    pub previous: Option<CheckStatus>,
    pub status: CheckStatus,
    pub detail: String,
    pub alert_ids: Vec<String>,
}

struct Evaluation {
    passed: bool,
    detail: String,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct CheckError(String);

pub struct CheckRunner;

impl CheckRunner {
    /// Execute one rule: evaluate, create an alert on failure, persist the
    /// new `last_result`. Check-logic failures yield outcome `error` rather
    /// than an `Err`; persistence failures propagate.
    pub async fn execute(
        store: &dyn ComplianceStore,
        rule: &MonitoringRule,
    ) -> Result<CheckExecution, StageError> {
        let mut execution = CheckExecution {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            previous: rule.last_result,
            status: CheckStatus::Error,
            detail: String::new(),
            alert_ids: Vec::new(),
        };

        match Self::evaluate(store, rule).await {
            Ok(eval) => {
                execution.status = if eval.passed {
                    CheckStatus::Pass
                } else {
                    CheckStatus::Fail
                };
                execution.detail = eval.detail;
            }
            Err(e) => {
                tracing::warn!(rule_id = %rule.id, error = %e, "check execution failed");
                execution.status = CheckStatus::Error;
                execution.detail = e.to_string();
            }
        }

        if execution.status == CheckStatus::Fail {
            let alert = Alert {
                id: Uuid::new_v4().to_string(),
                tenant_id: rule.tenant_id.clone(),
                rule_id: rule.id.clone(),
                severity: AlertSeverity::Warning,
                message: format!("{}: {}", rule.name, execution.detail),
                created_at: Utc::now(),
            };
            execution.alert_ids.push(alert.id.clone());
            store.create_alert(alert).await?;
        }

        store
            .update_rule_result(&rule.tenant_id, &rule.id, execution.status, Utc::now())
            .await?;

        Ok(execution)
    }

    async fn evaluate(
        store: &dyn ComplianceStore,
        rule: &MonitoringRule,
    ) -> Result<Evaluation, CheckError> {
        match rule.check_type.as_str() {
            "control_implementation" => Self::control_implementation(store, rule).await,
            "evidence_freshness" => Self::evidence_freshness(store, rule).await,
            "policy_review" => Self::policy_review(store, rule).await,
            "vendor_assessment" => Self::vendor_assessment(store, rule).await,
            "training_completion" => Self::training_completion(store, rule).await,
            other => Err(CheckError(format!("unknown check type: {other}"))),
        }
    }

    async fn control_implementation(
        store: &dyn ComplianceStore,
        rule: &MonitoringRule,
    ) -> Result<Evaluation, CheckError> {
        let max_unimplemented = cfg_u64(&rule.config, "max_unimplemented", 0);
        let controls = store
            .list_controls(&rule.tenant_id)
            .await
            .map_err(|e| CheckError(e.to_string()))?;
        let open = controls
            .iter()
            .filter(|c| {
                !matches!(
                    c.status,
                    ControlStatus::Implemented | ControlStatus::NotApplicable
                )
            })
            .count() as u64;
        Ok(Evaluation {
            passed: open <= max_unimplemented,
            detail: format!("{open} of {} controls not implemented", controls.len()),
        })
    }

    async fn evidence_freshness(
        store: &dyn ComplianceStore,
        rule: &MonitoringRule,
    ) -> Result<Evaluation, CheckError> {
        let max_age_days = cfg_u64(&rule.config, "max_age_days", 90) as i64;
        let cutoff = Utc::now() - Duration::days(max_age_days);
        let evidence = store
            .list_evidence(&rule.tenant_id)
            .await
            .map_err(|e| CheckError(e.to_string()))?;
        let stale = evidence
            .iter()
            .filter(|e| e.collected_at.is_some_and(|at| at < cutoff))
            .count();
        Ok(Evaluation {
            passed: stale == 0,
            detail: format!("{stale} evidence items older than {max_age_days} days"),
        })
    }

    async fn policy_review(
        store: &dyn ComplianceStore,
        rule: &MonitoringRule,
    ) -> Result<Evaluation, CheckError> {
        let now = Utc::now();
        let policies = store
            .list_policies(&rule.tenant_id)
            .await
            .map_err(|e| CheckError(e.to_string()))?;
        let overdue = policies
            .iter()
            .filter(|p| p.next_review_at.is_some_and(|at| at < now))
            .count();
        Ok(Evaluation {
            passed: overdue == 0,
            detail: format!("{overdue} policies overdue for review"),
        })
    }

    async fn vendor_assessment(
        store: &dyn ComplianceStore,
        rule: &MonitoringRule,
    ) -> Result<Evaluation, CheckError> {
        let max_age_days = cfg_u64(&rule.config, "max_age_days", 180) as i64;
        let cutoff = Utc::now() - Duration::days(max_age_days);
        let vendors = store
            .list_vendors(&rule.tenant_id)
            .await
            .map_err(|e| CheckError(e.to_string()))?;
        let unassessed = vendors
            .iter()
            .filter(|v| v.last_assessed_at.is_none_or(|at| at < cutoff))
            .count();
        Ok(Evaluation {
            passed: unassessed == 0,
            detail: format!("{unassessed} vendors without a recent assessment"),
        })
    }

    async fn training_completion(
        store: &dyn ComplianceStore,
        rule: &MonitoringRule,
    ) -> Result<Evaluation, CheckError> {
        let min_pct = cfg_f64(&rule.config, "min_completion_pct", 90.0);
        let records = store
            .list_training(&rule.tenant_id)
            .await
            .map_err(|e| CheckError(e.to_string()))?;
        if records.is_empty() {
            return Ok(Evaluation {
                passed: true,
                detail: "no training records assigned".into(),
            });
        }
        let completed = records.iter().filter(|r| r.completed).count();
        let pct = completed as f64 / records.len() as f64 * 100.0;
        Ok(Evaluation {
            passed: pct >= min_pct,
            detail: format!("{pct:.1}% of {} assignments completed", records.len()),
        })
    }
}

fn cfg_u64(config: &Value, key: &str, default: u64) -> u64 {
    config.get(key).and_then(Value::as_u64).unwrap_or(default)
}

fn cfg_f64(config: &Value, key: &str, default: f64) -> f64 {
    config.get(key).and_then(Value::as_f64).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EvidenceItem, EvidenceStatus, InMemoryStore, ScheduleBucket};

    fn rule(check_type: &str, config: Value) -> MonitoringRule {
        MonitoringRule {
            id: "r1".into(),
            tenant_id: "acme".into(),
            name: "test rule".into(),
            check_type: check_type.into(),
            schedule: ScheduleBucket::Daily,
            active: true,
            config,
            last_result: None,
            last_checked_at: None,
        }
    }

    fn evidence(id: &str, age_days: i64) -> EvidenceItem {
        EvidenceItem {
            id: id.into(),
            tenant_id: "acme".into(),
            control_id: "c1".into(),
            title: "scan report".into(),
            description: String::new(),
            status: EvidenceStatus::Collected,
            collected_at: Some(Utc::now() - Duration::days(age_days)),
        }
    }

    #[tokio::test]
    async fn test_evidence_freshness_pass_and_fail() {
        let store = InMemoryStore::new();
        let rule = rule("evidence_freshness", serde_json::json!({"max_age_days": 30}));
        store.seed_rule(rule.clone());
        store.seed_evidence(evidence("e1", 5));

        let exec = CheckRunner::execute(&store, &rule).await.unwrap();
        assert_eq!(exec.status, CheckStatus::Pass);
        assert!(exec.alert_ids.is_empty());

        store.seed_evidence(evidence("e2", 60));
        let exec = CheckRunner::execute(&store, &rule).await.unwrap();
        assert_eq!(exec.status, CheckStatus::Fail);
        assert_eq!(exec.alert_ids.len(), 1);
        assert_eq!(store.alerts("acme").len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_check_type_is_error_outcome() {
        let store = InMemoryStore::new();
        let rule = rule("quantum_entanglement", Value::Null);
        store.seed_rule(rule.clone());

        let exec = CheckRunner::execute(&store, &rule).await.unwrap();
        assert_eq!(exec.status, CheckStatus::Error);
        assert!(exec.detail.contains("unknown check type"));
        // Errors do not raise alerts.
        assert!(store.alerts("acme").is_empty());
    }

    #[tokio::test]
    async fn test_execute_persists_last_result() {
        let store = InMemoryStore::new();
        let rule = rule("evidence_freshness", Value::Null);
        store.seed_rule(rule.clone());

        let exec = CheckRunner::execute(&store, &rule).await.unwrap();
        assert_eq!(exec.previous, None);
        let updated = store.rule("r1").unwrap();
        assert_eq!(updated.last_result, Some(CheckStatus::Pass));
        assert!(updated.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_training_completion_threshold() {
        use crate::store::TrainingRecord;
        let store = InMemoryStore::new();
        let rule = rule(
            "training_completion",
            serde_json::json!({"min_completion_pct": 75.0}),
        );
        store.seed_rule(rule.clone());
        for (i, done) in [true, true, true, false].iter().enumerate() {
            store.seed_training(TrainingRecord {
                id: format!("t{i}"),
                tenant_id: "acme".into(),
                user_id: format!("u{i}"),
                course: "security awareness".into(),
                completed: *done,
                due_at: None,
            });
        }

        let exec = CheckRunner::execute(&store, &rule).await.unwrap();
        // 75% completed meets the 75% threshold.
        assert_eq!(exec.status, CheckStatus::Pass);
    }
}
