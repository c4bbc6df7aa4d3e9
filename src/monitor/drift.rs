//! Drift classification between consecutive check outcomes.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::{CheckStatus, MonitoringRule};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    Degradation,
    Improvement,
    Error,
}

/// Run-scoped drift event. Not persisted as its own entity; it travels in
/// the pipeline summary for alerting and review.
#[derive(Debug, Clone, Serialize)]
pub struct DriftRecord {
    pub rule_id: String,
    pub rule_name: String,
    pub previous: CheckStatus,
    pub current: CheckStatus,
    pub kind: DriftKind,
    pub detected_at: DateTime<Utc>,
}

/// Compare a rule's newly computed outcome against its previously recorded
/// one. No drift on the first-ever check or when the outcome is unchanged.
pub fn detect(rule: &MonitoringRule, new_outcome: CheckStatus) -> Option<DriftRecord> {
    let previous = rule.last_result?;
    if previous == new_outcome {
        return None;
    }
    let kind = match new_outcome {
        CheckStatus::Error => DriftKind::Error,
        CheckStatus::Fail => DriftKind::Degradation,
        CheckStatus::Pass => DriftKind::Improvement,
    };
    Some(DriftRecord {
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        previous,
        current: new_outcome,
        kind,
        detected_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ScheduleBucket;

    fn rule(last_result: Option<CheckStatus>) -> MonitoringRule {
        MonitoringRule {
            id: "r1".into(),
            tenant_id: "acme".into(),
            name: "evidence freshness".into(),
            check_type: "evidence_freshness".into(),
            schedule: ScheduleBucket::Daily,
            active: true,
            config: serde_json::Value::Null,
            last_result,
            last_checked_at: None,
        }
    }

    #[test]
    fn test_no_previous_no_drift() {
        assert!(detect(&rule(None), CheckStatus::Pass).is_none());
        assert!(detect(&rule(None), CheckStatus::Fail).is_none());
    }

    #[test]
    fn test_unchanged_no_drift() {
        assert!(detect(&rule(Some(CheckStatus::Fail)), CheckStatus::Fail).is_none());
        assert!(detect(&rule(Some(CheckStatus::Pass)), CheckStatus::Pass).is_none());
    }

    #[test]
    fn test_pass_to_fail_is_degradation() {
        let drift = detect(&rule(Some(CheckStatus::Pass)), CheckStatus::Fail).unwrap();
        assert_eq!(drift.kind, DriftKind::Degradation);
        assert_eq!(drift.previous, CheckStatus::Pass);
        assert_eq!(drift.current, CheckStatus::Fail);
    }

    #[test]
    fn test_fail_to_pass_is_improvement() {
        let drift = detect(&rule(Some(CheckStatus::Fail)), CheckStatus::Pass).unwrap();
        assert_eq!(drift.kind, DriftKind::Improvement);
    }

    #[test]
    fn test_any_to_error_is_error() {
        let drift = detect(&rule(Some(CheckStatus::Pass)), CheckStatus::Error).unwrap();
        assert_eq!(drift.kind, DriftKind::Error);
        let drift = detect(&rule(Some(CheckStatus::Fail)), CheckStatus::Error).unwrap();
        assert_eq!(drift.kind, DriftKind::Error);
    }

    #[test]
    fn test_error_to_fail_is_degradation() {
        let drift = detect(&rule(Some(CheckStatus::Error)), CheckStatus::Fail).unwrap();
        assert_eq!(drift.kind, DriftKind::Degradation);
    }
}
