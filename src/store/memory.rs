//! In-memory store used by tests and the demo binary.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::records::*;
use super::{ComplianceStore, StoreError};

#[derive(Default)]
struct State {
    profiles: HashMap<String, CompanyProfile>,
    frameworks: HashMap<String, Framework>,
    policy_templates: Vec<PolicyTemplate>,
    controls: Vec<Control>,
    policies: Vec<PolicyDoc>,
    evidence: Vec<EvidenceItem>,
    risks: Vec<RiskEntry>,
    vendors: Vec<Vendor>,
    audits: Vec<Audit>,
    training: Vec<TrainingRecord>,
    rules: Vec<MonitoringRule>,
    alerts: Vec<Alert>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_profile(&self, profile: CompanyProfile) {
        self.state
            .write()
            .profiles
            .insert(profile.tenant_id.clone(), profile);
    }

    pub fn seed_framework(&self, framework: Framework) {
        self.state
            .write()
            .frameworks
            .insert(framework.id.clone(), framework);
    }

    pub fn seed_policy_template(&self, template: PolicyTemplate) {
        self.state.write().policy_templates.push(template);
    }

    pub fn seed_control(&self, control: Control) {
        self.state.write().controls.push(control);
    }

    pub fn seed_policy(&self, policy: PolicyDoc) {
        self.state.write().policies.push(policy);
    }

    pub fn seed_evidence(&self, item: EvidenceItem) {
        self.state.write().evidence.push(item);
    }

    pub fn seed_risk(&self, risk: RiskEntry) {
        self.state.write().risks.push(risk);
    }

    pub fn seed_vendor(&self, vendor: Vendor) {
        self.state.write().vendors.push(vendor);
    }

    pub fn seed_audit(&self, audit: Audit) {
        self.state.write().audits.push(audit);
    }

    pub fn seed_training(&self, record: TrainingRecord) {
        self.state.write().training.push(record);
    }

    pub fn seed_rule(&self, rule: MonitoringRule) {
        self.state.write().rules.push(rule);
    }

    /// Replace a rule wholesale; used by tests to flip schedules or
    /// deactivate rules between reconcile passes.
    pub fn replace_rule(&self, rule: MonitoringRule) {
        let mut state = self.state.write();
        if let Some(existing) = state.rules.iter_mut().find(|r| r.id == rule.id) {
            *existing = rule;
        } else {
            state.rules.push(rule);
        }
    }

    pub fn remove_rule(&self, rule_id: &str) {
        self.state.write().rules.retain(|r| r.id != rule_id);
    }

    pub fn clear_evidence(&self, tenant_id: &str) {
        self.state
            .write()
            .evidence
            .retain(|e| e.tenant_id != tenant_id);
    }

    pub fn alerts(&self, tenant_id: &str) -> Vec<Alert> {
        self.state
            .read()
            .alerts
            .iter()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub fn rule(&self, rule_id: &str) -> Option<MonitoringRule> {
        self.state
            .read()
            .rules
            .iter()
            .find(|r| r.id == rule_id)
            .cloned()
    }

    pub fn control(&self, control_id: &str) -> Option<Control> {
        self.state
            .read()
            .controls
            .iter()
            .find(|c| c.id == control_id)
            .cloned()
    }

    pub fn policies_for(&self, tenant_id: &str) -> Vec<PolicyDoc> {
        self.state
            .read()
            .policies
            .iter()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub fn evidence_for(&self, tenant_id: &str) -> Vec<EvidenceItem> {
        self.state
            .read()
            .evidence
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ComplianceStore for InMemoryStore {
    async fn company_profile(
        &self,
        tenant_id: &str,
    ) -> Result<Option<CompanyProfile>, StoreError> {
        Ok(self.state.read().profiles.get(tenant_id).cloned())
    }

    async fn list_frameworks(&self, ids: &[String]) -> Result<Vec<Framework>, StoreError> {
        let state = self.state.read();
        Ok(ids
            .iter()
            .filter_map(|id| state.frameworks.get(id).cloned())
            .collect())
    }

    async fn list_policy_templates(&self) -> Result<Vec<PolicyTemplate>, StoreError> {
        Ok(self.state.read().policy_templates.clone())
    }

    async fn list_controls(&self, tenant_id: &str) -> Result<Vec<Control>, StoreError> {
        Ok(self
            .state
            .read()
            .controls
            .iter()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn create_control(&self, control: Control) -> Result<(), StoreError> {
        self.state.write().controls.push(control);
        Ok(())
    }

    async fn update_control(&self, control: Control) -> Result<(), StoreError> {
        let mut state = self.state.write();
        match state.controls.iter_mut().find(|c| c.id == control.id) {
            Some(existing) => {
                *existing = control;
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: "control",
                id: control.id,
            }),
        }
    }

    async fn list_policies(&self, tenant_id: &str) -> Result<Vec<PolicyDoc>, StoreError> {
        Ok(self.policies_for(tenant_id))
    }

    async fn create_policy(&self, policy: PolicyDoc) -> Result<(), StoreError> {
        self.state.write().policies.push(policy);
        Ok(())
    }

    async fn list_evidence(&self, tenant_id: &str) -> Result<Vec<EvidenceItem>, StoreError> {
        Ok(self.evidence_for(tenant_id))
    }

    async fn create_evidence(&self, item: EvidenceItem) -> Result<(), StoreError> {
        self.state.write().evidence.push(item);
        Ok(())
    }

    async fn list_risks(&self, tenant_id: &str) -> Result<Vec<RiskEntry>, StoreError> {
        Ok(self
            .state
            .read()
            .risks
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn update_risk(&self, risk: RiskEntry) -> Result<(), StoreError> {
        let mut state = self.state.write();
        match state.risks.iter_mut().find(|r| r.id == risk.id) {
            Some(existing) => {
                *existing = risk;
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: "risk",
                id: risk.id,
            }),
        }
    }

    async fn list_vendors(&self, tenant_id: &str) -> Result<Vec<Vendor>, StoreError> {
        Ok(self
            .state
            .read()
            .vendors
            .iter()
            .filter(|v| v.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn update_vendor(&self, vendor: Vendor) -> Result<(), StoreError> {
        let mut state = self.state.write();
        match state.vendors.iter_mut().find(|v| v.id == vendor.id) {
            Some(existing) => {
                *existing = vendor;
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: "vendor",
                id: vendor.id,
            }),
        }
    }

    async fn audit(&self, tenant_id: &str, audit_id: &str) -> Result<Option<Audit>, StoreError> {
        Ok(self
            .state
            .read()
            .audits
            .iter()
            .find(|a| a.tenant_id == tenant_id && a.id == audit_id)
            .cloned())
    }

    async fn list_training(&self, tenant_id: &str) -> Result<Vec<TrainingRecord>, StoreError> {
        Ok(self
            .state
            .read()
            .training
            .iter()
            .filter(|t| t.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn monitoring_rules(
        &self,
        tenant_id: &str,
        active_only: bool,
    ) -> Result<Vec<MonitoringRule>, StoreError> {
        Ok(self
            .state
            .read()
            .rules
            .iter()
            .filter(|r| r.tenant_id == tenant_id && (!active_only || r.active))
            .cloned()
            .collect())
    }

    async fn active_rules(&self) -> Result<Vec<MonitoringRule>, StoreError> {
        Ok(self
            .state
            .read()
            .rules
            .iter()
            .filter(|r| r.active)
            .cloned()
            .collect())
    }

    async fn update_rule_result(
        &self,
        tenant_id: &str,
        rule_id: &str,
        result: CheckStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        match state
            .rules
            .iter_mut()
            .find(|r| r.tenant_id == tenant_id && r.id == rule_id)
        {
            Some(rule) => {
                rule.last_result = Some(result);
                rule.last_checked_at = Some(checked_at);
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: "monitoring_rule",
                id: rule_id.to_string(),
            }),
        }
    }

    async fn create_alert(&self, alert: Alert) -> Result<(), StoreError> {
        self.state.write().alerts.push(alert);
        Ok(())
    }
}
