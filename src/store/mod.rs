//! Storage collaborator interface.
//!
//! The core never issues queries itself; every read and write goes through
//! [`ComplianceStore`]. Production wires a database-backed implementation,
//! tests and the demo binary use [`InMemoryStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod memory;
pub mod records;

pub use memory::InMemoryStore;
pub use records::{
    Alert, AlertSeverity, Audit, CheckStatus, CompanyProfile, Control, ControlStatus,
    DimensionScore, EvidenceItem, EvidenceStatus, Framework, MonitoringRule, PolicyDoc,
    PolicyStatus, PolicyTemplate, Requirement, RiskEntry, RiskTier, ScheduleBucket,
    TrainingRecord, Vendor,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("write conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait ComplianceStore: Send + Sync {
    async fn company_profile(&self, tenant_id: &str)
        -> Result<Option<CompanyProfile>, StoreError>;

    async fn list_frameworks(&self, ids: &[String]) -> Result<Vec<Framework>, StoreError>;
    async fn list_policy_templates(&self) -> Result<Vec<PolicyTemplate>, StoreError>;

    async fn list_controls(&self, tenant_id: &str) -> Result<Vec<Control>, StoreError>;
    async fn create_control(&self, control: Control) -> Result<(), StoreError>;
    async fn update_control(&self, control: Control) -> Result<(), StoreError>;

    async fn list_policies(&self, tenant_id: &str) -> Result<Vec<PolicyDoc>, StoreError>;
    async fn create_policy(&self, policy: PolicyDoc) -> Result<(), StoreError>;

    async fn list_evidence(&self, tenant_id: &str) -> Result<Vec<EvidenceItem>, StoreError>;
    async fn create_evidence(&self, item: EvidenceItem) -> Result<(), StoreError>;

    async fn list_risks(&self, tenant_id: &str) -> Result<Vec<RiskEntry>, StoreError>;
    async fn update_risk(&self, risk: RiskEntry) -> Result<(), StoreError>;

    async fn list_vendors(&self, tenant_id: &str) -> Result<Vec<Vendor>, StoreError>;
    async fn update_vendor(&self, vendor: Vendor) -> Result<(), StoreError>;

    async fn audit(&self, tenant_id: &str, audit_id: &str) -> Result<Option<Audit>, StoreError>;

    async fn list_training(&self, tenant_id: &str) -> Result<Vec<TrainingRecord>, StoreError>;

    /// Monitoring rules for one tenant, optionally restricted to active ones.
    async fn monitoring_rules(
        &self,
        tenant_id: &str,
        active_only: bool,
    ) -> Result<Vec<MonitoringRule>, StoreError>;

    /// Active rules across all tenants; the reconciler derives its desired
    /// trigger set from this.
    async fn active_rules(&self) -> Result<Vec<MonitoringRule>, StoreError>;

    async fn update_rule_result(
        &self,
        tenant_id: &str,
        rule_id: &str,
        result: CheckStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn create_alert(&self, alert: Alert) -> Result<(), StoreError>;
}
