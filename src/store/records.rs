//! Record shapes owned by the storage collaborator.
//!
//! The relational schema itself is out of scope here; these are the typed
//! projections the orchestration core reads and writes through
//! [`ComplianceStore`](super::ComplianceStore).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-text description of the tenant's company, substituted into prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub tenant_id: String,
    pub name: String,
    pub industry: String,
    pub size: String,
    #[serde(default)]
    pub cloud_providers: Vec<String>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    /// Default owner assigned to generated records when the model does not
    /// suggest one.
    #[serde(default)]
    pub default_owner: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    Draft,
    InProgress,
    Implemented,
    NotApplicable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Control {
    pub id: String,
    pub tenant_id: String,
    pub framework_id: String,
    /// Requirement code this control satisfies, e.g. "AC-2".
    pub requirement_code: String,
    pub name: String,
    pub description: String,
    pub status: ControlStatus,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub implementation_notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub code: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Framework {
    pub id: String,
    pub name: String,
    pub version: String,
    pub requirements: Vec<Requirement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyTemplate {
    pub id: String,
    pub name: String,
    pub category: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Draft,
    Approved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDoc {
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub template_id: Option<String>,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub status: PolicyStatus,
    #[serde(default)]
    pub next_review_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStatus {
    Requested,
    Collected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: String,
    pub tenant_id: String,
    pub control_id: String,
    pub title: String,
    pub description: String,
    pub status: EvidenceStatus,
    #[serde(default)]
    pub collected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

/// One qualitative risk dimension produced by the analysis pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: String,
    /// 1 (negligible) .. 5 (severe).
    pub level: u8,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEntry {
    pub id: String,
    pub tenant_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub score: Option<u8>,
    #[serde(default)]
    pub tier: Option<RiskTier>,
    #[serde(default)]
    pub analysis: Vec<DimensionScore>,
    #[serde(default)]
    pub assessed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub services: String,
    #[serde(default)]
    pub score: Option<u8>,
    #[serde(default)]
    pub tier: Option<RiskTier>,
    #[serde(default)]
    pub analysis: Vec<DimensionScore>,
    #[serde(default)]
    pub last_assessed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audit {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub framework_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Controls in scope for this audit.
    pub control_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub course: String,
    pub completed: bool,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
}

/// Schedule bucket of a monitoring rule. Unrecognized buckets deserialize to
/// `Unknown` and are treated as daily by the reconciler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleBucket {
    Hourly,
    Daily,
    Weekly,
    #[serde(other)]
    Unknown,
}

/// Outcome of one monitoring check execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringRule {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    /// Dispatch key for the check runner, e.g. "evidence_freshness".
    pub check_type: String,
    pub schedule: ScheduleBucket,
    pub active: bool,
    /// Free-form per-check configuration.
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub last_result: Option<CheckStatus>,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub tenant_id: String,
    pub rule_id: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
