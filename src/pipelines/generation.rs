//! Shared plumbing for the generation pipelines: fallback policy, prompt
//! context blocks, structured-response parsing, and order-stable dedupe.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::StageError;
use crate::store::CompanyProfile;

/// What a generation pipeline does when the completion client fails.
///
/// This is an explicit per-pipeline construction flag; nothing infers it
/// from response shape. Remediation enables `Deterministic` by default, the
/// other generation pipelines default to `FailRun`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Completion failures abort the run.
    FailRun,
    /// The failing stage synthesizes deterministic output and records a
    /// warning so downstream consumers can flag it for human review.
    Deterministic,
}

/// Owner used when neither the model nor the company profile suggests one.
pub(crate) const DEFAULT_OWNER: &str = "compliance-team";

pub(crate) fn default_owner(profile: Option<&CompanyProfile>) -> String {
    profile
        .and_then(|p| p.default_owner.clone())
        .unwrap_or_else(|| DEFAULT_OWNER.to_string())
}

/// Free-text company context substituted into prompts. No special-casing
/// beyond string interpolation.
pub(crate) fn company_context_block(profile: Option<&CompanyProfile>) -> String {
    match profile {
        Some(p) => format!(
            "Company: {}\nIndustry: {}\nSize: {}\nCloud providers: {}\nTech stack: {}",
            p.name,
            p.industry,
            p.size,
            join_or_none(&p.cloud_providers),
            join_or_none(&p.tech_stack),
        ),
        None => "Company profile: not provided".to_string(),
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none listed".to_string()
    } else {
        items.join(", ")
    }
}

/// Extract and deserialize an array field from a structured completion
/// response. Any shape mismatch is a malformed response; callers never see
/// partially-parsed items.
pub(crate) fn parse_items<T: DeserializeOwned>(
    value: &Value,
    field: &str,
) -> Result<Vec<T>, StageError> {
    let items = value
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| StageError::MalformedResponse(format!("missing '{field}' array")))?;
    items
        .iter()
        .map(|item| {
            serde_json::from_value(item.clone()).map_err(|e| {
                StageError::MalformedResponse(format!("bad '{field}' entry: {e}"))
            })
        })
        .collect()
}

/// Keep the first occurrence of each key, preserving input order.
pub(crate) fn dedupe_by_key<T>(items: Vec<T>, key: impl Fn(&T) -> String) -> Vec<T> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(key(item)))
        .collect()
}
