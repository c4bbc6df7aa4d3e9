//! Per-run bookkeeping shared by every workflow context.
//!
//! Each workflow defines its own typed context struct (never a string-keyed
//! bag) and embeds a [`RunCore`]; the executor only touches the core.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StageError;

/// Failure recorded by the executor when a fatal stage error short-circuits
/// the run. Once set, no later stage executes.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: &'static str,
    pub error: StageError,
}

/// A recoverable stage error, downgraded and carried into the result.
#[derive(Debug, Clone)]
pub struct StageWarning {
    pub stage: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct RunCore {
    pub tenant_id: String,
    pub run_id: String,
    /// User that started the run, when triggered through the API rather than
    /// the scheduler.
    pub triggered_by: Option<String>,
    pub started_at: DateTime<Utc>,
    pub failure: Option<StageFailure>,
    pub warnings: Vec<StageWarning>,
}

impl RunCore {
    pub fn new(tenant_id: impl Into<String>, triggered_by: Option<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            run_id: Uuid::new_v4().to_string(),
            triggered_by,
            started_at: Utc::now(),
            failure: None,
            warnings: Vec::new(),
        }
    }

    pub fn push_warning(&mut self, stage: &'static str, message: impl Into<String>) {
        self.warnings.push(StageWarning {
            stage,
            message: message.into(),
        });
    }
}

/// Accessor trait the executor uses to reach the bookkeeping core of any
/// workflow context.
pub trait StageState: Send {
    fn core(&self) -> &RunCore;
    fn core_mut(&mut self) -> &mut RunCore;
}
