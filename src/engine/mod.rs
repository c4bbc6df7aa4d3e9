//! Pipeline execution engine: typed stage contexts, linear definitions, and
//! the sequential executor with its error/short-circuit policy.

use std::sync::Arc;

pub mod cancel;
pub mod context;
pub mod definition;
pub mod executor;
pub mod stage;

pub use cancel::CancelSignal;
pub use context::{RunCore, StageFailure, StageState, StageWarning};
pub use definition::PipelineDefinition;
pub use executor::{PipelineExecutor, PipelineRun, RunOutcome};
pub use stage::{ErrorPolicy, Stage};

use crate::llm::CompletionClient;
use crate::store::ComplianceStore;

/// Collaborator handles passed to every stage. Constructed once at process
/// start and shared across runs; no lazily-probed globals.
pub struct PipelineDeps {
    pub store: Arc<dyn ComplianceStore>,
    pub llm: Arc<dyn CompletionClient>,
}

impl PipelineDeps {
    pub fn new(store: Arc<dyn ComplianceStore>, llm: Arc<dyn CompletionClient>) -> Arc<Self> {
        Arc::new(Self { store, llm })
    }
}
