//! # grcflow — compliance agent-orchestration core
//!
//! `grcflow` is the orchestration core of a multi-tenant compliance
//! platform. It runs eight linear pipelines over a shared engine:
//!
//! - **Generation workflows**: controls, policies, evidence — customize
//!   stored templates to a company profile through a structured completion
//!   client.
//! - **Assessment workflows**: risk and vendor risk (two-phase model use
//!   with deterministic weighted scoring), remediation (with a
//!   deterministic fallback when the model is unavailable), and audit
//!   preparation.
//! - **Monitoring daemon**: a fully deterministic pipeline executing rule
//!   checks, isolating per-rule failures, and classifying outcome drift.
//!
//! The [`monitor::ScheduleReconciler`] keeps one periodic trigger installed
//! per active monitoring rule and invokes the monitoring pipeline when a
//! trigger fires.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use grcflow::engine::PipelineDeps;
//! use grcflow::llm::{CompletionConfig, HttpCompletionClient};
//! use grcflow::pipelines::{run_pipeline, monitoring};
//! use grcflow::store::InMemoryStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let llm = HttpCompletionClient::new(CompletionConfig::default()).unwrap();
//!     let deps = PipelineDeps::new(Arc::new(InMemoryStore::new()), Arc::new(llm));
//!     let report = run_pipeline(&deps, monitoring::WORKFLOW, "tenant-1", serde_json::json!({}))
//!         .await
//!         .unwrap();
//!     println!("{:?}", report.status);
//! }
//! ```

pub mod engine;
pub mod error;
pub mod llm;
pub mod monitor;
pub mod pipelines;
pub mod store;

pub use crate::engine::{
    CancelSignal, PipelineDefinition, PipelineDeps, PipelineExecutor, PipelineRun, RunOutcome,
    Stage, StageState,
};
pub use crate::error::{PipelineError, StageError};
pub use crate::llm::{CompletionClient, CompletionConfig, HttpCompletionClient, LlmError};
pub use crate::monitor::{ScheduleReconciler, ReconcileReport};
pub use crate::pipelines::{run_pipeline, FallbackPolicy, RunReport, RunStatus, WORKFLOWS};
pub use crate::store::{ComplianceStore, InMemoryStore, StoreError};
