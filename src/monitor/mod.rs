//! Continuous monitoring: deterministic rule checks, drift detection, and
//! the schedule reconciler that keeps periodic triggers in sync with rule
//! records.

pub mod checks;
pub mod drift;
pub mod reconciler;

pub use checks::{CheckExecution, CheckRunner};
pub use drift::{detect, DriftKind, DriftRecord};
pub use reconciler::{
    interval_for, trigger_id, ReconcileReport, ScheduleReconciler, TriggerInfo,
};
