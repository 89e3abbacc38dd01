//! Planning and execution of reconciliation passes.
//!
//! This module compares desired and observed state, turns the difference
//! into a staged plan, and executes that plan against the provider.

mod diff;
mod plan;
mod executor;
mod result;

pub use diff::DiffEngine;
pub use plan::{
    FieldChange, OperationKind, OperationTarget, PlannedOperation, ReconciliationPlan, Stage,
};
pub use executor::{DEFAULT_MAX_PARALLELISM, PlanExecutor};
pub use result::{
    DeploymentReport, DeploymentResult, FailureKind, OutcomeCounts, ReportOutcome,
    ResourceOutcome, SkipReason,
};
