//! Reconciliation plan types.
//!
//! A plan is an ordered list of operations grouped in stages. Operations
//! reference their dependencies by index, and every dependency lives in an
//! earlier stage, so executing stage by stage respects every edge.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ResourceId;

/// A complete reconciliation plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    /// Hash of the desired-state document the plan was computed from.
    pub document_hash: String,
    /// Whether observed-only entities are deleted.
    pub prune: bool,
    /// Operations in execution order.
    pub operations: Vec<PlannedOperation>,
}

/// A single planned operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedOperation {
    /// Position in the plan.
    pub index: usize,
    /// What to do.
    pub kind: OperationKind,
    /// What to do it to.
    pub target: OperationTarget,
    /// Stage the operation runs in.
    pub stage: Stage,
    /// Indices of operations that must complete first.
    pub depends_on: Vec<usize>,
    /// Why the operation was planned.
    pub reason: String,
    /// Field-level differences.
    pub changes: Vec<FieldChange>,
}

/// Operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Create a missing entity.
    Create,
    /// Bring an existing entity in line.
    Update,
    /// Remove an entity absent from the document.
    Delete,
    /// Nothing to do.
    Skip,
}

/// What an operation acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationTarget {
    /// A hosting plan.
    Plan {
        /// Plan identity.
        id: ResourceId,
    },
    /// A function app.
    App {
        /// App identity.
        id: ResourceId,
    },
    /// An app's settings.
    Settings {
        /// App identity.
        id: ResourceId,
    },
    /// The gateway route table.
    Routes {
        /// Gateway API name.
        api: String,
    },
}

/// Execution stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Plan creates and updates.
    Plans,
    /// App creates and updates.
    Apps,
    /// Settings updates.
    Settings,
    /// Route table update.
    Routes,
    /// App deletes.
    AppDeletes,
    /// Plan deletes.
    PlanDeletes,
}

/// One differing field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    /// Field name.
    pub field: String,
    /// Observed value.
    pub old: Option<String>,
    /// Desired value.
    pub new: Option<String>,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Self; 6] = [
        Self::Plans,
        Self::Apps,
        Self::Settings,
        Self::Routes,
        Self::AppDeletes,
        Self::PlanDeletes,
    ];
}

impl FieldChange {
    /// Creates a change record.
    #[must_use]
    pub fn new(field: impl Into<String>, old: Option<String>, new: Option<String>) -> Self {
        Self {
            field: field.into(),
            old,
            new,
        }
    }
}

impl OperationTarget {
    /// Resource identity, for plan, app and settings targets.
    #[must_use]
    pub const fn resource_id(&self) -> Option<&ResourceId> {
        match self {
            Self::Plan { id } | Self::App { id } | Self::Settings { id } => Some(id),
            Self::Routes { .. } => None,
        }
    }
}

impl PlannedOperation {
    /// Label used in reports, e.g. `Create(rg/search-plan)`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}({})", self.kind, self.target)
    }

    /// Returns true for `Skip`.
    #[must_use]
    pub fn is_skip(&self) -> bool {
        self.kind == OperationKind::Skip
    }
}

impl ReconciliationPlan {
    /// Returns true when every operation is a `Skip`.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.operations.iter().all(PlannedOperation::is_skip)
    }

    /// Operations that change something.
    pub fn changes(&self) -> impl Iterator<Item = &PlannedOperation> {
        self.operations.iter().filter(|op| !op.is_skip())
    }

    /// Operations of one stage, in plan order.
    pub fn operations_in(&self, stage: Stage) -> impl Iterator<Item = &PlannedOperation> {
        self.operations.iter().filter(move |op| op.stage == stage)
    }

    /// Labels of every operation, in plan order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.operations.iter().map(PlannedOperation::label).collect()
    }

    /// Counts (create, update, delete, skip).
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        self.operations
            .iter()
            .fold((0, 0, 0, 0), |(c, u, d, s), op| match op.kind {
                OperationKind::Create => (c + 1, u, d, s),
                OperationKind::Update => (c, u + 1, d, s),
                OperationKind::Delete => (c, u, d + 1, s),
                OperationKind::Skip => (c, u, d, s + 1),
            })
    }

    /// Finds the operation acting on a target.
    #[must_use]
    pub fn find(&self, target: &OperationTarget) -> Option<&PlannedOperation> {
        self.operations.iter().find(|op| &op.target == target)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "Create"),
            Self::Update => write!(f, "Update"),
            Self::Delete => write!(f, "Delete"),
            Self::Skip => write!(f, "Skip"),
        }
    }
}

impl fmt::Display for OperationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plan { id } | Self::App { id } => write!(f, "{id}"),
            Self::Settings { id } => write!(f, "{id}.settings"),
            Self::Routes { .. } => write!(f, "routes"),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Plans => "plans",
            Self::Apps => "apps",
            Self::Settings => "settings",
            Self::Routes => "routes",
            Self::AppDeletes => "app deletes",
            Self::PlanDeletes => "plan deletes",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {}",
            self.field,
            self.old.as_deref().unwrap_or("(none)"),
            self.new.as_deref().unwrap_or("(none)")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(index: usize, kind: OperationKind, target: OperationTarget, stage: Stage) -> PlannedOperation {
        PlannedOperation {
            index,
            kind,
            target,
            stage,
            depends_on: Vec::new(),
            reason: String::new(),
            changes: Vec::new(),
        }
    }

    #[test]
    fn test_labels() {
        let id = ResourceId::new("rg-search", "html-search");
        let plan = ReconciliationPlan {
            document_hash: String::from("abc"),
            prune: false,
            operations: vec![
                op(0, OperationKind::Create, OperationTarget::App { id: id.clone() }, Stage::Apps),
                op(1, OperationKind::Update, OperationTarget::Settings { id }, Stage::Settings),
                op(
                    2,
                    OperationKind::Skip,
                    OperationTarget::Routes {
                        api: String::from("search-api"),
                    },
                    Stage::Routes,
                ),
            ],
        };

        assert_eq!(
            plan.labels(),
            vec![
                "Create(rg-search/html-search)",
                "Update(rg-search/html-search.settings)",
                "Skip(routes)"
            ]
        );
        assert_eq!(plan.counts(), (1, 1, 0, 1));
        assert!(!plan.is_noop());
        assert_eq!(plan.changes().count(), 2);
        assert_eq!(plan.operations_in(Stage::Routes).count(), 1);
    }

    #[test]
    fn test_stage_order() {
        let mut stages = Stage::ALL.to_vec();
        stages.sort();
        assert_eq!(stages, Stage::ALL.to_vec());
        assert!(Stage::Routes < Stage::AppDeletes);
    }
}
