//! Per-resource results and the aggregated deployment report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::plan::OperationKind;

/// Why an operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient provider failure that outlived its retries.
    ProviderUnavailable,
    /// The provider refused the request.
    ProviderRejected,
    /// A secret reference could not be resolved.
    SecretResolution,
    /// An operation this one depends on failed.
    DependencyFailed,
    /// The deadline passed before the operation could finish.
    Cancelled,
    /// Anything else.
    Internal,
}

/// Why an operation did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Observed state already matches.
    UpToDate,
    /// An operation this one depends on did not succeed.
    DependencyFailed,
    /// The deadline passed before the operation started.
    Cancelled,
    /// The route's backend app is not Ready.
    PendingBackend,
}

/// Terminal outcome of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResourceOutcome {
    /// The operation completed.
    Succeeded,
    /// The operation failed.
    Failed {
        /// Failure classification.
        kind: FailureKind,
        /// Error message.
        reason: String,
    },
    /// The operation did not run.
    Skipped {
        /// Why it did not run.
        reason: SkipReason,
    },
}

/// Result of one planned operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentResult {
    /// Resource label, e.g. `rg/app.settings`.
    pub resource: String,
    /// Planned operation; `None` for pass-level entries such as `observe`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationKind>,
    /// Outcome.
    pub outcome: ResourceOutcome,
    /// Provider attempts made.
    pub attempts: u32,
    /// Wall time spent in milliseconds.
    pub duration_ms: u64,
}

/// Aggregate outcome of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportOutcome {
    /// Every operation succeeded or was legitimately skipped.
    Success,
    /// At least one operation failed or was held back.
    PartialFailure,
}

/// Report of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReport {
    /// Hash of the desired-state document.
    pub document_hash: String,
    /// When the pass started.
    pub started_at: DateTime<Utc>,
    /// When the pass finished.
    pub finished_at: DateTime<Utc>,
    /// Aggregate outcome.
    pub outcome: ReportOutcome,
    /// Itemized results in plan order.
    pub results: Vec<DeploymentResult>,
}

/// Result counts by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    /// Succeeded operations.
    pub succeeded: usize,
    /// Failed operations.
    pub failed: usize,
    /// Operations skipped because nothing changed.
    pub up_to_date: usize,
    /// Operations skipped for any other reason.
    pub skipped: usize,
}

impl ResourceOutcome {
    /// Creates a failure outcome.
    #[must_use]
    pub fn failed(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            reason: reason.into(),
        }
    }

    /// Creates a skip outcome.
    #[must_use]
    pub const fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    /// Succeeded, or skipped because already up to date.
    #[must_use]
    pub const fn is_legit(&self) -> bool {
        matches!(
            self,
            Self::Succeeded
                | Self::Skipped {
                    reason: SkipReason::UpToDate
                }
        )
    }

    /// Short label for tables.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Skipped {
                reason: SkipReason::UpToDate,
            } => "up to date",
            Self::Skipped {
                reason: SkipReason::DependencyFailed,
            } => "skipped (dependency failed)",
            Self::Skipped {
                reason: SkipReason::Cancelled,
            } => "skipped (cancelled)",
            Self::Skipped {
                reason: SkipReason::PendingBackend,
            } => "pending (backend not ready)",
        }
    }
}

impl DeploymentResult {
    /// A failed pass-level entry that no planned operation stands behind.
    #[must_use]
    pub fn pass_failure(resource: impl Into<String>, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            operation: None,
            outcome: ResourceOutcome::failed(kind, reason),
            attempts: 0,
            duration_ms: 0,
        }
    }
}

impl DeploymentReport {
    /// Builds a report, deriving the outcome from the results.
    #[must_use]
    pub fn new(
        document_hash: impl Into<String>,
        started_at: DateTime<Utc>,
        results: Vec<DeploymentResult>,
    ) -> Self {
        let outcome = if results.iter().all(|r| r.outcome.is_legit()) {
            ReportOutcome::Success
        } else {
            ReportOutcome::PartialFailure
        };
        Self {
            document_hash: document_hash.into(),
            started_at,
            finished_at: Utc::now(),
            outcome,
            results,
        }
    }

    /// Returns true on `Success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == ReportOutcome::Success
    }

    /// Counts results by outcome.
    #[must_use]
    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for result in &self.results {
            match result.outcome {
                ResourceOutcome::Succeeded => counts.succeeded += 1,
                ResourceOutcome::Failed { .. } => counts.failed += 1,
                ResourceOutcome::Skipped {
                    reason: SkipReason::UpToDate,
                } => counts.up_to_date += 1,
                ResourceOutcome::Skipped { .. } => counts.skipped += 1,
            }
        }
        counts
    }

    /// Finds the result for a resource label.
    #[must_use]
    pub fn result_for(&self, resource: &str) -> Option<&DeploymentResult> {
        self.results.iter().find(|r| r.resource == resource)
    }

    /// Process exit code: 0 on success, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        u8::from(!self.is_success())
    }
}

impl std::fmt::Display for ReportOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::PartialFailure => write!(f, "PartialFailure"),
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ProviderUnavailable => "provider unavailable",
            Self::ProviderRejected => "provider rejected",
            Self::SecretResolution => "secret resolution",
            Self::DependencyFailed => "dependency failed",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}
