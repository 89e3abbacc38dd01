//! Run journal records.
//!
//! A record summarizes one executed pass: outcome, counts and one line per
//! resource. Setting values never appear in a record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::planner::{DeploymentReport, OperationKind, OutcomeCounts, ReportOutcome, ResourceOutcome};

/// Current version of the journal format.
pub const JOURNAL_VERSION: &str = "1";

/// Runs kept in the journal; older ones are dropped.
pub const MAX_JOURNAL_ENTRIES: usize = 100;

/// The full journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    /// Journal format version.
    pub version: String,
    /// Runs, oldest first.
    #[serde(default)]
    pub runs: Vec<RunRecord>,
    /// When the journal was last written.
    pub last_updated: DateTime<Utc>,
}

/// One executed pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique run identifier.
    pub id: String,
    /// When the pass started.
    pub started_at: DateTime<Utc>,
    /// When the pass finished.
    pub finished_at: DateTime<Utc>,
    /// Hash of the desired-state document.
    pub document_hash: String,
    /// Aggregate outcome.
    pub outcome: ReportOutcome,
    /// Result counts.
    pub counts: OutcomeCounts,
    /// Per-resource lines.
    #[serde(default)]
    pub entries: Vec<RunEntry>,
}

/// One resource line of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEntry {
    /// Resource label.
    pub resource: String,
    /// Planned operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationKind>,
    /// Outcome.
    pub outcome: ResourceOutcome,
    /// Provider attempts.
    pub attempts: u32,
}

impl Journal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: JOURNAL_VERSION.to_string(),
            runs: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Appends a run, dropping the oldest beyond the cap.
    pub fn push(&mut self, record: RunRecord) {
        self.runs.push(record);
        if self.runs.len() > MAX_JOURNAL_ENTRIES {
            let excess = self.runs.len() - MAX_JOURNAL_ENTRIES;
            self.runs.drain(..excess);
        }
        self.last_updated = Utc::now();
    }

    /// Most recent run.
    #[must_use]
    pub fn latest(&self) -> Option<&RunRecord> {
        self.runs.last()
    }

    /// Up to `limit` runs, newest first.
    pub fn recent(&self, limit: usize) -> impl Iterator<Item = &RunRecord> {
        self.runs.iter().rev().take(limit)
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

impl RunRecord {
    /// Summarizes a report.
    #[must_use]
    pub fn from_report(report: &DeploymentReport) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: report.started_at,
            finished_at: report.finished_at,
            document_hash: report.document_hash.clone(),
            outcome: report.outcome,
            counts: report.counts(),
            entries: report
                .results
                .iter()
                .map(|r| RunEntry {
                    resource: r.resource.clone(),
                    operation: r.operation,
                    outcome: r.outcome.clone(),
                    attempts: r.attempts,
                })
                .collect(),
        }
    }

    /// Duration of the pass in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::DeploymentResult;

    fn report() -> DeploymentReport {
        DeploymentReport::new(
            "abc123",
            Utc::now(),
            vec![DeploymentResult {
                resource: String::from("rg/html-search"),
                operation: Some(OperationKind::Create),
                outcome: ResourceOutcome::Succeeded,
                attempts: 2,
                duration_ms: 10,
            }],
        )
    }

    #[test]
    fn test_record_from_report() {
        let record = RunRecord::from_report(&report());
        assert_eq!(record.document_hash, "abc123");
        assert_eq!(record.outcome, ReportOutcome::Success);
        assert_eq!(record.counts.succeeded, 1);
        assert_eq!(record.entries[0].attempts, 2);
        assert!(Uuid::parse_str(&record.id).is_ok());
    }

    #[test]
    fn test_journal_is_capped() {
        let mut journal = Journal::new();
        let record = RunRecord::from_report(&report());
        for i in 0..(MAX_JOURNAL_ENTRIES + 5) {
            let mut record = record.clone();
            record.id = i.to_string();
            journal.push(record);
        }

        assert_eq!(journal.runs.len(), MAX_JOURNAL_ENTRIES);
        assert_eq!(journal.runs[0].id, "5");
        let last = (MAX_JOURNAL_ENTRIES + 4).to_string();
        assert_eq!(journal.latest().map(|r| r.id.as_str()), Some(last.as_str()));
        let newest: Vec<_> = journal.recent(2).map(|r| r.id.clone()).collect();
        assert_eq!(newest, vec!["104", "103"]);
    }
}
