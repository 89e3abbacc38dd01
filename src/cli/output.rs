//! Output formatting for CLI commands.
//!
//! This module renders plans, reports, drift and the run journal as colored
//! text tables or as JSON.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::journal::Journal;
use crate::planner::{
    DeploymentReport, OperationKind, ReconciliationPlan, ReportOutcome, ResourceOutcome,
};
use crate::reconciler::DriftReport;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan operation row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "After")]
    depends_on: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Time")]
    duration: String,
}

/// Journal row for table display.
#[derive(Tabled)]
struct RunRow {
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Document")]
    document: String,
    #[tabled(rename = "Ok")]
    succeeded: usize,
    #[tabled(rename = "Failed")]
    failed: usize,
    #[tabled(rename = "Unchanged")]
    up_to_date: usize,
    #[tabled(rename = "Skipped")]
    skipped: usize,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &ReconciliationPlan) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &ReconciliationPlan) -> String {
        if plan.is_noop() {
            return format!(
                "{} No changes required - provider matches the document.\n",
                "✓".green()
            );
        }

        let mut output = String::new();
        let _ = write!(output, "\nReconciliation plan\n");
        let _ = write!(output, "   Document hash: {}\n\n", short(&plan.document_hash));

        let rows: Vec<PlanRow> = plan
            .operations
            .iter()
            .map(|op| PlanRow {
                index: op.index + 1,
                action: Self::format_kind(op.kind),
                target: op.target.to_string(),
                depends_on: op
                    .depends_on
                    .iter()
                    .map(|i| (i + 1).to_string())
                    .collect::<Vec<_>>()
                    .join(","),
                reason: Self::truncate(&op.reason, 48),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let changed: Vec<_> = plan.changes().filter(|op| !op.changes.is_empty()).collect();
        if !changed.is_empty() {
            output.push_str("\nChanges:\n");
            for op in changed {
                let _ = writeln!(output, "   {}", op.target.to_string().bold());
                for change in &op.changes {
                    let _ = writeln!(output, "     {change}");
                }
            }
        }

        let (creates, updates, deletes, _) = plan.counts();
        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete\n",
            creates.to_string().green(),
            updates.to_string().yellow(),
            deletes.to_string().red()
        );
        if !plan.prune {
            output.push_str("   (undeclared resources are kept; pass --prune to delete them)\n");
        }

        output
    }

    /// Formats a deployment report.
    #[must_use]
    pub fn format_report(&self, report: &DeploymentReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    fn format_report_text(report: &DeploymentReport) -> String {
        let status = match report.outcome {
            ReportOutcome::Success => format!("{} Reconciliation succeeded", "✓".green()),
            ReportOutcome::PartialFailure => {
                format!("{} Reconciliation partially failed", "✗".red())
            }
        };
        let mut output = format!("{status}\n\n");

        let rows: Vec<ResultRow> = report
            .results
            .iter()
            .map(|r| ResultRow {
                resource: r.resource.clone(),
                operation: r
                    .operation
                    .map_or_else(|| String::from("-"), |k| k.to_string()),
                outcome: Self::format_outcome(&r.outcome),
                attempts: r.attempts,
                duration: format!("{}ms", r.duration_ms),
            })
            .collect();
        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let failures: Vec<_> = report
            .results
            .iter()
            .filter_map(|r| match &r.outcome {
                ResourceOutcome::Failed { kind, reason } => Some((&r.resource, kind, reason)),
                _ => None,
            })
            .collect();
        if !failures.is_empty() {
            let _ = write!(output, "\n{} Failures:\n", "⚠".yellow());
            for (resource, kind, reason) in failures {
                let _ = writeln!(output, "   - {resource} [{kind}]: {reason}");
            }
        }

        let counts = report.counts();
        let _ = write!(
            output,
            "\n{} succeeded, {} failed, {} up to date, {} skipped\n",
            counts.succeeded.to_string().green(),
            counts.failed.to_string().red(),
            counts.up_to_date,
            counts.skipped.to_string().yellow()
        );

        output
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": result.is_valid(),
                    "errors": result
                        .errors
                        .iter()
                        .map(|e| serde_json::json!({ "field": e.field, "message": e.message }))
                        .collect::<Vec<_>>(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Desired state is valid\n", "✓".green())
                } else {
                    let mut output = format!(
                        "{} {} validation error(s):\n",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                    output
                };

                if (show_warnings || !result.is_valid()) && !result.warnings.is_empty() {
                    let _ = write!(
                        output,
                        "\n{} {} warning(s):\n",
                        "⚠".yellow(),
                        result.warning_count()
                    );
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                if report.is_converged() {
                    format!("{} No drift detected - state is converged.\n", "✓".green())
                } else {
                    let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                    for resource in &report.drifted_resources {
                        let _ = writeln!(output, "   - {resource}");
                    }
                    let _ = write!(
                        output,
                        "\n{}/{} operations would change something.\n",
                        report.drifted_resources.len(),
                        report.total_operations
                    );
                    output
                }
            }
        }
    }

    /// Formats the most recent `limit` runs of the journal, newest first.
    #[must_use]
    pub fn format_history(&self, journal: &Journal, limit: usize) -> String {
        match self.format {
            OutputFormat::Json => {
                let runs: Vec<_> = journal.recent(limit).collect();
                serde_json::to_string_pretty(&runs).unwrap_or_default()
            }
            OutputFormat::Text => {
                if journal.runs.is_empty() {
                    return String::from("No runs recorded.\n");
                }

                let rows: Vec<RunRow> = journal
                    .recent(limit)
                    .map(|run| RunRow {
                        started: run.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        outcome: match run.outcome {
                            ReportOutcome::Success => "success".green().to_string(),
                            ReportOutcome::PartialFailure => "partial failure".red().to_string(),
                        },
                        document: short(&run.document_hash).to_string(),
                        succeeded: run.counts.succeeded,
                        failed: run.counts.failed,
                        up_to_date: run.counts.up_to_date,
                        skipped: run.counts.skipped,
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                let _ = write!(
                    output,
                    "\n{} of {} recorded run(s)\n",
                    limit.min(journal.runs.len()),
                    journal.runs.len()
                );
                output
            }
        }
    }

    /// Formats an operation kind with color.
    fn format_kind(kind: OperationKind) -> String {
        match kind {
            OperationKind::Create => "+create".green().to_string(),
            OperationKind::Update => "~update".yellow().to_string(),
            OperationKind::Delete => "-delete".red().to_string(),
            OperationKind::Skip => "skip".dimmed().to_string(),
        }
    }

    /// Formats a resource outcome with color.
    fn format_outcome(outcome: &ResourceOutcome) -> String {
        let label = outcome.label();
        match outcome {
            ResourceOutcome::Succeeded => label.green().to_string(),
            ResourceOutcome::Failed { .. } => label.red().to_string(),
            ResourceOutcome::Skipped { .. } if outcome.is_legit() => label.dimmed().to_string(),
            ResourceOutcome::Skipped { .. } => label.yellow().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

/// First 8 characters of a hash.
fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::RunRecord;
    use crate::planner::{DeploymentResult, FailureKind};
    use chrono::Utc;

    fn report() -> DeploymentReport {
        DeploymentReport::new(
            "0123456789abcdef",
            Utc::now(),
            vec![
                DeploymentResult {
                    resource: String::from("rg/P1"),
                    operation: Some(OperationKind::Create),
                    outcome: ResourceOutcome::failed(FailureKind::ProviderRejected, "sku not offered"),
                    attempts: 1,
                    duration_ms: 12,
                },
                DeploymentResult {
                    resource: String::from("rg/A1"),
                    operation: Some(OperationKind::Create),
                    outcome: ResourceOutcome::skipped(crate::planner::SkipReason::DependencyFailed),
                    attempts: 0,
                    duration_ms: 0,
                },
            ],
        )
    }

    #[test]
    fn test_report_text_lists_failures() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_report(&report());
        assert!(text.contains("partially failed"));
        assert!(text.contains("rg/P1 [provider rejected]: sku not offered"));
        assert!(text.contains("skipped (dependency failed)"));
    }

    #[test]
    fn test_report_json_round_trips() {
        let json = OutputFormatter::new(OutputFormat::Json).format_report(&report());
        let parsed: DeploymentReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.outcome, ReportOutcome::PartialFailure);
        assert_eq!(parsed.results.len(), 2);
    }

    #[test]
    fn test_history_is_newest_first() {
        let mut journal = Journal::new();
        let mut first = RunRecord::from_report(&report());
        first.document_hash = String::from("aaaaaaaa11");
        let mut second = first.clone();
        second.document_hash = String::from("bbbbbbbb22");
        journal.push(first);
        journal.push(second);

        let json = OutputFormatter::new(OutputFormat::Json).format_history(&journal, 1);
        let runs: Vec<RunRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].document_hash, "bbbbbbbb22");

        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_history(&journal, 10);
        assert!(text.find("bbbbbbbb").unwrap() < text.find("aaaaaaaa").unwrap());
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("0123456789abc", 10), "0123456...");
    }
}
