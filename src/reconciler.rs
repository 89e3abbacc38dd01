//! Reconciler driving the provider toward the desired state.
//!
//! One pass observes the provider, diffs it against the document, executes
//! the resulting plan tier by tier and returns an itemized report. Failures
//! of single resources never abort the pass; they end up in the report.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::{ConfigHasher, DesiredState};
use crate::error::Result;
use crate::gateway::PolicySynchronizer;
use crate::journal::{JournalStore, LockInfo, RunRecord};
use crate::planner::{
    DEFAULT_MAX_PARALLELISM, DeploymentReport, DeploymentResult, DiffEngine, FailureKind,
    PlanExecutor, ReconciliationPlan,
};
use crate::provider::{CloudProvider, ObservedState, ResourceProvisioner, RetryPolicy, StateReader};
use crate::settings::{CredentialStore, SettingsConfigurator};

/// Knobs of a reconciliation pass.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    /// Delete observed resources the document no longer declares.
    pub prune: bool,
    /// Time after which no new operation starts.
    pub deadline: Option<Duration>,
    /// Operations run at once inside a tier.
    pub max_parallelism: usize,
    /// Retry policy for provider calls.
    pub retry: RetryPolicy,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            prune: false,
            deadline: None,
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            retry: RetryPolicy::default(),
        }
    }
}

/// Reconciler for one desired-state document.
pub struct Reconciler {
    /// Provider control plane.
    provider: Arc<dyn CloudProvider>,
    /// Source of secret values.
    credentials: Arc<dyn CredentialStore>,
    /// Pass options.
    options: ReconcileOptions,
    /// Run journal, if enabled.
    journal: Option<Arc<dyn JournalStore>>,
    /// Document hasher.
    hasher: ConfigHasher,
    /// Diff engine.
    diff_engine: DiffEngine,
}

impl Reconciler {
    /// Creates a reconciler with default options and no journal.
    #[must_use]
    pub fn new(provider: Arc<dyn CloudProvider>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            provider,
            credentials,
            options: ReconcileOptions::default(),
            journal: None,
            hasher: ConfigHasher::new(),
            diff_engine: DiffEngine::new(),
        }
    }

    /// Sets the pass options.
    #[must_use]
    pub const fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    /// Records executed passes in `journal` and holds its lock while running.
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<dyn JournalStore>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Current options.
    #[must_use]
    pub const fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    fn deadline(&self) -> Option<Instant> {
        self.options.deadline.map(|d| Instant::now() + d)
    }

    /// Snapshots every resource group the document touches plus the
    /// gateway policy.
    ///
    /// # Errors
    ///
    /// Returns the provider error once retries are exhausted.
    pub async fn observe(
        &self,
        desired: &DesiredState,
        deadline: Option<Instant>,
    ) -> Result<ObservedState> {
        StateReader::new(Arc::clone(&self.provider), self.options.retry)
            .observe(
                &desired.resource_groups(),
                &desired.resource_group,
                &desired.gateway.api,
                deadline,
            )
            .await
    }

    /// Computes the plan without executing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be observed.
    pub async fn plan(&self, desired: &DesiredState) -> Result<ReconciliationPlan> {
        let observed = self.observe(desired, self.deadline()).await?;
        Ok(self.diff_engine.diff(desired, &observed, self.options.prune))
    }

    /// Runs one full pass and reports every resource.
    ///
    /// The document is expected to have passed validation.
    pub async fn reconcile(&self, desired: DesiredState) -> DeploymentReport {
        let started_at = Utc::now();
        let deadline = self.deadline();
        let document_hash = self.hasher.hash_document(&desired);

        info!(
            "Starting reconciliation of {} (document {})",
            desired.resource_group,
            self.hasher.short_hash(&document_hash)
        );

        let lock = match self.acquire_lock().await {
            Ok(lock) => lock,
            Err(e) => {
                error!("Cannot take the journal lock: {e}");
                return DeploymentReport::new(
                    document_hash,
                    started_at,
                    vec![DeploymentResult::pass_failure(
                        "journal",
                        FailureKind::Internal,
                        e.to_string(),
                    )],
                );
            }
        };

        let results = self.run_pass(desired, deadline).await;
        let report = DeploymentReport::new(document_hash, started_at, results);

        let counts = report.counts();
        info!(
            "Reconciliation finished: {} ({} succeeded, {} failed, {} up to date, {} skipped)",
            report.outcome, counts.succeeded, counts.failed, counts.up_to_date, counts.skipped
        );

        self.record(&report, lock.as_ref()).await;
        report
    }

    async fn run_pass(&self, desired: DesiredState, deadline: Option<Instant>) -> Vec<DeploymentResult> {
        let observed = match self.observe(&desired, deadline).await {
            Ok(observed) => observed,
            Err(e) => {
                error!("Observation failed: {e}");
                return vec![DeploymentResult::pass_failure(
                    "observe",
                    e.failure_kind(),
                    e.to_string(),
                )];
            }
        };

        let plan = self.diff_engine.diff(&desired, &observed, self.options.prune);
        let (creates, updates, deletes, skips) = plan.counts();
        info!("Plan: {creates} create, {updates} update, {deletes} delete, {skips} skip");

        let retry = self.options.retry;
        let provisioner = Arc::new(ResourceProvisioner::new(Arc::clone(&self.provider), retry));
        let configurator = Arc::new(SettingsConfigurator::new(Arc::clone(&self.credentials)));
        let synchronizer = PolicySynchronizer::new(
            Arc::clone(&self.provider),
            retry,
            &desired.resource_group,
            &desired.gateway.api,
            self.options.prune,
        );

        PlanExecutor::new(provisioner, configurator, synchronizer)
            .with_max_parallelism(self.options.max_parallelism)
            .with_deadline(deadline)
            .execute(&plan, Arc::new(desired), &observed)
            .await
    }

    async fn acquire_lock(&self) -> Result<Option<LockInfo>> {
        match &self.journal {
            Some(journal) => Ok(Some(journal.acquire_lock("").await?)),
            None => Ok(None),
        }
    }

    async fn record(&self, report: &DeploymentReport, lock: Option<&LockInfo>) {
        let Some(journal) = &self.journal else {
            return;
        };

        if let Err(e) = journal.append(RunRecord::from_report(report)).await {
            warn!("Failed to append run to the journal: {e}");
        }
        if let Some(lock) = lock
            && let Err(e) = journal.release_lock(&lock.lock_id).await
        {
            warn!("Failed to release journal lock {}: {e}", lock.lock_id);
        }
    }

    /// Checks for drift without applying changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be observed.
    pub async fn check_drift(&self, desired: &DesiredState) -> Result<DriftReport> {
        info!("Checking for drift in {}", desired.resource_group);

        let plan = self.plan(desired).await?;
        let drifted_resources: Vec<String> = plan.changes().map(|op| op.label()).collect();

        Ok(DriftReport {
            has_drift: !drifted_resources.is_empty(),
            drifted_resources,
            total_operations: plan.operations.len(),
        })
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("provider", &self.provider.provider_type())
            .field("options", &self.options)
            .field("journal", &self.journal.as_ref().map(|j| j.backend_type()))
            .finish_non_exhaustive()
    }
}

/// Report of drift detection.
#[derive(Debug, serde::Serialize)]
pub struct DriftReport {
    /// Whether drift was detected.
    pub has_drift: bool,
    /// Operations that would change something.
    pub drifted_resources: Vec<String>,
    /// Number of planned operations, skips included.
    pub total_operations: usize,
}

impl DriftReport {
    /// Returns true if the state is converged (no drift).
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        !self.has_drift
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_drift {
            writeln!(f, "Drift detected:")?;
            for resource in &self.drifted_resources {
                writeln!(f, "  - {resource}")?;
            }
        } else {
            write!(f, "No drift detected - state is converged")?;
        }
        Ok(())
    }
}
