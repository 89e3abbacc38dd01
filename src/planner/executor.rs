//! Plan executor for applying reconciliation plans.
//!
//! Stages run one after another. Inside a stage, operations run
//! concurrently on a `JoinSet`, bounded by a semaphore. An operation whose
//! dependency did not succeed is skipped, and once the deadline has passed
//! nothing new starts.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{DesiredState, ResourceId};
use crate::error::{FuncsyncError, Result};
use crate::gateway::{PendingRoute, PolicySynchronizer};
use crate::provider::{AppSpec, Attempted, ObservedState, PlanSpec, ResourceProvisioner};
use crate::settings::SettingsConfigurator;

use super::plan::{OperationKind, OperationTarget, PlannedOperation, ReconciliationPlan, Stage};
use super::result::{DeploymentResult, FailureKind, ResourceOutcome, SkipReason};

/// Default number of operations running at once inside a stage.
pub const DEFAULT_MAX_PARALLELISM: usize = 8;

/// Executor for reconciliation plans.
pub struct PlanExecutor {
    provisioner: Arc<ResourceProvisioner>,
    configurator: Arc<SettingsConfigurator>,
    synchronizer: PolicySynchronizer,
    max_parallelism: usize,
    deadline: Option<Instant>,
}

/// A finished operation.
#[derive(Debug)]
struct Finished {
    index: usize,
    outcome: ResourceOutcome,
    attempts: u32,
    duration_ms: u64,
    hostname: Option<String>,
}

/// Everything a spawned operation needs.
#[derive(Clone)]
struct TaskContext {
    provisioner: Arc<ResourceProvisioner>,
    configurator: Arc<SettingsConfigurator>,
    desired: Arc<DesiredState>,
    deadline: Option<Instant>,
}

impl Finished {
    const fn skipped(index: usize, reason: SkipReason) -> Self {
        Self {
            index,
            outcome: ResourceOutcome::skipped(reason),
            attempts: 0,
            duration_ms: 0,
            hostname: None,
        }
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

impl TaskContext {
    async fn run(self, op: PlannedOperation) -> Finished {
        let started = Instant::now();
        if deadline_passed(self.deadline) {
            return Finished::skipped(op.index, SkipReason::Cancelled);
        }

        let Attempted { result, attempts } = self.apply(&op).await;
        let duration_ms = elapsed_ms(started);

        match result {
            Ok(hostname) => {
                info!("{} succeeded", op.label());
                Finished {
                    index: op.index,
                    outcome: ResourceOutcome::Succeeded,
                    attempts,
                    duration_ms,
                    hostname,
                }
            }
            Err(e) => {
                error!("{} failed after {attempts} attempt(s): {e}", op.label());
                Finished {
                    index: op.index,
                    outcome: ResourceOutcome::failed(e.failure_kind(), e.to_string()),
                    attempts,
                    duration_ms,
                    hostname: None,
                }
            }
        }
    }

    /// Performs one operation; app operations return the app's hostname.
    async fn apply(&self, op: &PlannedOperation) -> Attempted<Option<String>> {
        let provisioner = self.provisioner.as_ref();
        match (&op.target, op.kind) {
            (OperationTarget::Plan { id }, OperationKind::Create | OperationKind::Update) => {
                let spec = match self.plan_spec(id) {
                    Ok(spec) => spec,
                    Err(e) => return not_started(e),
                };
                let update = op.kind == OperationKind::Update;
                let Attempted { result, attempts } =
                    provisioner.ensure_plan(&spec, update, self.deadline).await;
                Attempted {
                    result: result.map(|_| None),
                    attempts,
                }
            }
            (OperationTarget::App { id }, OperationKind::Create | OperationKind::Update) => {
                let spec = match self.app_spec(id) {
                    Ok(spec) => spec,
                    Err(e) => return not_started(e),
                };
                let Attempted { result, attempts } =
                    provisioner.ensure_app(&spec, self.deadline).await;
                Attempted {
                    result: result.map(|app| app.default_hostname),
                    attempts,
                }
            }
            (OperationTarget::Settings { id }, OperationKind::Update) => {
                let Some(app) = self.desired.apps.iter().find(|a| self.desired.app_id(a) == *id)
                else {
                    return not_started(FuncsyncError::internal(format!("app {id} not declared")));
                };
                let Attempted { result, attempts } = self
                    .configurator
                    .apply(provisioner.provider(), provisioner.retry(), id, app, self.deadline)
                    .await;
                Attempted {
                    result: result.map(|()| None),
                    attempts,
                }
            }
            (OperationTarget::App { id }, OperationKind::Delete) => {
                let Attempted { result, attempts } =
                    provisioner.delete_app(id, self.deadline).await;
                Attempted {
                    result: result.map(|()| None),
                    attempts,
                }
            }
            (OperationTarget::Plan { id }, OperationKind::Delete) => {
                let Attempted { result, attempts } =
                    provisioner.delete_plan(id, self.deadline).await;
                Attempted {
                    result: result.map(|()| None),
                    attempts,
                }
            }
            _ => not_started(FuncsyncError::internal(format!(
                "{} cannot run in stage {}",
                op.label(),
                op.stage
            ))),
        }
    }

    fn plan_spec(&self, id: &ResourceId) -> Result<PlanSpec> {
        self.desired
            .plans
            .iter()
            .find(|p| self.desired.plan_id(p) == *id)
            .map(|p| PlanSpec::from_desired(&self.desired, p))
            .ok_or_else(|| FuncsyncError::internal(format!("plan {id} not declared")))
    }

    fn app_spec(&self, id: &ResourceId) -> Result<AppSpec> {
        self.desired
            .apps
            .iter()
            .find(|a| self.desired.app_id(a) == *id)
            .map(|a| AppSpec::from_desired(&self.desired, a))
            .ok_or_else(|| FuncsyncError::internal(format!("app {id} not declared")))
    }
}

fn not_started<T>(e: FuncsyncError) -> Attempted<T> {
    Attempted {
        result: Err(e),
        attempts: 0,
    }
}

impl PlanExecutor {
    /// Creates an executor.
    #[must_use]
    pub const fn new(
        provisioner: Arc<ResourceProvisioner>,
        configurator: Arc<SettingsConfigurator>,
        synchronizer: PolicySynchronizer,
    ) -> Self {
        Self {
            provisioner,
            configurator,
            synchronizer,
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            deadline: None,
        }
    }

    /// Sets how many operations may run at once inside a stage.
    #[must_use]
    pub const fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = if max_parallelism == 0 { 1 } else { max_parallelism };
        self
    }

    /// Sets the deadline after which no new operation starts.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Executes a plan and returns one result per operation, in plan order,
    /// plus one entry per route held back on its backend.
    pub async fn execute(
        &self,
        plan: &ReconciliationPlan,
        desired: Arc<DesiredState>,
        observed: &ObservedState,
    ) -> Vec<DeploymentResult> {
        info!(
            "Executing plan with {} operation(s), {} change(s)",
            plan.operations.len(),
            plan.changes().count()
        );

        let mut finished: Vec<Option<Finished>> = plan.operations.iter().map(|_| None).collect();
        let mut pending = Vec::new();
        let context = TaskContext {
            provisioner: Arc::clone(&self.provisioner),
            configurator: Arc::clone(&self.configurator),
            desired: Arc::clone(&desired),
            deadline: self.deadline,
        };

        for stage in Stage::ALL {
            if stage == Stage::Routes {
                for op in plan.operations_in(stage) {
                    let (done, held) = self
                        .sync_routes(op, plan, &desired, observed, &finished)
                        .await;
                    finished[op.index] = Some(done);
                    pending.extend(held);
                }
            } else {
                self.run_stage(plan, stage, &context, &mut finished).await;
            }
        }

        let mut results = Vec::with_capacity(plan.operations.len() + pending.len());
        for (op, done) in plan.operations.iter().zip(finished) {
            let done = done.unwrap_or_else(|| Finished::skipped(op.index, SkipReason::Cancelled));
            results.push(DeploymentResult {
                resource: op.target.to_string(),
                operation: Some(op.kind),
                outcome: done.outcome,
                attempts: done.attempts,
                duration_ms: done.duration_ms,
            });
            if op.stage == Stage::Routes {
                results.extend(pending.drain(..).map(|route| DeploymentResult {
                    resource: format!("route {} {}", route.method, route.path),
                    operation: Some(OperationKind::Update),
                    outcome: ResourceOutcome::skipped(SkipReason::PendingBackend),
                    attempts: 0,
                    duration_ms: 0,
                }));
            }
        }
        results
    }

    /// Decides an operation's outcome without running it, if it cannot or
    /// need not run.
    fn precheck(&self, op: &PlannedOperation, finished: &[Option<Finished>]) -> Option<ResourceOutcome> {
        if deadline_passed(self.deadline) {
            debug!("{} not started: deadline passed", op.label());
            return Some(ResourceOutcome::skipped(SkipReason::Cancelled));
        }
        let blocked = op.depends_on.iter().any(|dep| {
            finished
                .get(*dep)
                .and_then(Option::as_ref)
                .is_none_or(|f| !f.outcome.is_legit())
        });
        if blocked {
            warn!("{} skipped: a dependency did not succeed", op.label());
            return Some(ResourceOutcome::skipped(SkipReason::DependencyFailed));
        }
        op.is_skip()
            .then_some(ResourceOutcome::skipped(SkipReason::UpToDate))
    }

    async fn run_stage(
        &self,
        plan: &ReconciliationPlan,
        stage: Stage,
        context: &TaskContext,
        finished: &mut [Option<Finished>],
    ) {
        let semaphore = Arc::new(Semaphore::new(self.max_parallelism));
        let mut tasks = JoinSet::new();
        let mut spawned = Vec::new();

        for op in plan.operations_in(stage) {
            if let Some(outcome) = self.precheck(op, finished) {
                finished[op.index] = Some(Finished {
                    index: op.index,
                    outcome,
                    attempts: 0,
                    duration_ms: 0,
                    hostname: None,
                });
                continue;
            }

            spawned.push(op.index);
            let context = context.clone();
            let semaphore = Arc::clone(&semaphore);
            let op = op.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return Finished::skipped(op.index, SkipReason::Cancelled);
                };
                context.run(op).await
            });
        }

        if !spawned.is_empty() {
            debug!("Stage {stage}: {} operation(s) started", spawned.len());
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(done) => {
                    let index = done.index;
                    finished[index] = Some(done);
                }
                Err(e) => error!("Operation task failed: {e}"),
            }
        }

        for index in spawned {
            if finished[index].is_none() {
                finished[index] = Some(Finished {
                    index,
                    outcome: ResourceOutcome::failed(FailureKind::Internal, "operation task aborted"),
                    attempts: 0,
                    duration_ms: 0,
                    hostname: None,
                });
            }
        }
    }

    /// Hostnames of apps that are Ready after the earlier stages, keyed by
    /// app name.
    fn ready_hosts(
        plan: &ReconciliationPlan,
        desired: &DesiredState,
        observed: &ObservedState,
        finished: &[Option<Finished>],
    ) -> BTreeMap<String, String> {
        let legit = |target: OperationTarget| -> Option<&Finished> {
            let op = plan.find(&target)?;
            finished[op.index]
                .as_ref()
                .filter(|f| f.outcome.is_legit())
        };

        let mut hosts = BTreeMap::new();
        for app in &desired.apps {
            let id = desired.app_id(app);
            let Some(app_done) = legit(OperationTarget::App { id: id.clone() }) else {
                continue;
            };
            if legit(OperationTarget::Settings { id: id.clone() }).is_none() {
                continue;
            }
            let host = app_done
                .hostname
                .clone()
                .or_else(|| observed.hostname_of(&id).map(String::from));
            match host {
                Some(host) => {
                    hosts.insert(app.name.clone(), host);
                }
                None => debug!("App {id} has no hostname yet"),
            }
        }
        hosts
    }

    async fn sync_routes(
        &self,
        op: &PlannedOperation,
        plan: &ReconciliationPlan,
        desired: &DesiredState,
        observed: &ObservedState,
        finished: &[Option<Finished>],
    ) -> (Finished, Vec<PendingRoute>) {
        if deadline_passed(self.deadline) {
            debug!("{} not started: deadline passed", op.label());
            return (Finished::skipped(op.index, SkipReason::Cancelled), Vec::new());
        }

        let started = Instant::now();
        let hosts = Self::ready_hosts(plan, desired, observed, finished);
        let Attempted { result, attempts } = self
            .synchronizer
            .sync(&desired.routes, &hosts, observed.policy.as_ref(), self.deadline)
            .await;
        let duration_ms = elapsed_ms(started);

        match result {
            Ok(sync) => {
                let outcome = if sync.applied {
                    info!("{} succeeded", op.label());
                    ResourceOutcome::Succeeded
                } else {
                    ResourceOutcome::skipped(SkipReason::UpToDate)
                };
                let done = Finished {
                    index: op.index,
                    outcome,
                    attempts,
                    duration_ms,
                    hostname: None,
                };
                (done, sync.pending)
            }
            Err(e) => {
                error!("{} failed after {attempts} attempt(s): {e}", op.label());
                let done = Finished {
                    index: op.index,
                    outcome: ResourceOutcome::failed(e.failure_kind(), e.to_string()),
                    attempts,
                    duration_ms,
                    hostname: None,
                };
                (done, Vec::new())
            }
        }
    }
}

impl std::fmt::Debug for PlanExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("provisioner", &self.provisioner)
            .field("synchronizer", &self.synchronizer)
            .field("max_parallelism", &self.max_parallelism)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Artifact, FunctionApp, GatewayConfig, HostingPlan, HttpMethod, JournalConfig, OsType,
        RouteBinding, RuntimeDescriptor, RuntimeProfile, SettingValue,
    };
    use crate::planner::DiffEngine;
    use crate::provider::{Fault, InMemoryProvider, ProviderOp, RetryPolicy};
    use crate::settings::StaticCredentialStore;
    use std::time::Duration;

    fn plan(name: &str) -> HostingPlan {
        HostingPlan {
            name: name.to_string(),
            resource_group: None,
            sku: String::from("Y1"),
            os: OsType::Linux,
        }
    }

    fn app(name: &str, plan: &str) -> FunctionApp {
        FunctionApp {
            name: name.to_string(),
            resource_group: None,
            region: None,
            plan: plan.to_string(),
            runtime: RuntimeDescriptor {
                language: String::from("python"),
                version: String::from("3.11"),
                workers: 1,
            },
            profile: RuntimeProfile::Custom,
            storage_account: String::from("searchfuncstore"),
            artifact: Artifact {
                location: format!("https://builds/{name}.zip"),
                sha256: "c".repeat(64),
            },
            settings: BTreeMap::from([(
                String::from("INDEX_NAMES"),
                SettingValue::Literal(String::from("pdf-dev")),
            )]),
        }
    }

    fn route(path: &str, backend: &str) -> RouteBinding {
        RouteBinding {
            path: path.to_string(),
            method: HttpMethod::Post,
            backend: backend.to_string(),
            backend_path: None,
            content_type: String::from("application/json"),
            headers: BTreeMap::new(),
        }
    }

    fn two_chains() -> DesiredState {
        DesiredState {
            version: 1,
            resource_group: String::from("rg"),
            region: String::from("eastus"),
            plans: vec![plan("P1"), plan("P2")],
            apps: vec![app("A1", "P1"), app("A2", "P2")],
            routes: vec![route("/one", "A1"), route("/two", "A2")],
            gateway: GatewayConfig::default(),
            journal: JournalConfig::default(),
        }
    }

    fn executor(provider: Arc<InMemoryProvider>, deadline: Option<Instant>) -> PlanExecutor {
        let retry = RetryPolicy::default().with_base_delay(Duration::from_millis(1));
        PlanExecutor::new(
            Arc::new(ResourceProvisioner::new(provider.clone(), retry)),
            Arc::new(SettingsConfigurator::new(Arc::new(StaticCredentialStore::default()))),
            PolicySynchronizer::new(provider, retry, "rg", "search-api", false),
        )
        .with_deadline(deadline)
    }

    fn outcome_of<'a>(results: &'a [DeploymentResult], resource: &str) -> &'a ResourceOutcome {
        &results
            .iter()
            .find(|r| r.resource == resource)
            .unwrap_or_else(|| panic!("no result for {resource}"))
            .outcome
    }

    #[tokio::test]
    async fn test_failed_plan_isolates_its_apps() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.inject_fault(ProviderOp::PutPlan, Some("P1"), Fault::Rejected { status: 400 }, 1);
        let desired = Arc::new(two_chains());
        let observed = ObservedState::default();
        let plan = DiffEngine::new().diff(&desired, &observed, false);

        let results = executor(provider.clone(), None)
            .execute(&plan, Arc::clone(&desired), &observed)
            .await;

        assert!(matches!(
            outcome_of(&results, "rg/P1"),
            ResourceOutcome::Failed {
                kind: FailureKind::ProviderRejected,
                ..
            }
        ));
        assert_eq!(
            outcome_of(&results, "rg/A1"),
            &ResourceOutcome::skipped(SkipReason::DependencyFailed)
        );
        assert_eq!(
            outcome_of(&results, "rg/A1.settings"),
            &ResourceOutcome::skipped(SkipReason::DependencyFailed)
        );
        assert_eq!(outcome_of(&results, "rg/A2"), &ResourceOutcome::Succeeded);
        assert_eq!(outcome_of(&results, "rg/A2.settings"), &ResourceOutcome::Succeeded);
        assert_eq!(outcome_of(&results, "routes"), &ResourceOutcome::Succeeded);
        assert_eq!(
            outcome_of(&results, "route POST /one"),
            &ResourceOutcome::skipped(SkipReason::PendingBackend)
        );

        let policy = provider.policy_of("rg", "search-api").unwrap();
        assert_eq!(policy.routes.len(), 1);
        assert_eq!(policy.routes[0].path, "/two");
    }

    #[tokio::test]
    async fn test_deadline_cancels_unstarted_operations() {
        let provider = Arc::new(InMemoryProvider::new().with_latency(Duration::from_millis(60)));
        let mut desired = two_chains();
        desired.plans.truncate(1);
        desired.apps.truncate(1);
        desired.routes.truncate(1);
        let desired = Arc::new(desired);
        let observed = ObservedState::default();
        let plan = DiffEngine::new().diff(&desired, &observed, false);

        let deadline = Instant::now() + Duration::from_millis(20);
        let results = executor(provider.clone(), Some(deadline))
            .execute(&plan, Arc::clone(&desired), &observed)
            .await;

        // the in-flight plan create completes
        assert_eq!(outcome_of(&results, "rg/P1"), &ResourceOutcome::Succeeded);
        for resource in ["rg/A1", "rg/A1.settings", "routes"] {
            assert_eq!(
                outcome_of(&results, resource),
                &ResourceOutcome::skipped(SkipReason::Cancelled),
                "{resource}"
            );
        }
        assert_eq!(provider.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_parallelism_of_one_still_completes() {
        let provider = Arc::new(InMemoryProvider::new());
        let desired = Arc::new(two_chains());
        let observed = ObservedState::default();
        let plan = DiffEngine::new().diff(&desired, &observed, false);

        let results = executor(provider, None)
            .with_max_parallelism(1)
            .execute(&plan, Arc::clone(&desired), &observed)
            .await;
        assert!(results.iter().all(|r| r.outcome.is_legit()));
        assert_eq!(results.len(), plan.operations.len());
    }

    fn attempts_of(results: &[DeploymentResult], resource: &str) -> u32 {
        results
            .iter()
            .find(|r| r.resource == resource)
            .unwrap_or_else(|| panic!("no result for {resource}"))
            .attempts
    }

    #[tokio::test]
    async fn test_transient_app_failure_is_retried() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.inject_fault(ProviderOp::PutApp, Some("A1"), Fault::Unavailable, 1);
        let desired = Arc::new(two_chains());
        let observed = ObservedState::default();
        let plan = DiffEngine::new().diff(&desired, &observed, false);

        let results = executor(provider.clone(), None)
            .execute(&plan, Arc::clone(&desired), &observed)
            .await;

        assert_eq!(outcome_of(&results, "rg/A1"), &ResourceOutcome::Succeeded);
        assert_eq!(attempts_of(&results, "rg/A1"), 2);
        assert_eq!(attempts_of(&results, "rg/A2"), 1);
        assert_eq!(outcome_of(&results, "rg/A1.settings"), &ResourceOutcome::Succeeded);
        assert_eq!(outcome_of(&results, "route POST /one"), &ResourceOutcome::Succeeded);

        let policy = provider.policy_of("rg", "search-api").unwrap();
        assert_eq!(policy.routes.len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_as_unavailable() {
        let max_attempts = RetryPolicy::default().max_attempts;
        let provider = Arc::new(InMemoryProvider::new());
        provider.inject_fault(ProviderOp::PutApp, Some("A1"), Fault::Unavailable, max_attempts);
        let desired = Arc::new(two_chains());
        let observed = ObservedState::default();
        let plan = DiffEngine::new().diff(&desired, &observed, false);

        let results = executor(provider.clone(), None)
            .execute(&plan, Arc::clone(&desired), &observed)
            .await;

        assert!(matches!(
            outcome_of(&results, "rg/A1"),
            ResourceOutcome::Failed {
                kind: FailureKind::ProviderUnavailable,
                ..
            }
        ));
        assert_eq!(attempts_of(&results, "rg/A1"), max_attempts);
        assert_eq!(
            outcome_of(&results, "rg/A1.settings"),
            &ResourceOutcome::skipped(SkipReason::DependencyFailed)
        );
        assert_eq!(
            outcome_of(&results, "route POST /one"),
            &ResourceOutcome::skipped(SkipReason::PendingBackend)
        );
        assert_eq!(outcome_of(&results, "rg/A2.settings"), &ResourceOutcome::Succeeded);
        assert!(provider.settings_of(&ResourceId::new("rg", "A1")).is_none());
        assert_eq!(
            provider.call_count(ProviderOp::PutApp),
            usize::try_from(max_attempts).unwrap() + 1
        );
    }
}
