//! In-memory control plane.
//!
//! Used for local rehearsals (`--provider memory`) and for tests. Supports
//! fault injection per operation and target, artificial latency, and a call
//! log for asserting what the reconciler did.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::config::ResourceId;
use crate::error::{FuncsyncError, ProviderError, Result};
use crate::gateway::PolicyDocument;
use crate::settings::ResolvedSettings;

use super::client::CloudProvider;
use super::types::{AppResource, AppSpec, AppState, PlanResource, PlanSpec};

/// Provider operations, for fault injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOp {
    /// `list_plans`.
    ListPlans,
    /// `list_apps`.
    ListApps,
    /// `get_app_settings`.
    GetSettings,
    /// `get_policy`.
    GetPolicy,
    /// `put_plan`.
    PutPlan,
    /// `put_app`.
    PutApp,
    /// `apply_settings`.
    ApplySettings,
    /// `put_policy`.
    PutPolicy,
    /// `delete_app`.
    DeleteApp,
    /// `delete_plan`.
    DeletePlan,
}

/// Error returned by an injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Transient unavailability.
    Unavailable,
    /// Throttling with a retry delay.
    RateLimited {
        /// Delay to report.
        retry_after_ms: u64,
    },
    /// The target does not exist.
    NotFound,
    /// Permanent rejection.
    Rejected {
        /// Status to report.
        status: u16,
    },
}

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Operation.
    pub op: ProviderOp,
    /// Resource group, resource name or API the call targeted.
    pub target: String,
}

#[derive(Debug)]
struct InjectedFault {
    op: ProviderOp,
    target: Option<String>,
    fault: Fault,
    remaining: u32,
}

#[derive(Debug, Default)]
struct Inner {
    plans: BTreeMap<ResourceId, PlanResource>,
    apps: BTreeMap<ResourceId, AppResource>,
    settings: BTreeMap<ResourceId, BTreeMap<String, String>>,
    policies: BTreeMap<(String, String), PolicyDocument>,
    faults: Vec<InjectedFault>,
    calls: Vec<RecordedCall>,
}

/// A control plane held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    inner: Mutex<Inner>,
    latency: Option<Duration>,
}

/// Hostname suffix assigned to new apps.
pub const HOSTNAME_SUFFIX: &str = "azurewebsites.net";

impl ProviderOp {
    /// Returns true for operations that change provider state.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        matches!(
            self,
            Self::PutPlan
                | Self::PutApp
                | Self::ApplySettings
                | Self::PutPolicy
                | Self::DeleteApp
                | Self::DeletePlan
        )
    }
}

impl Fault {
    fn into_error(self, target: &str) -> FuncsyncError {
        let err = match self {
            Self::Unavailable => ProviderError::unavailable(format!("injected fault on {target}")),
            Self::RateLimited { retry_after_ms } => ProviderError::RateLimited { retry_after_ms },
            Self::NotFound => ProviderError::not_found(target),
            Self::Rejected { status } => {
                ProviderError::rejected(status, format!("injected rejection of {target}"))
            }
        };
        err.into()
    }
}

impl InMemoryProvider {
    /// Creates an empty control plane.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `times` calls of `op` fail with `fault`.
    ///
    /// With a `target`, only calls naming that resource group, resource or
    /// API are affected.
    pub fn inject_fault(&self, op: ProviderOp, target: Option<&str>, fault: Fault, times: u32) {
        self.lock().faults.push(InjectedFault {
            op,
            target: target.map(ToString::to_string),
            fault,
            remaining: times,
        });
    }

    /// Inserts a plan without recording a call.
    pub fn seed_plan(&self, spec: &PlanSpec) {
        self.lock().plans.insert(spec.id(), plan_from_spec(spec));
    }

    /// Inserts an app without recording a call.
    pub fn seed_app(&self, spec: &AppSpec) {
        self.lock().apps.insert(spec.id(), app_from_spec(spec, None));
    }

    /// Replaces an app's settings without recording a call.
    pub fn seed_settings(&self, app: &ResourceId, settings: BTreeMap<String, String>) {
        self.lock().settings.insert(app.clone(), settings);
    }

    /// Stores a policy without recording a call.
    pub fn seed_policy(&self, resource_group: &str, policy: PolicyDocument) {
        self.lock()
            .policies
            .insert((resource_group.to_string(), policy.api.clone()), policy);
    }

    /// Overrides an app's runtime state.
    pub fn set_app_state(&self, app: &ResourceId, state: AppState) {
        if let Some(existing) = self.lock().apps.get_mut(app) {
            existing.state = state;
        }
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Number of calls of one operation.
    #[must_use]
    pub fn call_count(&self, op: ProviderOp) -> usize {
        self.lock().calls.iter().filter(|c| c.op == op).count()
    }

    /// Number of state-changing calls, failed ones included.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.lock().calls.iter().filter(|c| c.op.is_mutation()).count()
    }

    /// Current settings of an app, without recording a call.
    #[must_use]
    pub fn settings_of(&self, app: &ResourceId) -> Option<BTreeMap<String, String>> {
        self.lock().settings.get(app).cloned()
    }

    /// Current policy of an API, without recording a call.
    #[must_use]
    pub fn policy_of(&self, resource_group: &str, api: &str) -> Option<PolicyDocument> {
        self.lock()
            .policies
            .get(&(resource_group.to_string(), api.to_string()))
            .cloned()
    }

    /// Records a call, sleeps for the configured latency, then checks for
    /// an injected fault.
    async fn enter(&self, op: ProviderOp, target: &str) -> Result<()> {
        self.lock().calls.push(RecordedCall {
            op,
            target: target.to_string(),
        });

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.lock();
        let hit = inner.faults.iter_mut().find(|f| {
            f.op == op && f.remaining > 0 && f.target.as_deref().is_none_or(|t| t == target)
        });
        match hit {
            Some(fault) => {
                fault.remaining -= 1;
                debug!("Injecting {:?} into {op:?} {target}", fault.fault);
                Err(fault.fault.into_error(target))
            }
            None => Ok(()),
        }
    }
}

fn plan_from_spec(spec: &PlanSpec) -> PlanResource {
    PlanResource {
        resource_group: spec.resource_group.clone(),
        name: spec.name.clone(),
        sku: spec.sku.clone(),
        os: spec.os,
    }
}

fn app_from_spec(spec: &AppSpec, hostname: Option<String>) -> AppResource {
    AppResource {
        resource_group: spec.resource_group.clone(),
        name: spec.name.clone(),
        region: spec.region.clone(),
        plan: spec.plan.clone(),
        runtime: spec.runtime.clone(),
        profile: spec.profile,
        storage_account: spec.storage_account.clone(),
        artifact_sha256: spec.artifact_sha256.clone(),
        state: AppState::Running,
        default_hostname: Some(
            hostname.unwrap_or_else(|| format!("{}.{HOSTNAME_SUFFIX}", spec.name)),
        ),
    }
}

#[async_trait]
impl CloudProvider for InMemoryProvider {
    async fn list_plans(&self, resource_group: &str) -> Result<Vec<PlanResource>> {
        self.enter(ProviderOp::ListPlans, resource_group).await?;
        Ok(self
            .lock()
            .plans
            .values()
            .filter(|p| p.resource_group == resource_group)
            .cloned()
            .collect())
    }

    async fn list_apps(&self, resource_group: &str) -> Result<Vec<AppResource>> {
        self.enter(ProviderOp::ListApps, resource_group).await?;
        Ok(self
            .lock()
            .apps
            .values()
            .filter(|a| a.resource_group == resource_group)
            .cloned()
            .collect())
    }

    async fn get_app_settings(&self, app: &ResourceId) -> Result<BTreeMap<String, String>> {
        self.enter(ProviderOp::GetSettings, &app.name).await?;
        let inner = self.lock();
        if !inner.apps.contains_key(app) {
            return Err(ProviderError::not_found(app.to_string()).into());
        }
        Ok(inner.settings.get(app).cloned().unwrap_or_default())
    }

    async fn get_policy(&self, resource_group: &str, api: &str) -> Result<Option<PolicyDocument>> {
        self.enter(ProviderOp::GetPolicy, api).await?;
        Ok(self.policy_of(resource_group, api))
    }

    async fn put_plan(&self, plan: &PlanSpec) -> Result<PlanResource> {
        self.enter(ProviderOp::PutPlan, &plan.name).await?;
        let resource = plan_from_spec(plan);
        self.lock().plans.insert(plan.id(), resource.clone());
        Ok(resource)
    }

    async fn put_app(&self, app: &AppSpec) -> Result<AppResource> {
        self.enter(ProviderOp::PutApp, &app.name).await?;
        let mut inner = self.lock();
        if !inner
            .plans
            .contains_key(&ResourceId::new(&app.resource_group, &app.plan))
        {
            return Err(ProviderError::rejected(
                400,
                format!("plan '{}/{}' does not exist", app.resource_group, app.plan),
            )
            .into());
        }
        let hostname = inner
            .apps
            .get(&app.id())
            .and_then(|a| a.default_hostname.clone());
        let resource = app_from_spec(app, hostname);
        inner.apps.insert(app.id(), resource.clone());
        Ok(resource)
    }

    async fn apply_settings(&self, app: &ResourceId, settings: &ResolvedSettings) -> Result<()> {
        self.enter(ProviderOp::ApplySettings, &app.name).await?;
        let mut inner = self.lock();
        if !inner.apps.contains_key(app) {
            return Err(ProviderError::not_found(app.to_string()).into());
        }
        let current = inner.settings.entry(app.clone()).or_default();
        for (key, value) in settings.iter() {
            current.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    async fn put_policy(&self, resource_group: &str, policy: &PolicyDocument) -> Result<()> {
        self.enter(ProviderOp::PutPolicy, &policy.api).await?;
        self.lock().policies.insert(
            (resource_group.to_string(), policy.api.clone()),
            policy.clone(),
        );
        Ok(())
    }

    async fn delete_app(&self, app: &ResourceId) -> Result<()> {
        self.enter(ProviderOp::DeleteApp, &app.name).await?;
        let mut inner = self.lock();
        inner.apps.remove(app);
        inner.settings.remove(app);
        Ok(())
    }

    async fn delete_plan(&self, plan: &ResourceId) -> Result<()> {
        self.enter(ProviderOp::DeletePlan, &plan.name).await?;
        let mut inner = self.lock();
        if inner.apps.values().any(|a| &a.plan_id() == plan) {
            return Err(ProviderError::rejected(409, format!("plan '{plan}' still hosts apps")).into());
        }
        inner.plans.remove(plan);
        Ok(())
    }

    fn provider_type(&self) -> &'static str {
        "memory"
    }
}
