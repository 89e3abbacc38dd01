//! Resource provisioner for plans and apps.
//!
//! Wraps provider mutations with retries. Plan writes are serialized per
//! plan identity, and a plan created earlier in the same pass is reused
//! instead of being created again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::ResourceId;

use super::client::CloudProvider;
use super::retry::{Attempted, RetryPolicy};
use super::types::{AppResource, AppSpec, PlanResource, PlanSpec};

/// Provisions plans and apps for one reconciliation pass.
pub struct ResourceProvisioner {
    provider: Arc<dyn CloudProvider>,
    retry: RetryPolicy,
    plan_locks: Mutex<HashMap<ResourceId, Arc<tokio::sync::Mutex<()>>>>,
    created_plans: Mutex<HashMap<ResourceId, PlanResource>>,
}

impl ResourceProvisioner {
    /// Creates a provisioner.
    #[must_use]
    pub fn new(provider: Arc<dyn CloudProvider>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            retry,
            plan_locks: Mutex::new(HashMap::new()),
            created_plans: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the retry policy used for every call.
    #[must_use]
    pub const fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Returns the underlying provider.
    #[must_use]
    pub fn provider(&self) -> &dyn CloudProvider {
        self.provider.as_ref()
    }

    fn plan_lock(&self, id: &ResourceId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.plan_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id.clone()).or_default())
    }

    /// Creates a plan, or updates it when `update` is set.
    ///
    /// A create for a plan already created in this pass returns the earlier
    /// result without a provider call.
    pub async fn ensure_plan(
        &self,
        spec: &PlanSpec,
        update: bool,
        deadline: Option<Instant>,
    ) -> Attempted<PlanResource> {
        let id = spec.id();
        let lock = self.plan_lock(&id);
        let _guard = lock.lock().await;

        let cached = if update {
            None
        } else {
            self.created_plans
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&id)
                .cloned()
        };
        if let Some(existing) = cached {
            debug!("Plan {id} already created in this pass");
            return Attempted {
                result: Ok(existing),
                attempts: 0,
            };
        }

        info!("{} plan {id} (sku {})", if update { "Updating" } else { "Creating" }, spec.sku);
        let provider = self.provider.as_ref();
        let attempted = self
            .retry
            .run(&format!("put plan {id}"), deadline, move || provider.put_plan(spec))
            .await;

        if let Ok(plan) = &attempted.result {
            self.created_plans
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id, plan.clone());
        }
        attempted
    }

    /// Creates or updates an app.
    pub async fn ensure_app(&self, spec: &AppSpec, deadline: Option<Instant>) -> Attempted<AppResource> {
        let id = spec.id();
        info!("Provisioning app {id} on plan {}", spec.plan);
        let provider = self.provider.as_ref();
        self.retry
            .run(&format!("put app {id}"), deadline, move || provider.put_app(spec))
            .await
    }

    /// Deletes an app.
    pub async fn delete_app(&self, id: &ResourceId, deadline: Option<Instant>) -> Attempted<()> {
        info!("Deleting app {id}");
        let provider = self.provider.as_ref();
        self.retry
            .run(&format!("delete app {id}"), deadline, move || provider.delete_app(id))
            .await
    }

    /// Deletes a plan.
    pub async fn delete_plan(&self, id: &ResourceId, deadline: Option<Instant>) -> Attempted<()> {
        let lock = self.plan_lock(id);
        let _guard = lock.lock().await;

        info!("Deleting plan {id}");
        let provider = self.provider.as_ref();
        self.retry
            .run(&format!("delete plan {id}"), deadline, move || provider.delete_plan(id))
            .await
    }
}

impl std::fmt::Debug for ResourceProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceProvisioner")
            .field("provider", &self.provider.provider_type())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OsType;
    use crate::provider::memory::{Fault, InMemoryProvider, ProviderOp};
    use std::time::Duration;

    fn plan_spec() -> PlanSpec {
        PlanSpec {
            resource_group: String::from("rg-search"),
            name: String::from("search-plan"),
            sku: String::from("Y1"),
            os: OsType::Linux,
        }
    }

    #[tokio::test]
    async fn test_concurrent_creates_hit_provider_once() {
        let provider = Arc::new(InMemoryProvider::new().with_latency(Duration::from_millis(5)));
        let provisioner = Arc::new(ResourceProvisioner::new(
            provider.clone(),
            RetryPolicy::default(),
        ));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..4 {
            let provisioner = Arc::clone(&provisioner);
            tasks.spawn(async move {
                provisioner
                    .ensure_plan(&plan_spec(), false, None)
                    .await
                    .result
                    .is_ok()
            });
        }
        while let Some(ok) = tasks.join_next().await {
            assert!(ok.unwrap());
        }

        assert_eq!(provider.call_count(ProviderOp::PutPlan), 1);
    }

    #[tokio::test]
    async fn test_update_always_calls_provider() {
        let provider = Arc::new(InMemoryProvider::new());
        let provisioner = ResourceProvisioner::new(provider.clone(), RetryPolicy::default());

        provisioner.ensure_plan(&plan_spec(), false, None).await.result.unwrap();
        provisioner.ensure_plan(&plan_spec(), true, None).await.result.unwrap();
        assert_eq!(provider.call_count(ProviderOp::PutPlan), 2);
    }

    #[tokio::test]
    async fn test_failed_create_is_not_cached() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.inject_fault(ProviderOp::PutPlan, None, Fault::Rejected { status: 400 }, 1);
        let provisioner = ResourceProvisioner::new(provider.clone(), RetryPolicy::default());

        let first = provisioner.ensure_plan(&plan_spec(), false, None).await;
        assert!(first.result.is_err());
        assert_eq!(first.attempts, 1);

        let second = provisioner.ensure_plan(&plan_spec(), false, None).await;
        assert!(second.result.is_ok());
        assert_eq!(provider.call_count(ProviderOp::PutPlan), 2);
    }
}
