//! State reader: snapshots of what the provider currently holds.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::ResourceId;
use crate::error::Result;
use crate::gateway::PolicyDocument;

use super::client::CloudProvider;
use super::retry::RetryPolicy;
use super::types::{AppResource, PlanResource};

/// A snapshot of provider state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedState {
    /// Plans by identity.
    pub plans: BTreeMap<ResourceId, PlanResource>,
    /// Apps by identity.
    pub apps: BTreeMap<ResourceId, AppResource>,
    /// Current settings per app.
    pub settings: BTreeMap<ResourceId, BTreeMap<String, String>>,
    /// Gateway policy, if the API has one.
    pub policy: Option<PolicyDocument>,
}

/// Reads provider state.
pub struct StateReader {
    provider: Arc<dyn CloudProvider>,
    retry: RetryPolicy,
}

impl ObservedState {
    /// Folds another snapshot into this one.
    pub fn merge(&mut self, other: Self) {
        self.plans.extend(other.plans);
        self.apps.extend(other.apps);
        self.settings.extend(other.settings);
        if other.policy.is_some() {
            self.policy = other.policy;
        }
    }

    /// Returns true when nothing was observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty() && self.apps.is_empty() && self.policy.is_none()
    }

    /// Hostname of an app, if known.
    #[must_use]
    pub fn hostname_of(&self, app: &ResourceId) -> Option<&str> {
        self.apps
            .get(app)
            .and_then(|a| a.default_hostname.as_deref())
    }
}

impl StateReader {
    /// Creates a reader.
    #[must_use]
    pub fn new(provider: Arc<dyn CloudProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    /// Lists plans, apps and each app's settings in one resource group.
    ///
    /// A resource group that does not exist yields an empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns the provider error once retries are exhausted.
    pub async fn observe_group(
        &self,
        resource_group: &str,
        deadline: Option<Instant>,
    ) -> Result<ObservedState> {
        debug!("Observing resource group {resource_group}");
        let provider = self.provider.as_ref();
        let mut observed = ObservedState::default();

        let plans = self
            .retry
            .run(&format!("list plans in {resource_group}"), deadline, move || {
                provider.list_plans(resource_group)
            })
            .await
            .result;
        let plans = match plans {
            Err(e) if e.is_not_found() => return Ok(observed),
            other => other?,
        };

        let apps = self
            .retry
            .run(&format!("list apps in {resource_group}"), deadline, move || {
                provider.list_apps(resource_group)
            })
            .await
            .result;
        let apps = match apps {
            Err(e) if e.is_not_found() => Vec::new(),
            other => other?,
        };

        for plan in plans {
            observed.plans.insert(plan.id(), plan);
        }

        for app in apps {
            let id = app.id();
            let target = &id;
            let settings = self
                .retry
                .run(&format!("read settings of {id}"), deadline, move || {
                    provider.get_app_settings(target)
                })
                .await
                .result;
            let settings = match settings {
                Err(e) if e.is_not_found() => BTreeMap::new(),
                other => other?,
            };
            observed.settings.insert(id.clone(), settings);
            observed.apps.insert(id, app);
        }

        Ok(observed)
    }

    /// Reads the gateway policy of an API.
    ///
    /// # Errors
    ///
    /// Returns the provider error once retries are exhausted.
    pub async fn observe_policy(
        &self,
        resource_group: &str,
        api: &str,
        deadline: Option<Instant>,
    ) -> Result<Option<PolicyDocument>> {
        let provider = self.provider.as_ref();
        let policy = self
            .retry
            .run(&format!("read policy of {api}"), deadline, move || {
                provider.get_policy(resource_group, api)
            })
            .await
            .result;
        match policy {
            Err(e) if e.is_not_found() => Ok(None),
            other => other,
        }
    }

    /// Observes every resource group plus the gateway policy and merges the
    /// snapshots.
    ///
    /// # Errors
    ///
    /// Returns the first provider error once retries are exhausted.
    pub async fn observe(
        &self,
        resource_groups: &BTreeSet<String>,
        gateway_group: &str,
        api: &str,
        deadline: Option<Instant>,
    ) -> Result<ObservedState> {
        let mut observed = ObservedState::default();
        for group in resource_groups {
            observed.merge(self.observe_group(group, deadline).await?);
        }
        observed.policy = self.observe_policy(gateway_group, api, deadline).await?;

        info!(
            "Observed {} plans, {} apps, policy {}",
            observed.plans.len(),
            observed.apps.len(),
            if observed.policy.is_some() { "present" } else { "absent" }
        );
        Ok(observed)
    }
}

impl std::fmt::Debug for StateReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateReader")
            .field("provider", &self.provider.provider_type())
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OsType, RuntimeDescriptor, RuntimeProfile};
    use crate::error::{FuncsyncError, ProviderError};
    use crate::provider::memory::{Fault, InMemoryProvider, ProviderOp};
    use crate::provider::types::{AppSpec, PlanSpec};
    use std::time::Duration;

    fn fast() -> RetryPolicy {
        RetryPolicy::default().with_base_delay(Duration::from_millis(1))
    }

    fn seeded(group: &str) -> InMemoryProvider {
        let provider = InMemoryProvider::new();
        provider.seed_plan(&PlanSpec {
            resource_group: group.to_string(),
            name: String::from("search-plan"),
            sku: String::from("Y1"),
            os: OsType::Linux,
        });
        provider.seed_app(&AppSpec {
            resource_group: group.to_string(),
            name: String::from("html-search"),
            region: String::from("eastus"),
            plan: String::from("search-plan"),
            runtime: RuntimeDescriptor {
                language: String::from("python"),
                version: String::from("3.11"),
                workers: 1,
            },
            profile: RuntimeProfile::Custom,
            storage_account: String::from("searchfuncstore"),
            artifact_location: String::from("https://builds/html-search.zip"),
            artifact_sha256: "0".repeat(64),
        });
        provider
    }

    #[tokio::test]
    async fn test_observe_group() {
        let reader = StateReader::new(Arc::new(seeded("rg-search")), fast());
        let observed = reader.observe_group("rg-search", None).await.unwrap();

        assert_eq!(observed.plans.len(), 1);
        assert_eq!(observed.apps.len(), 1);
        let id = ResourceId::new("rg-search", "html-search");
        assert!(observed.settings.contains_key(&id));
        assert_eq!(
            observed.hostname_of(&id),
            Some("html-search.azurewebsites.net")
        );
    }

    #[tokio::test]
    async fn test_not_found_is_empty() {
        let provider = InMemoryProvider::new();
        provider.inject_fault(ProviderOp::ListPlans, None, Fault::NotFound, 1);
        provider.inject_fault(ProviderOp::GetPolicy, None, Fault::NotFound, 1);
        let reader = StateReader::new(Arc::new(provider), fast());

        let observed = reader.observe_group("rg-missing", None).await.unwrap();
        assert!(observed.is_empty());
        let policy = reader
            .observe_policy("rg-missing", "search-api", None)
            .await
            .unwrap();
        assert!(policy.is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let provider = seeded("rg-search");
        provider.inject_fault(ProviderOp::ListApps, None, Fault::Unavailable, 2);
        let provider = Arc::new(provider);

        let reader = StateReader::new(provider.clone(), fast());
        let observed = reader.observe_group("rg-search", None).await.unwrap();
        assert_eq!(observed.apps.len(), 1);
        assert_eq!(provider.call_count(ProviderOp::ListApps), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_unavailable() {
        let provider = seeded("rg-search");
        provider.inject_fault(ProviderOp::ListPlans, None, Fault::Unavailable, 10);
        let reader = StateReader::new(Arc::new(provider), fast());

        let err = reader.observe_group("rg-search", None).await.unwrap_err();
        assert!(matches!(
            err,
            FuncsyncError::Provider(ProviderError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_merge_across_groups() {
        let provider = seeded("rg-a");
        provider.seed_plan(&PlanSpec {
            resource_group: String::from("rg-b"),
            name: String::from("search-plan"),
            sku: String::from("EP1"),
            os: OsType::Linux,
        });
        let reader = StateReader::new(Arc::new(provider), fast());
        let groups: BTreeSet<String> = ["rg-a", "rg-b"].iter().map(ToString::to_string).collect();

        let observed = reader
            .observe(&groups, "rg-a", "search-api", None)
            .await
            .unwrap();
        assert_eq!(observed.plans.len(), 2);
        assert_eq!(observed.apps.len(), 1);
        assert!(observed.policy.is_none());
    }
}
