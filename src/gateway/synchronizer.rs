//! Gateway policy synchronizer.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RouteBinding;
use crate::provider::{Attempted, CloudProvider, RetryPolicy};

use super::policy::{PendingRoute, PolicyDocument, RenderedPolicy, render_policy};

/// Writes the route table of one gateway API.
pub struct PolicySynchronizer {
    provider: Arc<dyn CloudProvider>,
    retry: RetryPolicy,
    resource_group: String,
    api: String,
    prune: bool,
}

/// What a sync did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Whether a replace call was made.
    pub applied: bool,
    /// The document now in effect.
    pub document: PolicyDocument,
    /// Bindings held back because their backend is not Ready.
    pub pending: Vec<PendingRoute>,
}

impl PolicySynchronizer {
    /// Creates a synchronizer for `api` in `resource_group`.
    #[must_use]
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        retry: RetryPolicy,
        resource_group: impl Into<String>,
        api: impl Into<String>,
        prune: bool,
    ) -> Self {
        Self {
            provider,
            retry,
            resource_group: resource_group.into(),
            api: api.into(),
            prune,
        }
    }

    /// Gateway API name.
    #[must_use]
    pub fn api(&self) -> &str {
        &self.api
    }

    /// Renders the document for the given Ready hosts.
    #[must_use]
    pub fn render(
        &self,
        bindings: &[RouteBinding],
        hosts: &BTreeMap<String, String>,
        observed: Option<&PolicyDocument>,
    ) -> RenderedPolicy {
        render_policy(&self.api, bindings, hosts, observed, self.prune)
    }

    /// Renders the policy and replaces the observed one when they differ.
    ///
    /// `hosts` maps backend app names to the hostname of a Ready app; any
    /// binding whose backend is missing from it is reported pending.
    pub async fn sync(
        &self,
        bindings: &[RouteBinding],
        hosts: &BTreeMap<String, String>,
        observed: Option<&PolicyDocument>,
        deadline: Option<Instant>,
    ) -> Attempted<SyncOutcome> {
        let RenderedPolicy { document, pending } = self.render(bindings, hosts, observed);
        for route in &pending {
            warn!(
                "Route {} {} held back: backend '{}' is not ready",
                route.method, route.path, route.backend
            );
        }

        if document.matches_observed(observed) {
            debug!("Policy of {} is up to date", self.api);
            return Attempted {
                result: Ok(SyncOutcome {
                    applied: false,
                    document,
                    pending,
                }),
                attempts: 0,
            };
        }

        info!(
            "Replacing policy of {} with {} route(s)",
            self.api,
            document.routes.len()
        );
        let provider = self.provider.as_ref();
        let resource_group = self.resource_group.as_str();
        let body = &document;
        let Attempted { result, attempts } = self
            .retry
            .run(&format!("put policy {}", self.api), deadline, move || {
                provider.put_policy(resource_group, body)
            })
            .await;

        Attempted {
            result: result.map(|()| SyncOutcome {
                applied: true,
                document,
                pending,
            }),
            attempts,
        }
    }
}

impl std::fmt::Debug for PolicySynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicySynchronizer")
            .field("provider", &self.provider.provider_type())
            .field("resource_group", &self.resource_group)
            .field("api", &self.api)
            .field("prune", &self.prune)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpMethod;
    use crate::provider::{Fault, InMemoryProvider, ProviderOp};
    use std::time::Duration;

    fn binding(path: &str, backend: &str) -> RouteBinding {
        RouteBinding {
            path: path.to_string(),
            method: HttpMethod::Post,
            backend: backend.to_string(),
            backend_path: None,
            content_type: String::from("application/json"),
            headers: BTreeMap::new(),
        }
    }

    fn synchronizer(provider: Arc<InMemoryProvider>) -> PolicySynchronizer {
        PolicySynchronizer::new(
            provider,
            RetryPolicy::default().with_base_delay(Duration::from_millis(1)),
            "rg-search",
            "search-api",
            false,
        )
    }

    #[tokio::test]
    async fn test_sync_applies_then_noops() {
        let provider = Arc::new(InMemoryProvider::new());
        let sync = synchronizer(provider.clone());
        let bindings = vec![binding("/search", "html-search")];
        let hosts = BTreeMap::from([(
            String::from("html-search"),
            String::from("html-search.azurewebsites.net"),
        )]);

        let first = sync.sync(&bindings, &hosts, None, None).await.result.unwrap();
        assert!(first.applied);
        let stored = provider.policy_of("rg-search", "search-api").unwrap();
        assert!(stored.equivalent(&first.document));

        let second = sync
            .sync(&bindings, &hosts, Some(&stored), None)
            .await
            .result
            .unwrap();
        assert!(!second.applied);
        assert_eq!(provider.call_count(ProviderOp::PutPolicy), 1);
    }

    #[tokio::test]
    async fn test_pending_binding_never_written() {
        let provider = Arc::new(InMemoryProvider::new());
        let sync = synchronizer(provider.clone());
        let bindings = vec![binding("/search", "html-search"), binding("/pdf", "pdf-search")];
        let hosts = BTreeMap::from([(
            String::from("html-search"),
            String::from("html-search.azurewebsites.net"),
        )]);

        let outcome = sync.sync(&bindings, &hosts, None, None).await.result.unwrap();
        assert_eq!(outcome.pending.len(), 1);
        let stored = provider.policy_of("rg-search", "search-api").unwrap();
        assert!(stored.routes.iter().all(|r| r.path != "/pdf"));
    }

    #[tokio::test]
    async fn test_empty_table_against_absent_policy_is_noop() {
        let provider = Arc::new(InMemoryProvider::new());
        let sync = synchronizer(provider.clone());

        let outcome = sync.sync(&[], &BTreeMap::new(), None, None).await;
        assert_eq!(outcome.attempts, 0);
        assert!(!outcome.result.unwrap().applied);
        assert_eq!(provider.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_put_surfaces() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.inject_fault(ProviderOp::PutPolicy, None, Fault::Rejected { status: 400 }, 1);
        let sync = synchronizer(provider.clone());
        let hosts = BTreeMap::from([(String::from("a"), String::from("a.azurewebsites.net"))]);

        let outcome = sync.sync(&[binding("/a", "a")], &hosts, None, None).await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 1);
    }
}
