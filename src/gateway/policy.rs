//! Gateway policy document model and rendering.
//!
//! A policy document is the full route table of one gateway API. Rendering
//! is pure: routes are sorted by path then method and headers live in a
//! `BTreeMap`, so identical inputs serialize to identical bytes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::{HttpMethod, RouteBinding};

/// The route table of a gateway API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDocument {
    /// Gateway API name.
    pub api: String,
    /// Routes, sorted by path then method.
    #[serde(default)]
    pub routes: Vec<PolicyRoute>,
}

/// One entry of the route table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRoute {
    /// Public path.
    pub path: String,
    /// HTTP method.
    pub method: HttpMethod,
    /// Backend URL (`https://<hostname>/<backend_path>`).
    pub backend_url: String,
    /// Content type forwarded to the backend.
    pub content_type: String,
    /// Extra headers set on the backend request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// A binding held back because its backend is not Ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRoute {
    /// Public path.
    pub path: String,
    /// HTTP method.
    pub method: HttpMethod,
    /// Backend app name.
    pub backend: String,
}

/// Result of rendering a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPolicy {
    /// The document to apply.
    pub document: PolicyDocument,
    /// Bindings left out of the document.
    pub pending: Vec<PendingRoute>,
}

/// Renders the policy for a set of bindings.
///
/// `hosts` maps backend app names to the hostname of a Ready app. Without
/// `prune`, observed routes whose (path, method) is not declared are kept
/// verbatim.
#[must_use]
pub fn render_policy(
    api: &str,
    bindings: &[RouteBinding],
    hosts: &BTreeMap<String, String>,
    observed: Option<&PolicyDocument>,
    prune: bool,
) -> RenderedPolicy {
    let mut routes = Vec::with_capacity(bindings.len());
    let mut pending = Vec::new();
    let declared: BTreeSet<(&str, HttpMethod)> = bindings
        .iter()
        .map(|b| (b.path.as_str(), b.method))
        .collect();

    for binding in bindings {
        match hosts.get(&binding.backend) {
            Some(host) => routes.push(PolicyRoute {
                path: binding.path.clone(),
                method: binding.method,
                backend_url: format!("https://{host}/{}", binding.effective_backend_path()),
                content_type: binding.content_type.clone(),
                headers: binding.headers.clone(),
            }),
            None => {
                debug!(
                    "Route {} {} pending: backend '{}' not ready",
                    binding.method, binding.path, binding.backend
                );
                pending.push(PendingRoute {
                    path: binding.path.clone(),
                    method: binding.method,
                    backend: binding.backend.clone(),
                });
            }
        }
    }

    if !prune && let Some(observed) = observed {
        routes.extend(
            observed
                .routes
                .iter()
                .filter(|r| !declared.contains(&(r.path.as_str(), r.method)))
                .cloned(),
        );
    }

    let mut document = PolicyDocument {
        api: api.to_string(),
        routes,
    };
    document.normalize();
    pending.sort_by(|a, b| (&a.path, a.method).cmp(&(&b.path, b.method)));

    RenderedPolicy { document, pending }
}

impl PolicyDocument {
    /// Creates an empty document for an API.
    #[must_use]
    pub fn empty(api: impl Into<String>) -> Self {
        Self {
            api: api.into(),
            routes: Vec::new(),
        }
    }

    /// Sorts routes into canonical order.
    pub fn normalize(&mut self) {
        self.routes.sort();
        self.routes.dedup_by(|a, b| a.path == b.path && a.method == b.method);
    }

    /// Canonical JSON encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_canonical_json(&self) -> serde_json::Result<String> {
        let mut normalized = self.clone();
        normalized.normalize();
        serde_json::to_string(&normalized)
    }

    /// Returns true when both documents describe the same route table.
    #[must_use]
    pub fn equivalent(&self, other: &Self) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.normalize();
        b.normalize();
        a == b
    }

    /// Compares against an observed document; absence equals an empty table.
    #[must_use]
    pub fn matches_observed(&self, observed: Option<&Self>) -> bool {
        observed.map_or(self.routes.is_empty(), |o| self.equivalent(o))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(path: &str, method: HttpMethod, backend: &str) -> RouteBinding {
        RouteBinding {
            path: path.to_string(),
            method,
            backend: backend.to_string(),
            backend_path: None,
            content_type: String::from("application/json"),
            headers: BTreeMap::new(),
        }
    }

    fn hosts(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_render_is_sorted_and_deterministic() {
        let bindings = vec![
            binding("/upload", HttpMethod::Post, "blob-upload"),
            binding("/search", HttpMethod::Post, "html-search"),
            binding("/search", HttpMethod::Get, "html-search"),
        ];
        let hosts = hosts(&[
            ("html-search", "html-search.azurewebsites.net"),
            ("blob-upload", "blob-upload.azurewebsites.net"),
        ]);

        let first = render_policy("search-api", &bindings, &hosts, None, false);
        let mut reversed = bindings.clone();
        reversed.reverse();
        let second = render_policy("search-api", &reversed, &hosts, None, false);

        assert_eq!(
            first.document.to_canonical_json().unwrap(),
            second.document.to_canonical_json().unwrap()
        );
        let order: Vec<_> = first
            .document
            .routes
            .iter()
            .map(|r| (r.path.as_str(), r.method))
            .collect();
        assert_eq!(
            order,
            vec![
                ("/search", HttpMethod::Get),
                ("/search", HttpMethod::Post),
                ("/upload", HttpMethod::Post)
            ]
        );
        assert_eq!(
            first.document.routes[1].backend_url,
            "https://html-search.azurewebsites.net/api/search"
        );
    }

    #[test]
    fn test_pending_backend_left_out() {
        let bindings = vec![
            binding("/search", HttpMethod::Post, "html-search"),
            binding("/pdf", HttpMethod::Post, "pdf-search"),
        ];
        let hosts = hosts(&[("html-search", "html-search.azurewebsites.net")]);

        let rendered = render_policy("search-api", &bindings, &hosts, None, false);
        assert_eq!(rendered.document.routes.len(), 1);
        assert_eq!(rendered.pending.len(), 1);
        assert_eq!(rendered.pending[0].backend, "pdf-search");
    }

    #[test]
    fn test_undeclared_observed_routes_kept_without_prune() {
        let observed = PolicyDocument {
            api: String::from("search-api"),
            routes: vec![PolicyRoute {
                path: String::from("/legacy"),
                method: HttpMethod::Get,
                backend_url: String::from("https://old.azurewebsites.net/api/legacy"),
                content_type: String::from("application/json"),
                headers: BTreeMap::new(),
            }],
        };
        let bindings = vec![binding("/search", HttpMethod::Post, "html-search")];
        let hosts = hosts(&[("html-search", "html-search.azurewebsites.net")]);

        let kept = render_policy("search-api", &bindings, &hosts, Some(&observed), false);
        assert_eq!(kept.document.routes.len(), 2);

        let pruned = render_policy("search-api", &bindings, &hosts, Some(&observed), true);
        assert_eq!(pruned.document.routes.len(), 1);
        assert_eq!(pruned.document.routes[0].path, "/search");
    }

    #[test]
    fn test_absent_policy_matches_empty_table() {
        let empty = PolicyDocument::empty("search-api");
        assert!(empty.matches_observed(None));

        let rendered = render_policy(
            "search-api",
            &[binding("/search", HttpMethod::Post, "html-search")],
            &hosts(&[("html-search", "h.example.net")]),
            None,
            false,
        );
        assert!(!rendered.document.matches_observed(None));
        assert!(
            rendered
                .document
                .matches_observed(Some(&rendered.document.clone()))
        );
    }
}
