//! HTTP control-plane client.
//!
//! This module talks to a JSON REST control plane:
//!
//! | Call | Request |
//! |------|---------|
//! | list plans / apps | `GET {base}/resourceGroups/{rg}/plans`, `.../apps` |
//! | app settings | `GET` / `PATCH .../apps/{name}/settings` |
//! | plan / app write | `PUT .../plans/{name}`, `PUT .../apps/{name}` |
//! | policy | `GET` / `PUT .../apis/{api}/policy` |
//! | delete | `DELETE .../apps/{name}`, `DELETE .../plans/{name}` |
//!
//! Each method issues exactly one request; retries belong to the caller.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, header};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::ResourceId;
use crate::error::{FuncsyncError, ProviderError, Result};
use crate::gateway::PolicyDocument;
use crate::settings::ResolvedSettings;

use super::client::CloudProvider;
use super::types::{AppResource, AppSpec, PlanResource, PlanSpec};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Delay assumed when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_MS: u64 = 1000;

/// REST control-plane client.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// HTTP client.
    client: Client,
    /// Base URL without trailing slash.
    base_url: String,
    /// Bearer token.
    token: String,
}

impl HttpProvider {
    /// Creates a client for the given control plane.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(base_url: &str, token: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::unavailable(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn group_url(&self, resource_group: &str) -> String {
        format!("{}/resourceGroups/{resource_group}", self.base_url)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        trace!("{method} {url}");
        self.client
            .request(method, url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(header::ACCEPT, "application/json")
    }

    /// Sends a request and maps transport and status failures.
    async fn send(&self, builder: RequestBuilder, target: &str) -> Result<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::unavailable(format!("Request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map_or(DEFAULT_RETRY_AFTER_MS, |secs| secs.saturating_mul(1000));
            return Err(ProviderError::RateLimited { retry_after_ms }.into());
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, target, body))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, target: &str) -> Result<T> {
        let response = self.send(self.request(Method::GET, url), target).await?;
        parse_json(response).await
    }
}

/// Maps a non-success, non-429 status to a provider error.
fn map_status(status: StatusCode, target: &str, body: String) -> FuncsyncError {
    let err = match status.as_u16() {
        404 => ProviderError::not_found(target),
        401 | 403 => ProviderError::unavailable(format!("authentication failed ({status})")),
        code if status.is_server_error() => {
            ProviderError::unavailable(format!("server error {code}: {body}"))
        }
        code => ProviderError::rejected(code, body),
    };
    err.into()
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    response.json::<T>().await.map_err(|e| {
        ProviderError::InvalidResponse {
            message: format!("Failed to parse response: {e}"),
        }
        .into()
    })
}

#[async_trait]
impl CloudProvider for HttpProvider {
    async fn list_plans(&self, resource_group: &str) -> Result<Vec<PlanResource>> {
        let url = format!("{}/plans", self.group_url(resource_group));
        self.get_json(&url, resource_group).await
    }

    async fn list_apps(&self, resource_group: &str) -> Result<Vec<AppResource>> {
        let url = format!("{}/apps", self.group_url(resource_group));
        self.get_json(&url, resource_group).await
    }

    async fn get_app_settings(&self, app: &ResourceId) -> Result<BTreeMap<String, String>> {
        let url = format!("{}/apps/{}/settings", self.group_url(&app.resource_group), app.name);
        self.get_json(&url, &app.to_string()).await
    }

    async fn get_policy(&self, resource_group: &str, api: &str) -> Result<Option<PolicyDocument>> {
        let url = format!("{}/apis/{api}/policy", self.group_url(resource_group));
        match self.get_json(&url, api).await {
            Ok(policy) => Ok(Some(policy)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put_plan(&self, plan: &PlanSpec) -> Result<PlanResource> {
        let url = format!("{}/plans/{}", self.group_url(&plan.resource_group), plan.name);
        debug!("PUT plan {}", plan.id());
        let response = self
            .send(self.request(Method::PUT, &url).json(plan), &plan.id().to_string())
            .await?;
        parse_json(response).await
    }

    async fn put_app(&self, app: &AppSpec) -> Result<AppResource> {
        let url = format!("{}/apps/{}", self.group_url(&app.resource_group), app.name);
        debug!("PUT app {}", app.id());
        let response = self
            .send(self.request(Method::PUT, &url).json(app), &app.id().to_string())
            .await?;
        parse_json(response).await
    }

    async fn apply_settings(&self, app: &ResourceId, settings: &ResolvedSettings) -> Result<()> {
        let url = format!("{}/apps/{}/settings", self.group_url(&app.resource_group), app.name);
        let body: serde_json::Map<String, serde_json::Value> = settings
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        debug!("PATCH {} settings of {app}", body.len());
        self.send(self.request(Method::PATCH, &url).json(&body), &app.to_string())
            .await?;
        Ok(())
    }

    async fn put_policy(&self, resource_group: &str, policy: &PolicyDocument) -> Result<()> {
        let url = format!("{}/apis/{}/policy", self.group_url(resource_group), policy.api);
        let body = policy
            .to_canonical_json()
            .map_err(|e| FuncsyncError::internal(format!("Failed to encode policy: {e}")))?;
        debug!("PUT policy of {} ({} routes)", policy.api, policy.routes.len());
        self.send(
            self.request(Method::PUT, &url)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body),
            &policy.api,
        )
        .await?;
        Ok(())
    }

    async fn delete_app(&self, app: &ResourceId) -> Result<()> {
        let url = format!("{}/apps/{}", self.group_url(&app.resource_group), app.name);
        match self.send(self.request(Method::DELETE, &url), &app.to_string()).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_plan(&self, plan: &ResourceId) -> Result<()> {
        let url = format!("{}/plans/{}", self.group_url(&plan.resource_group), plan.name);
        match self.send(self.request(Method::DELETE, &url), &plan.to_string()).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn provider_type(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpMethod;
    use crate::gateway::PolicyRoute;
    use wiremock::matchers::{body_json, header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_list_plans() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resourceGroups/rg-search/plans"))
            .and(header_matcher("authorization", "Bearer t0ken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "resourceGroup": "rg-search", "name": "search-plan", "sku": "Y1", "os": "linux" }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), "t0ken").unwrap();
        let plans = provider.list_plans("rg-search").await.unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].sku, "Y1");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resourceGroups/rg-missing/plans"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resourceGroups/rg-busy/plans"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resourceGroups/rg-down/plans"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resourceGroups/rg-bad/plans"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad sku"))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), "t").unwrap();

        assert!(provider.list_plans("rg-missing").await.unwrap_err().is_not_found());

        let busy = provider.list_plans("rg-busy").await.unwrap_err();
        assert_eq!(busy.retry_delay_ms(), Some(2000));

        assert!(provider.list_plans("rg-down").await.unwrap_err().is_retryable());

        let bad = provider.list_plans("rg-bad").await.unwrap_err();
        assert!(matches!(
            bad,
            FuncsyncError::Provider(ProviderError::Rejected { status: 400, ref message })
                if message == "bad sku"
        ));
    }

    #[tokio::test]
    async fn test_missing_policy_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resourceGroups/rg-search/apis/search-api/policy"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), "t").unwrap();
        assert!(provider.get_policy("rg-search", "search-api").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_policy_sends_canonical_document() {
        let server = MockServer::start().await;
        let policy = PolicyDocument {
            api: String::from("search-api"),
            routes: vec![PolicyRoute {
                path: String::from("/search"),
                method: HttpMethod::Post,
                backend_url: String::from("https://html-search.azurewebsites.net/api/search"),
                content_type: String::from("application/json"),
                headers: BTreeMap::new(),
            }],
        };
        Mock::given(method("PUT"))
            .and(path("/resourceGroups/rg-search/apis/search-api/policy"))
            .and(body_json(&policy))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&format!("{}/", server.uri()), "t").unwrap();
        provider.put_policy("rg-search", &policy).await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_settings_patches_values() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/resourceGroups/rg-search/apps/html-search/settings"))
            .and(body_json(serde_json::json!({ "SEARCH_INDEX_NAME": "html-dev" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), "t").unwrap();
        let mut settings = ResolvedSettings::new();
        settings.insert("SEARCH_INDEX_NAME", "html-dev");
        provider
            .apply_settings(&ResourceId::new("rg-search", "html-search"), &settings)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_app_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/resourceGroups/rg-search/apps/old-app"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), "t").unwrap();
        provider
            .delete_app(&ResourceId::new("rg-search", "old-app"))
            .await
            .unwrap();
    }
}
