//! Desired-state document types.
//!
//! This module defines the structs that map to the `funcsync.yaml` document.
//! Every struct rejects unknown fields so a typo never silently turns into
//! a missing setting.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use validator::Validate;

/// Schema version understood by this build.
pub const SUPPORTED_VERSION: u32 = 1;

/// The root of a desired-state document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct DesiredState {
    /// Schema version.
    pub version: u32,
    /// Default resource group for every entity.
    #[validate(length(min = 1, message = "resource group cannot be empty"))]
    pub resource_group: String,
    /// Default region for every function app.
    #[validate(length(min = 1, message = "region cannot be empty"))]
    pub region: String,
    /// Hosting plans.
    #[serde(default)]
    #[validate(nested)]
    pub plans: Vec<HostingPlan>,
    /// Function apps.
    #[serde(default)]
    #[validate(nested)]
    pub apps: Vec<FunctionApp>,
    /// Public API routes.
    #[serde(default)]
    #[validate(nested)]
    pub routes: Vec<RouteBinding>,
    /// Gateway the routes are published on.
    #[serde(default)]
    #[validate(nested)]
    pub gateway: GatewayConfig,
    /// Run journal configuration.
    #[serde(default)]
    pub journal: JournalConfig,
}

/// Identity of a provider-side resource: resource group plus name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    /// Resource group.
    pub resource_group: String,
    /// Resource name.
    pub name: String,
}

/// A compute plan shared by function apps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct HostingPlan {
    /// Plan name.
    #[validate(length(min = 1, message = "plan name cannot be empty"))]
    pub name: String,
    /// Resource group override.
    #[serde(default)]
    pub resource_group: Option<String>,
    /// Compute tier.
    #[validate(length(min = 1, message = "plan sku cannot be empty"))]
    pub sku: String,
    /// Operating system.
    #[serde(default)]
    pub os: OsType,
}

/// Operating system of a hosting plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    /// Linux workers.
    #[default]
    Linux,
    /// Windows workers.
    Windows,
}

/// A function app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct FunctionApp {
    /// App name.
    #[validate(length(min = 1, message = "app name cannot be empty"))]
    pub name: String,
    /// Resource group override.
    #[serde(default)]
    pub resource_group: Option<String>,
    /// Region override.
    #[serde(default)]
    pub region: Option<String>,
    /// Name of the hosting plan, in the app's resource group.
    #[validate(length(min = 1, message = "plan reference cannot be empty"))]
    pub plan: String,
    /// Language runtime.
    #[validate(nested)]
    pub runtime: RuntimeDescriptor,
    /// Which settings the function code expects.
    #[serde(default)]
    pub profile: RuntimeProfile,
    /// Storage account bound to the app.
    #[validate(length(min = 1, message = "storage account cannot be empty"))]
    pub storage_account: String,
    /// Package produced by the build step.
    #[validate(nested)]
    pub artifact: Artifact,
    /// Application settings.
    #[serde(default)]
    pub settings: BTreeMap<String, SettingValue>,
}

/// Language runtime of an app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct RuntimeDescriptor {
    /// Language (e.g. "python").
    #[validate(length(min = 1, message = "runtime language cannot be empty"))]
    pub language: String,
    /// Language version (e.g. "3.11").
    #[validate(length(min = 1, message = "runtime version cannot be empty"))]
    pub version: String,
    /// Worker processes per instance.
    #[serde(default = "default_workers")]
    #[validate(range(min = 1, max = 64, message = "workers must be between 1 and 64"))]
    pub workers: u32,
}

/// Runtime profiles and the settings each one requires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeProfile {
    /// HTML content search.
    HtmlSearch,
    /// PDF content search.
    PdfSearch,
    /// Blob upload endpoint.
    BlobUpload,
    /// Blob-triggered indexer.
    BlobIndexer,
    /// No required settings.
    #[default]
    Custom,
}

/// Deployable package location and checksum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct Artifact {
    /// Where the package can be fetched from.
    #[validate(length(min = 1, message = "artifact location cannot be empty"))]
    pub location: String,
    /// Hex-encoded SHA-256 of the package.
    #[validate(length(equal = 64, message = "artifact sha256 must be 64 hex characters"))]
    pub sha256: String,
}

/// The value side of an app setting.
///
/// Any YAML scalar is a literal: `2` and `true` become `"2"` and `"true"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SettingValue {
    /// Literal value written in the document.
    Literal(#[serde(deserialize_with = "scalar_to_string")] String),
    /// Value held by the credential store.
    Secret(SecretRef),
}

/// Reference into the credential store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SecretRef {
    /// Reference understood by the credential store.
    pub secret: String,
}

/// A public API route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct RouteBinding {
    /// Public path, starting with '/'.
    #[validate(length(min = 1, message = "route path cannot be empty"))]
    pub path: String,
    /// HTTP method.
    #[serde(default)]
    pub method: HttpMethod,
    /// Name of the backend function app.
    #[validate(length(min = 1, message = "route backend cannot be empty"))]
    pub backend: String,
    /// Path on the backend; defaults to `api/<path>`.
    #[serde(default)]
    pub backend_path: Option<String>,
    /// Content type forwarded to the backend.
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Extra headers set on the backend request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// HTTP methods a route may bind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET.
    Get,
    /// POST.
    #[default]
    Post,
    /// PUT.
    Put,
    /// PATCH.
    Patch,
    /// DELETE.
    Delete,
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// API whose policy document is managed.
    #[validate(length(min = 1, message = "gateway api cannot be empty"))]
    pub api: String,
}

/// Run journal configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct JournalConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: JournalBackend,
    /// Local journal directory.
    #[serde(default)]
    pub path: Option<String>,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix.
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region.
    #[serde(default)]
    pub region: Option<String>,
}

/// Journal backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JournalBackend {
    /// Local file-based journal.
    #[default]
    Local,
    /// AWS S3-based journal.
    S3,
}

fn scalar_to_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        _ => Err(D::Error::custom("setting value must be a scalar or a secret reference")),
    }
}

const fn default_workers() -> u32 {
    1
}

fn default_content_type() -> String {
    String::from("application/json")
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api: String::from("search-api"),
        }
    }
}

impl ResourceId {
    /// Creates a resource identity.
    #[must_use]
    pub fn new(resource_group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_group: resource_group.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_group, self.name)
    }
}

impl DesiredState {
    /// Identity of a plan in this document.
    #[must_use]
    pub fn plan_id(&self, plan: &HostingPlan) -> ResourceId {
        ResourceId::new(
            plan.resource_group.as_deref().unwrap_or(&self.resource_group),
            &plan.name,
        )
    }

    /// Identity of an app in this document.
    #[must_use]
    pub fn app_id(&self, app: &FunctionApp) -> ResourceId {
        ResourceId::new(self.app_resource_group(app), &app.name)
    }

    /// Identity of the plan an app runs on.
    #[must_use]
    pub fn app_plan_id(&self, app: &FunctionApp) -> ResourceId {
        ResourceId::new(self.app_resource_group(app), &app.plan)
    }

    /// Region an app is placed in.
    #[must_use]
    pub fn app_region<'a>(&'a self, app: &'a FunctionApp) -> &'a str {
        app.region.as_deref().unwrap_or(&self.region)
    }

    fn app_resource_group<'a>(&'a self, app: &'a FunctionApp) -> &'a str {
        app.resource_group.as_deref().unwrap_or(&self.resource_group)
    }

    /// Every resource group the document touches, sorted.
    #[must_use]
    pub fn resource_groups(&self) -> BTreeSet<String> {
        let mut groups = BTreeSet::new();
        groups.insert(self.resource_group.clone());
        for plan in &self.plans {
            groups.insert(self.plan_id(plan).resource_group);
        }
        for app in &self.apps {
            groups.insert(self.app_id(app).resource_group);
        }
        groups
    }

    /// Finds the declared apps with the given name.
    #[must_use]
    pub fn apps_named(&self, name: &str) -> Vec<&FunctionApp> {
        self.apps.iter().filter(|a| a.name == name).collect()
    }

    /// Resolves a route's backend to an app identity.
    ///
    /// Returns `None` when no app, or more than one app, carries that name.
    #[must_use]
    pub fn route_backend(&self, route: &RouteBinding) -> Option<ResourceId> {
        match self.apps_named(&route.backend).as_slice() {
            [app] => Some(self.app_id(app)),
            _ => None,
        }
    }
}

impl FunctionApp {
    /// Returns setting keys whose values come from the credential store.
    #[must_use]
    pub fn secret_keys(&self) -> Vec<&str> {
        self.settings
            .iter()
            .filter(|(_, v)| matches!(v, SettingValue::Secret(_)))
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

impl RuntimeProfile {
    /// Settings the function code reads at startup.
    #[must_use]
    pub const fn required_settings(self) -> &'static [&'static str] {
        match self {
            Self::HtmlSearch => &[
                "SEARCH_SERVICE_ENDPOINT",
                "SEARCH_SERVICE_API_KEY",
                "SEARCH_INDEX_NAME",
            ],
            Self::PdfSearch => &["SEARCH_ENDPOINT", "SEARCH_KEY", "INDEX_NAMES"],
            Self::BlobUpload => &["AzureWebJobsStorage"],
            Self::BlobIndexer => &[
                "AzureWebJobsStorage",
                "AZURE_OPENAI_ENDPOINT",
                "AZURE_OPENAI_DEPLOYMENT",
                "AZURE_OPENAI_KEY",
                "AZURE_SEARCH_SERVICE_ENDPOINT",
                "AZURE_SEARCH_ADMIN_KEY",
                "AZURE_SEARCH_INDEX_NAME",
                "AZURE_STORAGE_ACCOUNT_NAME",
            ],
            Self::Custom => &[],
        }
    }
}

impl fmt::Display for RuntimeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::HtmlSearch => "html-search",
            Self::PdfSearch => "pdf-search",
            Self::BlobUpload => "blob-upload",
            Self::BlobIndexer => "blob-indexer",
            Self::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::Windows => write!(f, "windows"),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for RuntimeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (workers: {})", self.language, self.version, self.workers)
    }
}

impl RouteBinding {
    /// Path on the backend app, without a leading slash.
    #[must_use]
    pub fn effective_backend_path(&self) -> String {
        self.backend_path.as_ref().map_or_else(
            || format!("api/{}", self.path.trim_start_matches('/')),
            |p| p.trim_start_matches('/').to_string(),
        )
    }
}
