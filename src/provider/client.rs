//! Cloud provider client trait.
//!
//! This module defines the control-plane interface the reconciler drives.
//! Every call is a single request; retries are layered on top by callers.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::config::ResourceId;
use crate::error::Result;
use crate::gateway::PolicyDocument;
use crate::settings::ResolvedSettings;

use super::types::{AppResource, AppSpec, PlanResource, PlanSpec};

/// Control-plane operations.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Lists the hosting plans in a resource group.
    ///
    /// A missing resource group is reported as `ProviderError::NotFound`.
    async fn list_plans(&self, resource_group: &str) -> Result<Vec<PlanResource>>;

    /// Lists the function apps in a resource group.
    async fn list_apps(&self, resource_group: &str) -> Result<Vec<AppResource>>;

    /// Reads an app's current settings.
    async fn get_app_settings(&self, app: &ResourceId) -> Result<BTreeMap<String, String>>;

    /// Reads the policy document of a gateway API, if one exists.
    async fn get_policy(&self, resource_group: &str, api: &str) -> Result<Option<PolicyDocument>>;

    /// Creates a plan or updates it in place.
    async fn put_plan(&self, plan: &PlanSpec) -> Result<PlanResource>;

    /// Creates an app or updates it in place.
    async fn put_app(&self, app: &AppSpec) -> Result<AppResource>;

    /// Merges the given settings into the app's settings in one call.
    async fn apply_settings(&self, app: &ResourceId, settings: &ResolvedSettings) -> Result<()>;

    /// Replaces the policy document of a gateway API.
    async fn put_policy(&self, resource_group: &str, policy: &PolicyDocument) -> Result<()>;

    /// Deletes an app.
    async fn delete_app(&self, app: &ResourceId) -> Result<()>;

    /// Deletes a plan.
    async fn delete_plan(&self, plan: &ResourceId) -> Result<()>;

    /// Gets the provider type name.
    fn provider_type(&self) -> &'static str;
}
