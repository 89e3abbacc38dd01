//! Control-plane resource types.
//!
//! These are the provider's view of plans and apps, both as read back from
//! the control plane and as sent to it.

use serde::{Deserialize, Serialize};

use crate::config::{
    DesiredState, FunctionApp, HostingPlan, OsType, ResourceId, RuntimeDescriptor, RuntimeProfile,
};

/// A hosting plan as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResource {
    /// Resource group.
    pub resource_group: String,
    /// Plan name.
    pub name: String,
    /// Compute tier.
    pub sku: String,
    /// Operating system.
    #[serde(default)]
    pub os: OsType,
}

/// A function app as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppResource {
    /// Resource group.
    pub resource_group: String,
    /// App name.
    pub name: String,
    /// Region.
    pub region: String,
    /// Hosting plan name, in the same resource group.
    pub plan: String,
    /// Language runtime.
    pub runtime: RuntimeDescriptor,
    /// Runtime profile tag.
    #[serde(default)]
    pub profile: RuntimeProfile,
    /// Bound storage account.
    pub storage_account: String,
    /// Checksum of the deployed package.
    #[serde(default)]
    pub artifact_sha256: String,
    /// Current state.
    #[serde(default)]
    pub state: AppState,
    /// Public hostname, once assigned.
    #[serde(default)]
    pub default_hostname: Option<String>,
}

/// Runtime state of a function app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppState {
    /// Serving requests.
    #[default]
    Running,
    /// Stopped by an operator.
    Stopped,
    /// Provisioning or startup failed.
    Failed,
}

/// Request body for creating or updating a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSpec {
    /// Resource group.
    pub resource_group: String,
    /// Plan name.
    pub name: String,
    /// Compute tier.
    pub sku: String,
    /// Operating system.
    pub os: OsType,
}

/// Request body for creating or updating an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    /// Resource group.
    pub resource_group: String,
    /// App name.
    pub name: String,
    /// Region.
    pub region: String,
    /// Hosting plan name, in the same resource group.
    pub plan: String,
    /// Language runtime.
    pub runtime: RuntimeDescriptor,
    /// Runtime profile tag.
    pub profile: RuntimeProfile,
    /// Bound storage account.
    pub storage_account: String,
    /// Where the package is fetched from.
    pub artifact_location: String,
    /// Checksum of the package.
    pub artifact_sha256: String,
}

impl PlanResource {
    /// Identity of this plan.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.resource_group, &self.name)
    }
}

impl AppResource {
    /// Identity of this app.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.resource_group, &self.name)
    }

    /// Identity of the plan this app runs on.
    #[must_use]
    pub fn plan_id(&self) -> ResourceId {
        ResourceId::new(&self.resource_group, &self.plan)
    }
}

impl PlanSpec {
    /// Builds the request for a declared plan.
    #[must_use]
    pub fn from_desired(state: &DesiredState, plan: &HostingPlan) -> Self {
        let id = state.plan_id(plan);
        Self {
            resource_group: id.resource_group,
            name: id.name,
            sku: plan.sku.clone(),
            os: plan.os,
        }
    }

    /// Identity of this plan.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.resource_group, &self.name)
    }
}

impl AppSpec {
    /// Builds the request for a declared app.
    #[must_use]
    pub fn from_desired(state: &DesiredState, app: &FunctionApp) -> Self {
        let id = state.app_id(app);
        Self {
            resource_group: id.resource_group,
            name: id.name,
            region: state.app_region(app).to_string(),
            plan: app.plan.clone(),
            runtime: app.runtime.clone(),
            profile: app.profile,
            storage_account: app.storage_account.clone(),
            artifact_location: app.artifact.location.clone(),
            artifact_sha256: app.artifact.sha256.clone(),
        }
    }

    /// Identity of this app.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.resource_group, &self.name)
    }
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
