//! Diff engine for comparing desired vs observed state.
//!
//! This module turns a desired-state document and a provider snapshot into
//! a [`ReconciliationPlan`]. The engine is pure: the same inputs always give
//! the same plan, because every collection it walks is sorted.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::{
    ConfigHasher, DesiredState, FunctionApp, HostingPlan, HttpMethod, ResourceId,
    SECRET_DIGEST_KEY, SettingValue,
};
use crate::gateway::{PolicyDocument, PolicyRoute, RenderedPolicy, render_policy};
use crate::provider::{AppResource, AppState, ObservedState, PlanResource};

use super::plan::{
    FieldChange, OperationKind, OperationTarget, PlannedOperation, ReconciliationPlan, Stage,
};

/// Shown in place of observed setting values.
const MASKED: &str = "***";

/// Shown in place of secret values in plans.
const SECRET_PLACEHOLDER: &str = "<secret>";

/// Engine for computing plans from desired and observed state.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Document and digest hasher.
    hasher: ConfigHasher,
}

/// Accumulates operations and hands out their indices.
struct PlanBuilder {
    operations: Vec<PlannedOperation>,
}

impl PlanBuilder {
    const fn new() -> Self {
        Self {
            operations: Vec::new(),
        }
    }

    fn push(
        &mut self,
        target: OperationTarget,
        stage: Stage,
        depends_on: Vec<usize>,
        changes: Vec<FieldChange>,
        (kind, reason): (OperationKind, String),
    ) -> usize {
        let index = self.operations.len();
        debug!("Planned {kind}({target}): {reason}");
        self.operations.push(PlannedOperation {
            index,
            kind,
            target,
            stage,
            depends_on,
            reason,
            changes,
        });
        index
    }
}

/// Picks Update or Skip from a list of field changes.
fn update_or_skip(changes: &[FieldChange], what: &str) -> (OperationKind, String) {
    if changes.is_empty() {
        (OperationKind::Skip, String::from("up to date"))
    } else {
        let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
        (
            OperationKind::Update,
            format!("{what} differs: {}", fields.join(", ")),
        )
    }
}

fn compare(changes: &mut Vec<FieldChange>, field: &str, old: &str, new: &str) {
    if old != new {
        changes.push(FieldChange::new(
            field,
            Some(old.to_string()),
            Some(new.to_string()),
        ));
    }
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Computes the plan that drives `observed` to `desired`.
    ///
    /// Observed entities the document does not declare are only deleted
    /// when `prune` is set.
    #[must_use]
    pub fn diff(
        &self,
        desired: &DesiredState,
        observed: &ObservedState,
        prune: bool,
    ) -> ReconciliationPlan {
        let mut builder = PlanBuilder::new();

        let mut plans: Vec<(ResourceId, &HostingPlan)> = desired
            .plans
            .iter()
            .map(|p| (desired.plan_id(p), p))
            .collect();
        plans.sort_by(|a, b| a.0.cmp(&b.0));

        let mut apps: Vec<(ResourceId, &FunctionApp)> = desired
            .apps
            .iter()
            .map(|a| (desired.app_id(a), a))
            .collect();
        apps.sort_by(|a, b| a.0.cmp(&b.0));

        let mut plan_ops = BTreeMap::new();
        for (id, plan) in &plans {
            let decision = Self::diff_plan(plan, observed.plans.get(id));
            let index = builder.push(
                OperationTarget::Plan { id: id.clone() },
                Stage::Plans,
                Vec::new(),
                decision.1,
                decision.0,
            );
            plan_ops.insert(id.clone(), index);
        }

        let mut app_ops = BTreeMap::new();
        for (id, app) in &apps {
            let depends_on = plan_ops
                .get(&desired.app_plan_id(app))
                .map(|i| vec![*i])
                .unwrap_or_default();
            let decision = Self::diff_app(desired, app, observed.apps.get(id));
            let index = builder.push(
                OperationTarget::App { id: id.clone() },
                Stage::Apps,
                depends_on,
                decision.1,
                decision.0,
            );
            app_ops.insert(id.clone(), index);
        }

        let no_settings = BTreeMap::new();
        for (id, app) in &apps {
            let depends_on = app_ops.get(id).map(|i| vec![*i]).unwrap_or_default();
            let current = observed
                .apps
                .contains_key(id)
                .then(|| observed.settings.get(id).unwrap_or(&no_settings));
            let decision = self.diff_settings(app, current);
            builder.push(
                OperationTarget::Settings { id: id.clone() },
                Stage::Settings,
                depends_on,
                decision.1,
                decision.0,
            );
        }

        let routes_index = {
            let decision = Self::diff_routes(desired, observed, prune);
            builder.push(
                OperationTarget::Routes {
                    api: desired.gateway.api.clone(),
                },
                Stage::Routes,
                Vec::new(),
                decision.1,
                decision.0,
            )
        };

        let declared_apps: BTreeSet<&ResourceId> = apps.iter().map(|(id, _)| id).collect();
        let declared_plans: BTreeSet<&ResourceId> = plans.iter().map(|(id, _)| id).collect();

        let mut app_deletes: Vec<(ResourceId, usize)> = Vec::new();
        for (id, app) in &observed.apps {
            if declared_apps.contains(id) {
                continue;
            }
            if !prune {
                debug!("App {id} is not declared; leaving it untouched");
                continue;
            }
            let index = builder.push(
                OperationTarget::App { id: id.clone() },
                Stage::AppDeletes,
                vec![routes_index],
                vec![FieldChange::new("app", Some(id.to_string()), None)],
                (
                    OperationKind::Delete,
                    String::from("app removed from the document"),
                ),
            );
            app_deletes.push((app.plan_id(), index));
        }

        for id in observed.plans.keys() {
            if declared_plans.contains(id) {
                continue;
            }
            if !prune {
                debug!("Plan {id} is not declared; leaving it untouched");
                continue;
            }
            let mut depends_on: Vec<usize> = app_deletes
                .iter()
                .filter(|(plan, _)| plan == id)
                .map(|(_, index)| *index)
                .collect();
            // apps moving off this plan must be updated before it goes
            depends_on.extend(
                observed
                    .apps
                    .values()
                    .filter(|a| &a.plan_id() == id)
                    .filter_map(|a| app_ops.get(&a.id()).copied()),
            );
            depends_on.sort_unstable();
            depends_on.dedup();

            builder.push(
                OperationTarget::Plan { id: id.clone() },
                Stage::PlanDeletes,
                depends_on,
                vec![FieldChange::new("plan", Some(id.to_string()), None)],
                (
                    OperationKind::Delete,
                    String::from("plan removed from the document"),
                ),
            );
        }

        ReconciliationPlan {
            document_hash: self.hasher.hash_document(desired),
            prune,
            operations: builder.operations,
        }
    }

    fn diff_plan(
        desired: &HostingPlan,
        observed: Option<&PlanResource>,
    ) -> ((OperationKind, String), Vec<FieldChange>) {
        let Some(observed) = observed else {
            return (
                (OperationKind::Create, String::from("plan does not exist")),
                vec![
                    FieldChange::new("sku", None, Some(desired.sku.clone())),
                    FieldChange::new("os", None, Some(desired.os.to_string())),
                ],
            );
        };

        let mut changes = Vec::new();
        compare(&mut changes, "sku", &observed.sku, &desired.sku);
        compare(
            &mut changes,
            "os",
            &observed.os.to_string(),
            &desired.os.to_string(),
        );
        (update_or_skip(&changes, "plan"), changes)
    }

    fn diff_app(
        state: &DesiredState,
        desired: &FunctionApp,
        observed: Option<&AppResource>,
    ) -> ((OperationKind, String), Vec<FieldChange>) {
        let Some(observed) = observed else {
            return (
                (OperationKind::Create, String::from("app does not exist")),
                vec![
                    FieldChange::new("plan", None, Some(desired.plan.clone())),
                    FieldChange::new("runtime", None, Some(desired.runtime.to_string())),
                    FieldChange::new("artifact_sha256", None, Some(desired.artifact.sha256.clone())),
                ],
            );
        };

        let mut changes = Vec::new();
        compare(&mut changes, "plan", &observed.plan, &desired.plan);
        compare(&mut changes, "region", &observed.region, state.app_region(desired));
        compare(
            &mut changes,
            "runtime",
            &observed.runtime.to_string(),
            &desired.runtime.to_string(),
        );
        compare(
            &mut changes,
            "profile",
            &observed.profile.to_string(),
            &desired.profile.to_string(),
        );
        compare(
            &mut changes,
            "storage_account",
            &observed.storage_account,
            &desired.storage_account,
        );
        compare(
            &mut changes,
            "artifact_sha256",
            &observed.artifact_sha256,
            &desired.artifact.sha256,
        );
        if observed.state == AppState::Failed {
            changes.push(FieldChange::new(
                "state",
                Some(observed.state.to_string()),
                Some(AppState::Running.to_string()),
            ));
        }
        (update_or_skip(&changes, "app"), changes)
    }

    /// `current` is `None` when the app itself does not exist yet.
    fn diff_settings(
        &self,
        app: &FunctionApp,
        current: Option<&BTreeMap<String, String>>,
    ) -> ((OperationKind, String), Vec<FieldChange>) {
        let digest = self.hasher.secret_digest(app);

        if app.settings.is_empty() {
            return (
                (OperationKind::Skip, String::from("no settings declared")),
                Vec::new(),
            );
        }

        let Some(current) = current else {
            let mut changes: Vec<FieldChange> = app
                .settings
                .iter()
                .map(|(key, value)| FieldChange::new(key, None, Some(display_value(value))))
                .collect();
            if let Some(digest) = &digest {
                changes.push(FieldChange::new(
                    SECRET_DIGEST_KEY,
                    None,
                    Some(self.hasher.short_hash(digest)),
                ));
            }
            return (
                (
                    OperationKind::Update,
                    String::from("settings for a new app"),
                ),
                changes,
            );
        };

        let mut changes = Vec::new();
        for (key, value) in &app.settings {
            let observed = current.get(key);
            let differs = match value {
                SettingValue::Literal(literal) => observed != Some(literal),
                SettingValue::Secret(_) => observed.is_none(),
            };
            if differs {
                changes.push(FieldChange::new(
                    key,
                    observed.map(|_| String::from(MASKED)),
                    Some(display_value(value)),
                ));
            }
        }

        if let Some(digest) = &digest {
            let observed = current.get(SECRET_DIGEST_KEY);
            let matches = observed.is_some_and(|o| ConfigHasher::hashes_match(o, digest));
            if !matches {
                changes.push(FieldChange::new(
                    SECRET_DIGEST_KEY,
                    observed.map(|o| self.hasher.short_hash(o)),
                    Some(self.hasher.short_hash(digest)),
                ));
            }
        }

        (update_or_skip(&changes, "settings"), changes)
    }

    fn diff_routes(
        desired: &DesiredState,
        observed: &ObservedState,
        prune: bool,
    ) -> ((OperationKind, String), Vec<FieldChange>) {
        let hosts = observed_hosts(desired, observed);
        let RenderedPolicy { document, pending } = render_policy(
            &desired.gateway.api,
            &desired.routes,
            &hosts,
            observed.policy.as_ref(),
            prune,
        );

        let mut changes = route_changes(&document, observed.policy.as_ref());
        changes.extend(pending.iter().map(|p| {
            FieldChange::new(
                format!("{} {}", p.method, p.path),
                None,
                Some(format!("pending on {}", p.backend)),
            )
        }));

        let decision = if changes.is_empty() && document.matches_observed(observed.policy.as_ref())
        {
            (OperationKind::Skip, String::from("up to date"))
        } else if pending.is_empty() {
            (
                OperationKind::Update,
                format!("{} route(s) differ", changes.len()),
            )
        } else {
            (
                OperationKind::Update,
                format!("{} route(s) wait for their backend", pending.len()),
            )
        };
        (decision, changes)
    }
}

/// Hostnames of declared apps that are running now.
fn observed_hosts(desired: &DesiredState, observed: &ObservedState) -> BTreeMap<String, String> {
    desired
        .apps
        .iter()
        .filter_map(|app| {
            let id = desired.app_id(app);
            let resource = observed.apps.get(&id)?;
            if resource.state == AppState::Failed {
                return None;
            }
            let host = resource.default_hostname.clone()?;
            Some((app.name.clone(), host))
        })
        .collect()
}

fn index_routes(document: &PolicyDocument) -> BTreeMap<(&str, HttpMethod), &PolicyRoute> {
    document
        .routes
        .iter()
        .map(|r| ((r.path.as_str(), r.method), r))
        .collect()
}

fn route_changes(document: &PolicyDocument, observed: Option<&PolicyDocument>) -> Vec<FieldChange> {
    let new = index_routes(document);
    let old = observed.map(index_routes).unwrap_or_default();

    let mut changes = Vec::new();
    for (key, route) in &new {
        match old.get(key) {
            Some(current) if current == route => {}
            current => changes.push(FieldChange::new(
                format!("{} {}", key.1, key.0),
                current.map(|c| c.backend_url.clone()),
                Some(route.backend_url.clone()),
            )),
        }
    }
    for (key, route) in &old {
        if !new.contains_key(key) {
            changes.push(FieldChange::new(
                format!("{} {}", key.1, key.0),
                Some(route.backend_url.clone()),
                None,
            ));
        }
    }
    changes
}

fn display_value(value: &SettingValue) -> String {
    match value {
        SettingValue::Literal(literal) => literal.clone(),
        SettingValue::Secret(_) => String::from(SECRET_PLACEHOLDER),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Artifact, GatewayConfig, JournalConfig, OsType, RouteBinding,
        RuntimeDescriptor, RuntimeProfile, SecretRef,
    };
    use crate::provider::{AppSpec, PlanSpec};

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
                sha256: "a".repeat(64),
            },
            settings: BTreeMap::from([
                (
                    String::from("SEARCH_INDEX_NAME"),
                    SettingValue::Literal(String::from("html-dev")),
                ),
                (
                    String::from("SEARCH_SERVICE_API_KEY"),
                    SettingValue::Secret(SecretRef {
                        secret: String::from("SEARCH_ADMIN_KEY"),
                    }),
                ),
            ]),
        }
    }

    fn desired() -> DesiredState {
        DesiredState {
            version: 1,
            resource_group: String::from("rg"),
            region: String::from("eastus"),
            plans: vec![HostingPlan {
                name: String::from("P1"),
                resource_group: None,
                sku: String::from("Y1"),
                os: OsType::Linux,
            }],
            apps: vec![app("A1", "P1")],
            routes: vec![RouteBinding {
                path: String::from("/search"),
                method: HttpMethod::Post,
                backend: String::from("A1"),
                backend_path: None,
                content_type: String::from("application/json"),
                headers: BTreeMap::new(),
            }],
            gateway: GatewayConfig::default(),
            journal: JournalConfig::default(),
        }
    }

    /// The snapshot a provider would return after applying `state`.
    fn converged(state: &DesiredState) -> ObservedState {
        let hasher = ConfigHasher::new();
        let mut observed = ObservedState::default();
        for plan in &state.plans {
            let spec = PlanSpec::from_desired(state, plan);
            observed.plans.insert(
                spec.id(),
                PlanResource {
                    resource_group: spec.resource_group,
                    name: spec.name,
                    sku: spec.sku,
                    os: spec.os,
                },
            );
        }
        let mut hosts = BTreeMap::new();
        for app in &state.apps {
            let spec = AppSpec::from_desired(state, app);
            let id = spec.id();
            let host = format!("{}.azurewebsites.net", spec.name);
            hosts.insert(app.name.clone(), host.clone());
            let mut settings: BTreeMap<String, String> = app
                .settings
                .iter()
                .map(|(k, v)| match v {
                    SettingValue::Literal(l) => (k.clone(), l.clone()),
                    SettingValue::Secret(_) => (k.clone(), String::from("resolved")),
                })
                .collect();
            if let Some(digest) = hasher.secret_digest(app) {
                settings.insert(SECRET_DIGEST_KEY.to_string(), digest);
            }
            observed.settings.insert(id.clone(), settings);
            observed.apps.insert(
                id,
                AppResource {
                    resource_group: spec.resource_group,
                    name: spec.name,
                    region: spec.region,
                    plan: spec.plan,
                    runtime: spec.runtime,
                    profile: spec.profile,
                    storage_account: spec.storage_account,
                    artifact_sha256: spec.artifact_sha256,
                    state: AppState::Running,
                    default_hostname: Some(host),
                },
            );
        }
        observed.policy = Some(
            render_policy(&state.gateway.api, &state.routes, &hosts, None, true).document,
        );
        observed
    }

    #[test]
    fn test_empty_observed_plans_full_chain() {
        let plan = DiffEngine::new().diff(&desired(), &ObservedState::default(), false);
        assert_eq!(
            plan.labels(),
            vec![
                "Create(rg/P1)",
                "Create(rg/A1)",
                "Update(rg/A1.settings)",
                "Update(routes)"
            ]
        );
        assert_eq!(plan.operations[1].depends_on, vec![0]);
        assert_eq!(plan.operations[2].depends_on, vec![1]);
        assert!(plan.operations[3].depends_on.is_empty());
    }

    #[test]
    fn test_converged_is_all_skip() {
        let state = desired();
        let plan = DiffEngine::new().diff(&state, &converged(&state), false);
        assert!(plan.is_noop(), "{:?}", plan.labels());
    }

    #[test]
    fn test_diff_is_deterministic() {
        let state = desired();
        let engine = DiffEngine::new();
        let a = engine.diff(&state, &ObservedState::default(), false);
        let b = engine.diff(&state, &ObservedState::default(), false);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_field_changes_detected() {
        let state = desired();
        let mut observed = converged(&state);
        let id = ResourceId::new("rg", "A1");
        if let Some(a) = observed.apps.get_mut(&id) {
            a.artifact_sha256 = "b".repeat(64);
        }
        if let Some(s) = observed.settings.get_mut(&id) {
            s.insert(String::from("SEARCH_INDEX_NAME"), String::from("html-old"));
            s.insert(String::from("UNMANAGED"), String::from("kept"));
        }

        let plan = DiffEngine::new().diff(&state, &observed, false);
        let app_op = plan.find(&OperationTarget::App { id: id.clone() }).unwrap();
        assert_eq!(app_op.kind, OperationKind::Update);
        assert_eq!(app_op.changes[0].field, "artifact_sha256");

        let settings_op = plan.find(&OperationTarget::Settings { id }).unwrap();
        assert_eq!(settings_op.kind, OperationKind::Update);
        assert_eq!(settings_op.changes.len(), 1);
        assert_eq!(settings_op.changes[0].old.as_deref(), Some(MASKED));
    }

    #[test]
    fn test_changed_secret_reference_updates_digest() {
        let mut state = desired();
        let observed = converged(&state);
        state.apps[0].settings.insert(
            String::from("SEARCH_SERVICE_API_KEY"),
            SettingValue::Secret(SecretRef {
                secret: String::from("SEARCH_ADMIN_KEY_V2"),
            }),
        );

        let plan = DiffEngine::new().diff(&state, &observed, false);
        let op = plan
            .find(&OperationTarget::Settings {
                id: ResourceId::new("rg", "A1"),
            })
            .unwrap();
        assert_eq!(op.kind, OperationKind::Update);
        assert_eq!(op.changes[0].field, SECRET_DIGEST_KEY);
    }

    #[test]
    fn test_failed_app_is_updated() {
        let state = desired();
        let mut observed = converged(&state);
        if let Some(a) = observed.apps.get_mut(&ResourceId::new("rg", "A1")) {
            a.state = AppState::Failed;
        }
        let plan = DiffEngine::new().diff(&state, &observed, false);
        assert_eq!(plan.operations[1].kind, OperationKind::Update);
        // a failed backend is not routable
        assert_eq!(plan.operations[3].kind, OperationKind::Update);
    }

    #[test]
    fn test_no_deletes_without_prune() {
        let state = desired();
        let mut observed = converged(&state);
        observed.plans.insert(
            ResourceId::new("rg", "P-old"),
            PlanResource {
                resource_group: String::from("rg"),
                name: String::from("P-old"),
                sku: String::from("EP1"),
                os: OsType::Linux,
            },
        );

        let plan = DiffEngine::new().diff(&state, &observed, false);
        assert!(plan.operations.iter().all(|op| op.kind != OperationKind::Delete));
        assert!(plan.is_noop());
    }

    #[test]
    fn test_prune_orders_deletes() {
        let state = desired();
        let mut observed = converged(&state);
        observed.plans.insert(
            ResourceId::new("rg", "P-old"),
            PlanResource {
                resource_group: String::from("rg"),
                name: String::from("P-old"),
                sku: String::from("EP1"),
                os: OsType::Linux,
            },
        );
        let mut legacy = observed.apps[&ResourceId::new("rg", "A1")].clone();
        legacy.name = String::from("A-old");
        legacy.plan = String::from("P-old");
        observed.apps.insert(legacy.id(), legacy);

        let plan = DiffEngine::new().diff(&state, &observed, true);
        let labels = plan.labels();
        assert_eq!(labels[labels.len() - 2], "Delete(rg/A-old)");
        assert_eq!(labels[labels.len() - 1], "Delete(rg/P-old)");

        let routes = plan.operations_in(Stage::Routes).next().unwrap().index;
        let app_delete = &plan.operations[plan.operations.len() - 2];
        let plan_delete = &plan.operations[plan.operations.len() - 1];
        assert_eq!(app_delete.depends_on, vec![routes]);
        assert_eq!(plan_delete.depends_on, vec![app_delete.index]);
    }

    #[test]
    fn test_app_on_missing_backend_host_is_pending() {
        let state = desired();
        let mut observed = converged(&state);
        if let Some(a) = observed.apps.get_mut(&ResourceId::new("rg", "A1")) {
            a.default_hostname = None;
        }
        let plan = DiffEngine::new().diff(&state, &observed, false);
        let routes = &plan.operations[3];
        assert_eq!(routes.kind, OperationKind::Update);
        assert!(routes.reason.contains("wait for their backend"));
    }
}
