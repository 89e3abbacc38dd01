//! Desired-state validation.
//!
//! Field-level rules are declared on the document types with `validator`;
//! this module flattens them and adds the cross-entity checks (identities,
//! references, runtime profile requirements).

use crate::error::{ConfigError, FuncsyncError, Result};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use super::spec::{DesiredState, FunctionApp, JournalBackend, ResourceId, SettingValue};

/// Validator for desired-state documents.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

/// Setting key fragments that suggest a credential.
const SECRET_HINTS: &[&str] = &["KEY", "SECRET", "PASSWORD", "TOKEN"];

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a document and raises the first error.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for the first problem found.
    pub fn validate(&self, state: &DesiredState) -> Result<ValidationResult> {
        let result = self.check(state);

        if let Some(first_error) = result.errors.first() {
            Err(FuncsyncError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        } else {
            debug!("Desired-state validation passed");
            Ok(result)
        }
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, state: &DesiredState) -> ValidationResult {
        let mut result = ValidationResult::default();

        if let Err(errors) = state.validate() {
            flatten_errors("", &errors, &mut result.errors);
        }

        Self::validate_journal(state, &mut result);
        Self::validate_plans(state, &mut result);
        Self::validate_apps(state, &mut result);
        Self::validate_routes(state, &mut result);

        result
    }

    fn validate_journal(state: &DesiredState, result: &mut ValidationResult) {
        if state.journal.backend == JournalBackend::S3
            && state.journal.bucket.as_ref().is_none_or(String::is_empty)
        {
            result.errors.push(ValidationError {
                field: String::from("journal.bucket"),
                message: String::from("S3 bucket name is required when using S3 backend"),
            });
        }
    }

    fn validate_plans(state: &DesiredState, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        let referenced: HashSet<_> = state.apps.iter().map(|a| state.app_plan_id(a)).collect();

        for (i, plan) in state.plans.iter().enumerate() {
            let prefix = format!("plans[{i}]");

            if !plan.name.is_empty() && !is_valid_name(&plan.name) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!(
                        "Plan name '{}' is invalid. Must be alphanumeric with hyphens.",
                        plan.name
                    ),
                });
            }

            let id = state.plan_id(plan);
            if !seen.insert(identity_key(&id)) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!("Duplicate plan identity: {id}"),
                });
            }

            if !referenced.contains(&id) {
                result
                    .warnings
                    .push(format!("{prefix}: plan '{id}' is not used by any app"));
            }
        }
    }

    fn validate_apps(state: &DesiredState, result: &mut ValidationResult) {
        if state.apps.is_empty() {
            result
                .warnings
                .push(String::from("No function apps defined in desired state"));
            return;
        }

        let declared_plans: HashSet<_> = state.plans.iter().map(|p| state.plan_id(p)).collect();
        let mut seen = HashSet::new();

        for (i, app) in state.apps.iter().enumerate() {
            let prefix = format!("apps[{i}]");

            if !app.name.is_empty() && !is_valid_name(&app.name) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!(
                        "App name '{}' is invalid. Must be alphanumeric with hyphens.",
                        app.name
                    ),
                });
            }

            let id = state.app_id(app);
            if !seen.insert(identity_key(&id)) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!("Duplicate app identity: {id}"),
                });
            }

            let plan_id = state.app_plan_id(app);
            if !app.plan.is_empty() && !declared_plans.contains(&plan_id) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.plan"),
                    message: format!("App '{}' references undeclared plan '{plan_id}'", app.name),
                });
            }

            if !is_valid_storage_account(&app.storage_account) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.storage_account"),
                    message: format!(
                        "Storage account '{}' must be 3-24 lowercase letters or digits",
                        app.storage_account
                    ),
                });
            }

            if app.artifact.sha256.len() == 64
                && !app.artifact.sha256.chars().all(|c| c.is_ascii_hexdigit())
            {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.artifact.sha256"),
                    message: String::from("Artifact sha256 must be hex encoded"),
                });
            }

            if !app.artifact.location.starts_with("https://") {
                result.warnings.push(format!(
                    "{prefix}.artifact.location: '{}' is not an https URL",
                    app.artifact.location
                ));
            }

            Self::validate_settings(app, &prefix, result);
        }
    }

    fn validate_settings(app: &FunctionApp, prefix: &str, result: &mut ValidationResult) {
        for required in app.profile.required_settings() {
            if !app.settings.contains_key(*required) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.settings.{required}"),
                    message: format!(
                        "Setting '{required}' is required by the '{}' profile",
                        app.profile
                    ),
                });
            }
        }

        for (key, value) in &app.settings {
            let field = format!("{prefix}.settings.{key}");

            if key.is_empty() {
                result.errors.push(ValidationError {
                    field,
                    message: String::from("Setting key cannot be empty"),
                });
                continue;
            }

            match value {
                SettingValue::Secret(reference) if reference.secret.trim().is_empty() => {
                    result.errors.push(ValidationError {
                        field,
                        message: String::from("Secret reference cannot be empty"),
                    });
                }
                SettingValue::Literal(literal) => {
                    if literal.is_empty() && app.profile.required_settings().contains(&key.as_str())
                    {
                        result.errors.push(ValidationError {
                            field,
                            message: format!("Required setting '{key}' cannot be empty"),
                        });
                    } else if looks_like_secret(key) && !literal.is_empty() {
                        result.warnings.push(format!(
                            "{field}: literal value for a credential-like key; consider a secret reference"
                        ));
                    }
                }
                SettingValue::Secret(_) => {}
            }
        }
    }

    fn validate_routes(state: &DesiredState, result: &mut ValidationResult) {
        let mut seen = HashSet::new();

        for (i, route) in state.routes.iter().enumerate() {
            let prefix = format!("routes[{i}]");

            if !route.path.is_empty() && !route.path.starts_with('/') {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.path"),
                    message: format!("Route path must start with '/': {}", route.path),
                });
            }

            if !seen.insert((route.path.as_str(), route.method)) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.path"),
                    message: format!("Duplicate route: {} {}", route.method, route.path),
                });
            }

            if route.backend.is_empty() {
                continue;
            }
            match state.apps_named(&route.backend).len() {
                0 => result.errors.push(ValidationError {
                    field: format!("{prefix}.backend"),
                    message: format!("Route references undeclared app '{}'", route.backend),
                }),
                1 => {}
                _ => result.errors.push(ValidationError {
                    field: format!("{prefix}.backend"),
                    message: format!(
                        "Route backend '{}' matches apps in several resource groups",
                        route.backend
                    ),
                }),
            }
        }
    }
}

/// Flattens nested `validator` errors into dotted field paths, sorted.
fn flatten_errors(prefix: &str, errors: &ValidationErrors, out: &mut Vec<ValidationError>) {
    let sorted: BTreeMap<String, &ValidationErrorsKind> = errors
        .errors()
        .iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

    for (key, kind) in sorted {
        let path = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}.{key}")
        };
        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                for err in field_errors {
                    let message = err
                        .message
                        .as_ref()
                        .map_or_else(|| format!("failed '{}' check", err.code), ToString::to_string);
                    out.push(ValidationError {
                        field: path.clone(),
                        message,
                    });
                }
            }
            ValidationErrorsKind::Struct(inner) => flatten_errors(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    flatten_errors(&format!("{path}[{index}]"), inner, out);
                }
            }
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names are ASCII alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

/// Provider names ignore case, so `P1` and `p1` are the same resource.
fn identity_key(id: &ResourceId) -> (String, String) {
    (
        id.resource_group.to_ascii_lowercase(),
        id.name.to_ascii_lowercase(),
    )
}

fn is_valid_storage_account(name: &str) -> bool {
    (3..=24).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

fn looks_like_secret(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    SECRET_HINTS.iter().any(|hint| upper.contains(hint))
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
