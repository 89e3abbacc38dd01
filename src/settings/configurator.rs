//! Settings configurator.
//!
//! Resolves an app's settings through the credential store and writes them
//! to the provider in a single merge call. Resolved values only ever live in
//! [`ResolvedSettings`], whose `Debug` output lists keys alone.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{ConfigHasher, FunctionApp, ResourceId, SECRET_DIGEST_KEY, SettingValue};
use crate::error::{Result, SecretError};
use crate::provider::{Attempted, CloudProvider, RetryPolicy};

use super::credentials::CredentialStore;

/// Fully resolved settings for one app.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ResolvedSettings {
    values: BTreeMap<String, String>,
}

/// Applies app settings.
pub struct SettingsConfigurator {
    credentials: Arc<dyn CredentialStore>,
    hasher: ConfigHasher,
}

impl ResolvedSettings {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    /// Adds or replaces a value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Gets a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Iterates over key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of settings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true when there are no settings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for ResolvedSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSettings")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SettingsConfigurator {
    /// Creates a configurator over a credential store.
    #[must_use]
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            credentials,
            hasher: ConfigHasher::new(),
        }
    }

    /// Resolves every setting of an app and attaches the digest marker.
    ///
    /// # Errors
    ///
    /// Returns `SecretError::Resolution` for the first reference that cannot
    /// be resolved, or for a required key that resolved empty.
    pub async fn resolve(&self, app: &FunctionApp) -> Result<ResolvedSettings> {
        let mut resolved = ResolvedSettings::new();

        for (key, value) in &app.settings {
            let value = match value {
                SettingValue::Literal(literal) => literal.clone(),
                SettingValue::Secret(reference) => {
                    self.credentials.resolve(&reference.secret).await?
                }
            };
            resolved.insert(key.clone(), value);
        }

        for required in app.profile.required_settings() {
            if resolved.get(required).is_none_or(str::is_empty) {
                return Err(SecretError::resolution(
                    *required,
                    format!("required by the '{}' profile but empty", app.profile),
                )
                .into());
            }
        }

        if let Some(digest) = self.hasher.secret_digest(app) {
            resolved.insert(SECRET_DIGEST_KEY, digest);
        }

        debug!(
            "Resolved {} settings for {} via {} store",
            resolved.len(),
            app.name,
            self.credentials.store_type()
        );
        Ok(resolved)
    }

    /// Resolves and applies an app's settings in one provider call.
    ///
    /// Resolution failures are not retried; the provider call is.
    pub async fn apply(
        &self,
        provider: &dyn CloudProvider,
        retry: &RetryPolicy,
        id: &ResourceId,
        app: &FunctionApp,
        deadline: Option<Instant>,
    ) -> Attempted<()> {
        let resolved = match self.resolve(app).await {
            Ok(resolved) => resolved,
            Err(e) => {
                return Attempted {
                    result: Err(e),
                    attempts: 0,
                };
            }
        };

        info!("Applying {} settings to {id}", resolved.len());
        let resolved = &resolved;
        retry
            .run(&format!("apply settings {id}"), deadline, move || {
                provider.apply_settings(id, resolved)
            })
            .await
    }
}

impl std::fmt::Debug for SettingsConfigurator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsConfigurator")
            .field("store", &self.credentials.store_type())
            .finish()
    }
}
