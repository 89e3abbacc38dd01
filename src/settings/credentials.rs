//! Credential stores that resolve secret references.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::error::{FuncsyncError, Result, SecretError};

/// Resolves secret references to values.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Resolves one reference.
    ///
    /// Fails with `SecretError::Resolution` when the reference is unknown
    /// or resolves to an empty value.
    async fn resolve(&self, reference: &str) -> Result<String>;

    /// Gets the store type name.
    fn store_type(&self) -> &'static str;
}

/// Resolves references from process environment variables.
///
/// A `.env` file loaded at startup with `dotenvy` feeds this store.
#[derive(Debug, Default, Clone)]
pub struct EnvCredentialStore {
    /// Prefix prepended to every reference.
    prefix: Option<String>,
}

/// Resolves references from a fixed map.
#[derive(Default, Clone)]
pub struct StaticCredentialStore {
    values: BTreeMap<String, String>,
}

impl EnvCredentialStore {
    /// Creates a store reading variables named exactly like the reference.
    #[must_use]
    pub const fn new() -> Self {
        Self { prefix: None }
    }

    /// Creates a store reading `<prefix><reference>`.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn variable_name(&self, reference: &str) -> String {
        self.prefix
            .as_ref()
            .map_or_else(|| reference.to_string(), |p| format!("{p}{reference}"))
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn resolve(&self, reference: &str) -> Result<String> {
        let name = self.variable_name(reference);
        debug!("Resolving secret reference '{reference}' from environment");

        match std::env::var(&name) {
            Ok(value) if !value.is_empty() => Ok(value),
            Ok(_) => Err(SecretError::resolution(reference, format!("{name} is empty")).into()),
            Err(_) => Err(SecretError::resolution(reference, format!("{name} is not set")).into()),
        }
    }

    fn store_type(&self) -> &'static str {
        "env"
    }
}

impl StaticCredentialStore {
    /// Creates a store over the given values.
    #[must_use]
    pub const fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    /// Adds or replaces a value.
    #[must_use]
    pub fn with(mut self, reference: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(reference.into(), value.into());
        self
    }

    /// Loads a flat YAML map of reference to value.
    ///
    /// # Errors
    ///
    /// Returns `SecretError::FileLoad` if the file cannot be read or parsed.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let load_error = |message: String| {
            FuncsyncError::Secret(SecretError::FileLoad {
                path: path.to_path_buf(),
                message,
            })
        };

        let content = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
        let values: BTreeMap<String, String> =
            serde_yaml::from_str(&content).map_err(|e| load_error(e.to_string()))?;

        debug!("Loaded {} secret references from {}", values.len(), path.display());
        Ok(Self { values })
    }
}

impl std::fmt::Debug for StaticCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentialStore")
            .field("references", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn resolve(&self, reference: &str) -> Result<String> {
        match self.values.get(reference) {
            Some(value) if !value.is_empty() => Ok(value.clone()),
            Some(_) => Err(SecretError::resolution(reference, "value is empty").into()),
            None => Err(SecretError::resolution(reference, "unknown reference").into()),
        }
    }

    fn store_type(&self) -> &'static str {
        "static"
    }
}
