//! Desired-state parser for loading documents and applying overrides.
//!
//! This module handles loading the YAML document, the optional `.env` file
//! next to it, and the `FUNCSYNC_*` environment overrides.

use crate::error::{ConfigError, FuncsyncError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::{DesiredState, SUPPORTED_VERSION};

/// Parser for desired-state documents.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory the `.env` file is looked up in.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a desired-state document from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DesiredState> {
        let path = path.as_ref();
        info!("Loading desired state from: {}", path.display());

        if !path.exists() {
            return Err(FuncsyncError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            FuncsyncError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a desired-state document from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid, carries unknown fields, or
    /// declares an unsupported schema version.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DesiredState> {
        debug!("Parsing YAML desired state");

        let state: DesiredState = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            FuncsyncError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        if state.version != SUPPORTED_VERSION {
            return Err(FuncsyncError::Config(ConfigError::UnsupportedVersion {
                found: state.version,
                supported: SUPPORTED_VERSION,
            }));
        }

        debug!(
            "Parsed desired state: {} plans, {} apps, {} routes",
            state.plans.len(),
            state.apps.len(),
            state.routes.len()
        );
        Ok(state)
    }

    /// Loads a document and applies `FUNCSYNC_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DesiredState> {
        let mut state = self.load_file(path)?;
        apply_env_overrides(&mut state, |key| std::env::var(key).ok());
        Ok(state)
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                FuncsyncError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Applies environment overrides through a lookup function.
///
/// Recognized keys: `FUNCSYNC_RESOURCE_GROUP`, `FUNCSYNC_REGION`,
/// `FUNCSYNC_JOURNAL_BUCKET`, `FUNCSYNC_JOURNAL_PREFIX`.
pub fn apply_env_overrides<F>(state: &mut DesiredState, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(rg) = lookup("FUNCSYNC_RESOURCE_GROUP") {
        debug!("Overriding resource_group from environment");
        state.resource_group = rg;
    }

    if let Some(region) = lookup("FUNCSYNC_REGION") {
        debug!("Overriding region from environment");
        state.region = region;
    }

    if let Some(bucket) = lookup("FUNCSYNC_JOURNAL_BUCKET") {
        debug!("Overriding journal.bucket from environment");
        state.journal.bucket = Some(bucket);
    }

    if let Some(prefix) = lookup("FUNCSYNC_JOURNAL_PREFIX") {
        debug!("Overriding journal.prefix from environment");
        state.journal.prefix = Some(prefix);
    }
}

/// Default document file names to search for.
pub const DEFAULT_STATE_FILES: &[&str] = &[
    "funcsync.yaml",
    "funcsync.yml",
    "desired-state.yaml",
    "desired-state.yml",
];

/// Finds the document in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no document is found.
pub fn find_state_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_STATE_FILES {
            let candidate = current.join(filename);
            if candidate.exists() {
                info!("Found desired-state document: {}", candidate.display());
                return Ok(candidate);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(FuncsyncError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_STATE_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r"
version: 1
resource_group: rg-search
region: eastus
";

    #[test]
    fn test_parse_minimal_document() {
        let parser = ConfigParser::new();
        let state = parser.parse_yaml(MINIMAL, None).unwrap();
        assert_eq!(state.resource_group, "rg-search");
        assert!(state.apps.is_empty());
        assert_eq!(state.gateway.api, "search-api");
    }

    #[test]
    fn test_parse_full_document() {
        let yaml = r#"
version: 1
resource_group: rg-search
region: eastus
plans:
  - name: search-plan
    sku: Y1
    os: linux
apps:
  - name: html-search
    plan: search-plan
    runtime: { language: python, version: "3.11", workers: 1 }
    profile: html-search
    storage_account: searchfuncstore
    artifact:
      location: "https://builds/html-search.zip"
      sha256: "0000000000000000000000000000000000000000000000000000000000000000"
    settings:
      SEARCH_SERVICE_ENDPOINT: https://search.example.net
      SEARCH_SERVICE_API_KEY: { secret: SEARCH_ADMIN_KEY }
      SEARCH_INDEX_NAME: html-dev
gateway:
  api: search-api
routes:
  - path: /search
    method: POST
    backend: html-search
    backend_path: api/search
journal:
  backend: local
"#;
        let state = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(state.plans.len(), 1);
        assert_eq!(state.apps[0].secret_keys(), vec!["SEARCH_SERVICE_API_KEY"]);
        assert_eq!(state.routes[0].content_type, "application/json");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = format!("{MINIMAL}\nunexpected: true\n");
        let err = ConfigParser::new().parse_yaml(&yaml, None).unwrap_err();
        assert!(matches!(
            err,
            FuncsyncError::Config(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let yaml = MINIMAL.replace("version: 1", "version: 2");
        let err = ConfigParser::new().parse_yaml(&yaml, None).unwrap_err();
        assert!(matches!(
            err,
            FuncsyncError::Config(ConfigError::UnsupportedVersion { found: 2, .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut state = ConfigParser::new().parse_yaml(MINIMAL, None).unwrap();
        let vars: HashMap<&str, &str> = [
            ("FUNCSYNC_REGION", "westeurope"),
            ("FUNCSYNC_JOURNAL_BUCKET", "ci-journal"),
        ]
        .into_iter()
        .collect();

        apply_env_overrides(&mut state, |k| vars.get(k).map(|v| (*v).to_string()));
        assert_eq!(state.region, "westeurope");
        assert_eq!(state.resource_group, "rg-search");
        assert_eq!(state.journal.bucket.as_deref(), Some("ci-journal"));
    }

    #[test]
    fn test_load_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigParser::new()
            .load_file(dir.path().join("nope.yaml"))
            .unwrap_err();
        assert!(matches!(
            err,
            FuncsyncError::Config(ConfigError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_find_state_file_in_parent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("funcsync.yaml"), MINIMAL).unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_state_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("funcsync.yaml"));
    }
}
