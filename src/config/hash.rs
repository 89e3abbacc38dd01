//! Document and secret-reference hashing.
//!
//! The document hash identifies a desired state in plans and journal
//! entries. The secret digest is stored on each app as a marker setting so
//! that a changed secret reference is visible without reading secret values.

use sha2::{Digest, Sha256};

use super::spec::{DesiredState, FunctionApp, SettingValue};

/// Setting key holding the digest of an app's secret references.
pub const SECRET_DIGEST_KEY: &str = "FUNCSYNC_SECRET_DIGEST";

/// Hasher for documents and secret references.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire desired-state document.
    ///
    /// The document is hashed through its JSON form; maps are `BTreeMap`s
    /// so the encoding is stable.
    #[must_use]
    pub fn hash_document(&self, state: &DesiredState) -> String {
        let mut hasher = Sha256::new();
        match serde_json::to_vec(state) {
            Ok(bytes) => hasher.update(&bytes),
            // Unreachable for these types; fall back to the debug form.
            Err(_) => hasher.update(format!("{state:?}").as_bytes()),
        }
        hex::encode(hasher.finalize())
    }

    /// Digest over the app's sorted secret key and reference pairs.
    ///
    /// Returns `None` when the app declares no secret settings.
    #[must_use]
    pub fn secret_digest(&self, app: &FunctionApp) -> Option<String> {
        let mut hasher = Sha256::new();
        let mut any = false;

        // settings is a BTreeMap, so iteration is sorted by key
        for (key, value) in &app.settings {
            if let SettingValue::Secret(reference) = value {
                hasher.update(key.as_bytes());
                hasher.update([0u8]);
                hasher.update(reference.secret.as_bytes());
                hasher.update([0u8]);
                any = true;
            }
        }

        any.then(|| hex::encode(hasher.finalize()))
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::{Artifact, RuntimeDescriptor, RuntimeProfile, SecretRef};
    use std::collections::BTreeMap;

    fn create_test_app(secret: &str) -> FunctionApp {
        let mut settings = BTreeMap::new();
        settings.insert(
            String::from("SEARCH_INDEX_NAME"),
            SettingValue::Literal(String::from("html-dev")),
        );
        settings.insert(
            String::from("SEARCH_SERVICE_API_KEY"),
            SettingValue::Secret(SecretRef {
                secret: secret.to_string(),
            }),
        );
        FunctionApp {
            name: String::from("html-search"),
            resource_group: None,
            region: None,
            plan: String::from("search-plan"),
            runtime: RuntimeDescriptor {
                language: String::from("python"),
                version: String::from("3.11"),
                workers: 1,
            },
            profile: RuntimeProfile::Custom,
            storage_account: String::from("searchfuncstore"),
            artifact: Artifact {
                location: String::from("https://builds/html-search.zip"),
                sha256: "0".repeat(64),
            },
            settings,
        }
    }

    #[test]
    fn test_secret_digest_tracks_reference() {
        let hasher = ConfigHasher::new();
        let a = hasher.secret_digest(&create_test_app("SEARCH_ADMIN_KEY")).unwrap();
        let b = hasher.secret_digest(&create_test_app("SEARCH_ADMIN_KEY")).unwrap();
        let c = hasher.secret_digest(&create_test_app("SEARCH_QUERY_KEY")).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_secret_digest_absent_without_secrets() {
        let mut app = create_test_app("SEARCH_ADMIN_KEY");
        app.settings.remove("SEARCH_SERVICE_API_KEY");
        assert!(ConfigHasher::new().secret_digest(&app).is_none());
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        let short = hasher.short_hash("abcdef1234567890abcdef1234567890");
        assert_eq!(short, "abcdef12");
    }

    #[test]
    fn test_hashes_match() {
        assert!(ConfigHasher::hashes_match("abc123", "abc123"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc124"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc12"));
    }
}
