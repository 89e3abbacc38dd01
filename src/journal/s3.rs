//! S3-based journal backend.
//!
//! Shares the run journal between CI runners through a bucket (or an
//! S3-compatible service).

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{FuncsyncError, JournalError, Result};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, holder_or_generated};
use super::store::JournalStore;
use super::types::Journal;

/// Journal object key suffix.
const JOURNAL_KEY: &str = "journal.json";

/// Lock object key suffix.
const LOCK_KEY: &str = "journal.lock";

/// S3-based journal store.
#[derive(Debug)]
pub struct S3JournalStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix, empty or ending in '/'.
    prefix: String,
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .map(|p| format!("{p}/"))
        .unwrap_or_default()
}

fn parse_lock(content: &str) -> Result<LockInfo> {
    serde_json::from_str(content).map_err(|e| {
        FuncsyncError::Journal(JournalError::Corrupted {
            message: format!("Failed to parse lock: {e}"),
        })
    })
}

impl S3JournalStore {
    /// Creates a store, loading AWS credentials from the environment.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Self {
        let config = if let Some(region) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Self::with_client(Client::new(&config), bucket, prefix)
    }

    /// Creates a store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    /// Gets the full S3 key for an object.
    fn key(&self, file: &str) -> String {
        format!("{}{file}", self.prefix)
    }

    /// Gets an object; a missing key yields `None`.
    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response
                    .body
                    .collect()
                    .await
                    .map_err(|e| JournalError::s3(format!("Failed to read S3 object: {e}")))?;

                let content = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    FuncsyncError::Journal(JournalError::Corrupted {
                        message: format!("Invalid UTF-8 in S3 object: {e}"),
                    })
                })?;

                Ok(Some(content))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(JournalError::s3(format!("S3 get error: {service_err}")).into())
                }
            }
        }
    }

    /// Puts an object.
    async fn put_object(&self, key: &str, content: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.as_bytes().to_vec().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| JournalError::s3(format!("S3 put error: {e}")))?;

        Ok(())
    }

    /// Deletes an object.
    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| JournalError::s3(format!("S3 delete error: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl JournalStore for S3JournalStore {
    async fn load(&self) -> Result<Journal> {
        let key = self.key(JOURNAL_KEY);
        debug!("Loading journal from s3://{}/{key}", self.bucket);

        match self.get_object(&key).await? {
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                FuncsyncError::Journal(JournalError::Corrupted {
                    message: format!("Failed to parse journal: {e}"),
                })
            }),
            None => {
                debug!("No journal found in S3");
                Ok(Journal::new())
            }
        }
    }

    async fn save(&self, journal: &Journal) -> Result<()> {
        let key = self.key(JOURNAL_KEY);
        debug!("Saving journal to s3://{}/{key}", self.bucket);

        let content = serde_json::to_string_pretty(journal).map_err(|e| {
            JournalError::serialization(format!("Failed to serialize journal: {e}"))
        })?;

        self.put_object(&key, &content).await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let key = self.key(LOCK_KEY);

        if let Some(content) = self.get_object(&key).await? {
            let existing = parse_lock(&content)?;
            if !existing.is_expired() {
                return Err(JournalError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
            debug!("Expired lock of {} found, taking over", existing.holder);
        }

        let lock_info = LockInfo::new(&holder_or_generated(holder));
        let content = serde_json::to_string_pretty(&lock_info)
            .map_err(|e| JournalError::serialization(format!("Failed to serialize lock: {e}")))?;

        self.put_object(&key, &content).await?;

        info!(
            "Acquired journal lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let key = self.key(LOCK_KEY);

        if let Some(content) = self.get_object(&key).await? {
            let existing = parse_lock(&content)?;
            if existing.lock_id == lock_id {
                self.delete_object(&key).await?;
                info!("Released journal lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }

        Ok(())
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        let key = self.key(LOCK_KEY);
        self.get_object(&key)
            .await?
            .map(|content| parse_lock(&content))
            .transpose()
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(normalize_prefix(None), "");
        assert_eq!(normalize_prefix(Some("/")), "");
        assert_eq!(normalize_prefix(Some("funcsync/prod/")), "funcsync/prod/");
        assert_eq!(normalize_prefix(Some("/ci")), "ci/");
    }

    #[test]
    fn test_keys() {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .build();
        let store = S3JournalStore::with_client(
            Client::from_conf(config),
            "deploy-journal",
            Some("search"),
        );
        assert_eq!(store.key(JOURNAL_KEY), "search/journal.json");
        assert_eq!(store.key(LOCK_KEY), "search/journal.lock");
        assert_eq!(store.backend_type(), "s3");
    }
}
