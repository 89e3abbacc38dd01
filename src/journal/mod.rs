//! Run journal for funcsync.
//!
//! This module records one summary per executed reconciliation pass and
//! provides the lock that keeps two passes from running at once. Journals
//! live on the local filesystem or in S3.

mod store;
mod local;
mod s3;
mod lock;
mod types;

use std::path::Path;
use std::sync::Arc;

use crate::config::{JournalBackend, JournalConfig};
use crate::error::{ConfigError, Result};

pub use store::JournalStore;
pub use local::{JOURNAL_DIR, LocalJournalStore};
pub use s3::S3JournalStore;
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use types::{JOURNAL_VERSION, Journal, MAX_JOURNAL_ENTRIES, RunEntry, RunRecord};

/// Opens the journal described by `config`.
///
/// A relative local path is resolved against `document_dir`.
///
/// # Errors
///
/// Returns a validation error if the S3 backend has no bucket.
pub async fn open_journal(
    config: &JournalConfig,
    document_dir: &Path,
) -> Result<Arc<dyn JournalStore>> {
    match config.backend {
        JournalBackend::Local => {
            let store = match config.path.as_deref() {
                Some(path) => LocalJournalStore::with_base_dir(document_dir.join(path)),
                None => LocalJournalStore::in_dir(document_dir),
            };
            Ok(Arc::new(store))
        }
        JournalBackend::S3 => {
            let bucket = config.bucket.as_deref().ok_or_else(|| {
                ConfigError::validation("S3 journal requires a bucket", "journal.bucket")
            })?;
            let store =
                S3JournalStore::new(bucket, config.prefix.as_deref(), config.region.as_deref()).await;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_local_journal() {
        let temp = tempfile::TempDir::new().unwrap();
        let journal = open_journal(&JournalConfig::default(), temp.path())
            .await
            .unwrap();
        assert_eq!(journal.backend_type(), "local");
        assert!(journal.load().await.unwrap().runs.is_empty());
    }

    #[tokio::test]
    async fn test_s3_without_bucket_is_rejected() {
        let config = JournalConfig {
            backend: JournalBackend::S3,
            ..JournalConfig::default()
        };
        let err = open_journal(&config, Path::new(".")).await.err().unwrap();
        assert_eq!(err.exit_code(), 2);
    }
}
