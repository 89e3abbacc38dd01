//! Journal store trait definition.

use async_trait::async_trait;

use crate::error::Result;

use super::lock::LockInfo;
use super::types::{Journal, RunRecord};

/// Trait for journal storage backends.
#[async_trait]
pub trait JournalStore: Send + Sync {
    /// Loads the journal; an absent journal is empty.
    async fn load(&self) -> Result<Journal>;

    /// Saves the journal.
    async fn save(&self, journal: &Journal) -> Result<()>;

    /// Appends one run record.
    async fn append(&self, record: RunRecord) -> Result<()> {
        let mut journal = self.load().await?;
        journal.push(record);
        self.save(&journal).await
    }

    /// Acquires the journal lock.
    ///
    /// An empty `holder` is replaced by a generated identifier. Fails with
    /// `JournalError::LockedByOther` while another unexpired lock exists.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the lock if `lock_id` still owns it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
