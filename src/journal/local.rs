//! Local file-based journal backend.
//!
//! The journal lives in `.funcsync/` next to the desired-state document.
//! Writes go to a temporary file that is then renamed over the journal, and
//! the lock file is created exclusively so two runs cannot both take it.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{FuncsyncError, JournalError, Result};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, holder_or_generated};
use super::store::JournalStore;
use super::types::Journal;

/// Default journal directory name.
pub const JOURNAL_DIR: &str = ".funcsync";

/// Journal file name.
const JOURNAL_FILE: &str = "journal.json";

/// Lock file name.
const LOCK_FILE: &str = "journal.lock";

/// Local file-based journal store.
#[derive(Debug)]
pub struct LocalJournalStore {
    /// Directory holding the journal and lock files.
    base_dir: PathBuf,
    /// Path to the journal file.
    journal_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

fn storage(context: &str, e: &std::io::Error) -> FuncsyncError {
    JournalError::storage(format!("{context}: {e}")).into()
}

fn lock_failed(context: &str, e: &std::io::Error) -> FuncsyncError {
    JournalError::LockFailed {
        message: format!("{context}: {e}"),
    }
    .into()
}

fn corrupted(message: String) -> FuncsyncError {
    JournalError::Corrupted { message }.into()
}

impl LocalJournalStore {
    /// Creates a store in `<dir>/.funcsync`.
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::with_base_dir(dir.as_ref().join(JOURNAL_DIR))
    }

    /// Creates a store using `base_dir` as the journal directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let journal_path = base_dir.join(JOURNAL_FILE);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            journal_path,
            lock_path,
        }
    }

    /// Journal directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Ensures the journal directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating journal directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| storage("Failed to create journal directory", &e))?;
        }
        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        let content = match fs::read_to_string(&self.lock_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(corrupted(format!("Failed to read lock file: {e}"))),
        };

        let lock_info: LockInfo = serde_json::from_str(&content)
            .map_err(|e| corrupted(format!("Failed to parse lock file: {e}")))?;

        Ok(Some(lock_info))
    }

    /// Creates the lock file; fails if it already exists.
    async fn create_lock_file(&self, lock_info: &LockInfo) -> Result<bool> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(lock_info)
            .map_err(|e| JournalError::serialization(format!("Failed to serialize lock: {e}")))?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(lock_failed("Failed to create lock file", &e)),
        };

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| lock_failed("Failed to write lock file", &e))?;
        file.sync_all()
            .await
            .map_err(|e| lock_failed("Failed to sync lock file", &e))?;

        Ok(true)
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(lock_failed("Failed to delete lock file", &e)),
        }
    }
}

#[async_trait]
impl JournalStore for LocalJournalStore {
    async fn load(&self) -> Result<Journal> {
        let content = match fs::read_to_string(&self.journal_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Journal does not exist yet: {}", self.journal_path.display());
                return Ok(Journal::new());
            }
            Err(e) => return Err(corrupted(format!("Failed to read journal: {e}"))),
        };

        serde_json::from_str(&content).map_err(|e| corrupted(format!("Failed to parse journal: {e}")))
    }

    async fn save(&self, journal: &Journal) -> Result<()> {
        self.ensure_dir().await?;

        debug!("Saving journal to: {}", self.journal_path.display());

        let content = serde_json::to_string_pretty(journal).map_err(|e| {
            JournalError::serialization(format!("Failed to serialize journal: {e}"))
        })?;

        let temp_path = self.journal_path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| storage("Failed to create temp journal file", &e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| storage("Failed to write journal", &e))?;
        file.sync_all()
            .await
            .map_err(|e| storage("Failed to sync journal", &e))?;

        fs::rename(&temp_path, &self.journal_path)
            .await
            .map_err(|e| storage("Failed to rename journal", &e))?;

        Ok(())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file().await? {
            if !existing.is_expired() {
                return Err(JournalError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
            debug!("Expired lock of {} found, taking over", existing.holder);
            self.delete_lock_file().await?;
        }

        let lock_info = LockInfo::new(&holder_or_generated(holder));
        if !self.create_lock_file(&lock_info).await? {
            // another run created it between our read and our create
            let holder = self
                .read_lock_file()
                .await?
                .map_or_else(|| String::from("unknown"), |l| l.holder);
            return Err(JournalError::LockedByOther {
                holder,
                since: chrono::Utc::now().to_rfc3339(),
            }
            .into());
        }

        info!(
            "Acquired journal lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
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
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
