//! Error types for the funcsync reconciler.
//!
//! This module provides the error hierarchy for every stage of a
//! reconciliation pass: document loading, provider access, secret
//! resolution, the run journal, and orchestration.

use std::path::PathBuf;
use thiserror::Error;

use crate::planner::FailureKind;

/// The main error type for funcsync.
#[derive(Debug, Error)]
pub enum FuncsyncError {
    /// Desired-state document errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Cloud provider errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Credential store errors.
    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    /// Run journal errors.
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    /// Orchestration errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Desired-state document errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document was not found.
    #[error("Desired-state document not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The document could not be parsed.
    #[error("Failed to parse desired state: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Desired-state validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// The document declares a schema version this build cannot read.
    #[error("Unsupported desired-state version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// Version found in the document.
        found: u32,
        /// Version this build understands.
        supported: u32,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// Cloud provider errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transient network or authentication failure.
    #[error("Provider unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// The provider asked us to slow down.
    #[error("Provider rate limited, retry after {retry_after_ms} ms")]
    RateLimited {
        /// Milliseconds to wait before retrying.
        retry_after_ms: u64,
    },

    /// The requested resource does not exist.
    #[error("Resource not found: {resource}")]
    NotFound {
        /// Resource that was looked up.
        resource: String,
    },

    /// The provider refused the request.
    #[error("Provider rejected request: {status} - {message}")]
    Rejected {
        /// HTTP-style status code.
        status: u16,
        /// Error message from the provider.
        message: String,
    },

    /// The provider returned something we could not read.
    #[error("Invalid response from provider: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Credential store errors.
#[derive(Debug, Error)]
pub enum SecretError {
    /// A reference could not be resolved.
    #[error("Cannot resolve secret reference '{reference}': {reason}")]
    Resolution {
        /// The reference as written in the document.
        reference: String,
        /// Why it failed.
        reason: String,
    },

    /// The secrets file could not be loaded.
    #[error("Failed to load secrets file {path}: {message}")]
    FileLoad {
        /// Path of the secrets file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },
}

/// Run journal errors.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Journal is corrupted.
    #[error("Journal is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Journal storage failed.
    #[error("Journal storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// Lock acquisition failed.
    #[error("Failed to acquire journal lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// Another run holds the lock.
    #[error("Journal is locked by another run (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// S3 backend error.
    #[error("S3 journal backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("Journal serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },
}

/// Orchestration errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A pass was aborted before any mutation.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },

    /// The deadline expired before the operation could start.
    #[error("Deadline exceeded before {operation} started")]
    Cancelled {
        /// Operation that never started.
        operation: String,
    },
}

/// Result type alias for funcsync operations.
pub type Result<T> = std::result::Result<T, FuncsyncError>;

impl FuncsyncError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(ProviderError::Unavailable { .. } | ProviderError::RateLimited { .. })
                | Self::Journal(JournalError::LockFailed { .. })
        )
    }

    /// Returns the delay the remote side asked for, if any.
    #[must_use]
    pub const fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            Self::Provider(ProviderError::RateLimited { retry_after_ms }) => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Returns true for a provider `NotFound`.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Provider(ProviderError::NotFound { .. }))
    }

    /// Classifies this error for a per-resource result entry.
    #[must_use]
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Provider(ProviderError::Unavailable { .. } | ProviderError::RateLimited { .. }) => {
                FailureKind::ProviderUnavailable
            }
            Self::Provider(_) => FailureKind::ProviderRejected,
            Self::Secret(_) => FailureKind::SecretResolution,
            Self::Reconcile(ReconcileError::Cancelled { .. }) => FailureKind::Cancelled,
            _ => FailureKind::Internal,
        }
    }

    /// Process exit code for this error when it ends the CLI.
    ///
    /// Only a document that cannot be read as a valid desired state exits 2;
    /// missing files, environment and flag errors exit 1.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(
                ConfigError::ParseError { .. }
                | ConfigError::ValidationError { .. }
                | ConfigError::UnsupportedVersion { .. },
            ) => 2,
            _ => 1,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl ProviderError {
    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Creates a transient unavailability error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }
}

impl SecretError {
    /// Creates a resolution error.
    #[must_use]
    pub fn resolution(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}

impl JournalError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a local storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let err = FuncsyncError::from(ProviderError::unavailable("connection reset"));
        assert!(err.is_retryable());
        assert_eq!(err.failure_kind(), FailureKind::ProviderUnavailable);

        let err = FuncsyncError::from(ProviderError::rejected(409, "conflict"));
        assert!(!err.is_retryable());
        assert_eq!(err.failure_kind(), FailureKind::ProviderRejected);

        let err = FuncsyncError::from(SecretError::resolution("SEARCH_KEY", "not set"));
        assert!(!err.is_retryable());
        assert_eq!(err.failure_kind(), FailureKind::SecretResolution);
    }

    #[test]
    fn test_rate_limit_delay() {
        let err = FuncsyncError::from(ProviderError::RateLimited { retry_after_ms: 1500 });
        assert_eq!(err.retry_delay_ms(), Some(1500));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_exit_codes() {
        let err = FuncsyncError::from(ConfigError::validation_general("bad"));
        assert_eq!(err.exit_code(), 2);
        let err = FuncsyncError::from(ConfigError::UnsupportedVersion {
            found: 2,
            supported: 1,
        });
        assert_eq!(err.exit_code(), 2);
        assert_eq!(FuncsyncError::internal("boom").exit_code(), 1);
    }

    #[test]
    fn test_environment_errors_exit_one() {
        let err = FuncsyncError::from(ConfigError::MissingEnvVar {
            name: String::from("FUNCSYNC_PROVIDER_URL"),
        });
        assert_eq!(err.exit_code(), 1);

        let err = FuncsyncError::from(ConfigError::FileNotFound {
            path: PathBuf::from("funcsync.yaml"),
        });
        assert_eq!(err.exit_code(), 1);
    }
}
