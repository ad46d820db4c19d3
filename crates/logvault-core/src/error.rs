//! Error types for logvault core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for logvault operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for logvault.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A single entry or request parameter failed validation
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A batch was rejected; nothing was written
    #[error("Batch rejected: {0}")]
    BatchRejected(BatchRejection),

    /// Hot store error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Archive tier error
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Service name already taken
    #[error("Service name already exists: {0}")]
    DuplicateServiceName(String),

    /// Authentication / authorization failure
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Requested item does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation exceeded its deadline
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,
}

/// Validation failures for ingested entries and query parameters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Required field absent or empty
    #[error("{0} is required")]
    MissingField(&'static str),

    /// Level outside the accepted set
    #[error("Invalid level '{0}'. Must be one of: info, warn, error, debug")]
    InvalidLevel(String),

    /// Timestamp could not be parsed
    #[error("Invalid timestamp '{0}': expected RFC 3339")]
    InvalidTimestamp(String),

    /// Timestamp outside the accepted window
    #[error("Timestamp {timestamp} is out of bounds: must be between {earliest} and {latest}")]
    TimestampOutOfBounds {
        timestamp: String,
        earliest: String,
        latest: String,
    },

    /// Batch contained no entries
    #[error("logs must be a non-empty array")]
    EmptyBatch,

    /// Batch larger than the configured maximum
    #[error("Batch size {size} exceeds maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },

    /// Batch item did not decode into an entry
    #[error("Malformed entry: {0}")]
    MalformedEntry(String),

    /// Service name not usable as a tenant / partition name
    #[error("Invalid service name '{0}': use letters, digits, '.', '_' or '-', not starting with '.'")]
    InvalidServiceName(String),

    /// Request body was not valid JSON of the expected shape
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    /// Free-form parameter error
    #[error("Invalid parameter {name}: {message}")]
    InvalidParameter { name: &'static str, message: String },
}

/// One rejected entry inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexedError {
    /// Position in the submitted batch
    pub index: usize,
    /// Human-readable reason
    pub error: String,
}

/// All per-index failures of a rejected batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRejection {
    pub errors: Vec<IndexedError>,
}

impl BatchRejection {
    /// Build a rejection that applies to the batch as a whole.
    pub fn whole_batch(error: ValidationError) -> Self {
        Self {
            errors: vec![IndexedError {
                index: 0,
                error: error.to_string(),
            }],
        }
    }

    /// Indexes of rejected entries.
    pub fn indexes(&self) -> Vec<usize> {
        self.errors.iter().map(|e| e.index).collect()
    }
}

impl std::fmt::Display for BatchRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} invalid entries", self.errors.len())?;
        if let Some(first) = self.errors.first() {
            write!(f, " (first at index {}: {})", first.index, first.error)?;
        }
        Ok(())
    }
}

/// Hot store errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Entry id already present
    #[error("Duplicate entry id: {0}")]
    DuplicateId(Uuid),

    /// Backend query/IO failure
    #[error("Backend failure: {0}")]
    Backend(String),

    /// Transaction could not be committed; rolled back
    #[error("Transaction failed and was rolled back: {0}")]
    Transaction(String),

    /// Stored row could not be decoded
    #[error("Corrupt row {id}: {message}")]
    CorruptRow { id: String, message: String },

    /// Unknown backend requested by configuration
    #[error("Unsupported storage backend: {0}")]
    UnsupportedBackend(String),
}

/// Archive tier errors.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Appending to a partition failed
    #[error("Append to {path} failed: {message}")]
    Append { path: PathBuf, message: String },

    /// Reading a partition failed
    #[error("Read of {path} failed: {message}")]
    Read { path: PathBuf, message: String },

    /// Partition larger than the read ceiling
    #[error("Partition {path} is {size_bytes} bytes, above the {limit_bytes} byte limit")]
    PartitionTooLarge {
        path: PathBuf,
        size_bytes: u64,
        limit_bytes: u64,
    },

    /// Migration of a service's batch failed part-way
    #[error("Migration for service {service} aborted: {message}")]
    Migration { service: String, message: String },

    /// Retention sweep could not list the archive root
    #[error("Sweep of {path} failed: {message}")]
    Sweep { path: PathBuf, message: String },
}

/// Authentication and authorization errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No API key supplied
    #[error("Missing API key")]
    MissingKey,

    /// API key does not belong to any service
    #[error("Invalid API key")]
    InvalidKey,

    /// Admin operations are disabled because no admin key is configured
    #[error("Admin API key is not configured; admin operations are disabled")]
    AdminNotConfigured,

    /// Key is valid but not the admin key
    #[error("Admin privileges required")]
    NotAdmin,
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(StorageError::Backend(err.to_string()))
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Metrics(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Storage(StorageError::Backend(format!("blocking task failed: {}", err)))
    }
}

impl From<BatchRejection> for Error {
    fn from(rejection: BatchRejection) -> Self {
        Error::BatchRejected(rejection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("invalid value".into());
        assert_eq!(err.to_string(), "Configuration error: invalid value");

        let err: Error = ValidationError::MissingField("message").into();
        assert_eq!(err.to_string(), "Validation error: message is required");
    }

    #[test]
    fn test_batch_rejection_display() {
        let rejection = BatchRejection {
            errors: vec![
                IndexedError {
                    index: 2,
                    error: "level is required".into(),
                },
                IndexedError {
                    index: 5,
                    error: "message is required".into(),
                },
            ],
        };
        assert_eq!(
            rejection.to_string(),
            "2 invalid entries (first at index 2: level is required)"
        );
        assert_eq!(rejection.indexes(), vec![2, 5]);
    }

    #[test]
    fn test_storage_error_conversion() {
        let id = Uuid::new_v4();
        let err: Error = StorageError::DuplicateId(id).into();
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_auth_error_display() {
        let err: Error = AuthError::AdminNotConfigured.into();
        assert!(err.to_string().contains("not configured"));
    }
}
