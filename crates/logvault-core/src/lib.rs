//! logvault core - multi-tenant tiered log storage engine
//!
//! This library provides the storage and retrieval engine behind the
//! logvault server:
//!
//! - Hot store with swappable SQLite and in-memory backends
//! - Date and service partitioned JSON-lines archive with retention
//! - Merged queries that deduplicate across tiers by entry id
//! - Scheduled archive migration and retention sweeps

pub mod archive;
pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod hot;
pub mod ingest;
pub mod maintenance;
pub mod metrics;
pub mod model;
pub mod query;
pub mod validation;

// Re-export commonly used types
pub use config::Config;
pub use engine::LogVault;
pub use error::{ArchiveError, AuthError, BatchRejection, StorageError, ValidationError};
pub use error::{Error, Result};
pub use model::{Level, LogEntry, NewLogEntry, Service, ServiceSummary};
pub use query::{LogQuery, QueryPage};
