//! Storage capabilities implemented by every hot store engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::StorageBackend;
use crate::model::{Level, LogEntry, Service, ServiceSummary};
use crate::Result;

/// Predicates for a hot store scan. `service` is always required.
#[derive(Debug, Clone, PartialEq)]
pub struct LogFilter {
    pub service: String,
    pub level: Option<Level>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
}

impl LogFilter {
    /// Filter scoped to one service with no other predicates.
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            level: None,
            start_time: None,
            end_time: None,
            correlation_id: None,
        }
    }

    /// Whether an entry satisfies every predicate (inclusive time bounds).
    pub fn matches(&self, entry: &LogEntry) -> bool {
        entry.service == self.service
            && self.level.map_or(true, |l| entry.level == l)
            && self.start_time.map_or(true, |s| entry.timestamp >= s)
            && self.end_time.map_or(true, |e| entry.timestamp <= e)
            && self
                .correlation_id
                .as_deref()
                .map_or(true, |c| entry.correlation_id.as_deref() == Some(c))
    }
}

/// Result of a hot store probe.
#[derive(Debug, Clone)]
pub struct StoreHealth {
    /// Whether the store answered
    pub is_healthy: bool,
    /// Probe round trip in milliseconds
    pub response_time_ms: u64,
    /// Entries currently held
    pub entry_count: u64,
    /// Backend engine
    pub backend: StorageBackend,
    /// Optional details
    pub message: Option<String>,
}

/// The live, mutable tier.
///
/// All mutation is atomic at this layer: a batch insert or a delete-set
/// either applies completely or not at all.
#[async_trait]
pub trait HotStore: Send + Sync {
    /// Insert one entry. Fails with `DuplicateId` on id collision.
    async fn insert(&self, entry: &LogEntry) -> Result<()>;

    /// Insert entries in order inside one transaction.
    async fn insert_batch(&self, entries: &[LogEntry]) -> Result<()>;

    /// Entries matching every predicate, unordered and unlimited.
    async fn query(&self, filter: &LogFilter) -> Result<Vec<LogEntry>>;

    /// Point lookup scoped to a service.
    async fn get_by_id(&self, id: Uuid, service: &str) -> Result<Option<LogEntry>>;

    /// Oldest entries of `service` with `timestamp < cutoff`, ascending, at most `limit`.
    async fn fetch_archivable(
        &self,
        service: &str,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LogEntry>>;

    /// Remove every listed id in one transaction. Returns rows removed.
    async fn delete_by_ids(&self, ids: &[Uuid]) -> Result<usize>;

    /// Names of services that currently own hot entries.
    async fn list_distinct_services(&self) -> Result<Vec<String>>;

    /// Entry count, optionally for one service.
    async fn count(&self, service: Option<&str>) -> Result<u64>;

    /// Probe the backend.
    async fn health_check(&self) -> Result<StoreHealth>;

    /// Backend engine of this store.
    fn backend(&self) -> StorageBackend;
}

/// Tenant registry kept next to the hot tier.
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    /// Persist a new service. Fails with `DuplicateServiceName` on a name clash.
    async fn create_service(&self, service: &Service) -> Result<()>;

    /// Resolve an API key.
    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Service>>;

    /// All services, newest first.
    async fn list_services(&self) -> Result<Vec<ServiceSummary>>;
}
