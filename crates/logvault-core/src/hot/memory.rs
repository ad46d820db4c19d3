//! In-memory hot store.
//!
//! Rows live in a single map guarded by a `parking_lot::RwLock`; secondary
//! indexes by service and correlation id use `DashMap` for lock-free reads.
//! Index updates happen while the row write lock is held, so any reader
//! holding the row read lock sees indexes consistent with the rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::store::{HotStore, LogFilter, ServiceCatalog, StoreHealth};
use crate::config::StorageBackend;
use crate::error::StorageError;
use crate::model::{LogEntry, Service, ServiceSummary};
use crate::{Error, Result};

/// Hot store backed by process memory.
pub struct MemoryHotStore {
    /// Primary storage: entry id -> entry
    rows: RwLock<HashMap<Uuid, LogEntry>>,

    /// Service name -> entry ids
    service_index: DashMap<String, HashSet<Uuid>>,

    /// Correlation id -> entry ids
    correlation_index: DashMap<String, HashSet<Uuid>>,

    /// Service name -> service
    services: RwLock<HashMap<String, Service>>,

    /// API key -> service name
    key_index: DashMap<String, String>,

    stats: MemoryStats,
}

struct MemoryStats {
    inserted: AtomicU64,
    deleted: AtomicU64,
}

/// Counters for the in-memory store.
#[derive(Debug, Clone)]
pub struct MemoryStoreStats {
    /// Entries currently held
    pub row_count: usize,
    /// Entries inserted since creation
    pub total_inserted: u64,
    /// Entries deleted since creation
    pub total_deleted: u64,
}

impl Default for MemoryHotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            service_index: DashMap::new(),
            correlation_index: DashMap::new(),
            services: RwLock::new(HashMap::new()),
            key_index: DashMap::new(),
            stats: MemoryStats {
                inserted: AtomicU64::new(0),
                deleted: AtomicU64::new(0),
            },
        }
    }

    /// Store statistics.
    pub fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            row_count: self.rows.read().len(),
            total_inserted: self.stats.inserted.load(Ordering::Relaxed),
            total_deleted: self.stats.deleted.load(Ordering::Relaxed),
        }
    }

    // Caller holds the row write lock.
    fn index(&self, entry: &LogEntry) {
        self.service_index
            .entry(entry.service.clone())
            .or_default()
            .insert(entry.id);
        if let Some(ref correlation_id) = entry.correlation_id {
            self.correlation_index
                .entry(correlation_id.clone())
                .or_default()
                .insert(entry.id);
        }
    }

    // Caller holds the row write lock.
    fn unindex(&self, entry: &LogEntry) {
        if let Some(mut ids) = self.service_index.get_mut(&entry.service) {
            ids.remove(&entry.id);
        }
        self.service_index
            .remove_if(&entry.service, |_, ids| ids.is_empty());

        if let Some(ref correlation_id) = entry.correlation_id {
            if let Some(mut ids) = self.correlation_index.get_mut(correlation_id) {
                ids.remove(&entry.id);
            }
            self.correlation_index
                .remove_if(correlation_id, |_, ids| ids.is_empty());
        }
    }

    /// Candidate ids for a filter, narrowed by the most selective index.
    fn candidates(&self, filter: &LogFilter) -> Vec<Uuid> {
        let index = match filter.correlation_id {
            Some(ref correlation_id) => self.correlation_index.get(correlation_id),
            None => self.service_index.get(&filter.service),
        };
        index
            .map(|ids| ids.value().iter().copied().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl HotStore for MemoryHotStore {
    async fn insert(&self, entry: &LogEntry) -> Result<()> {
        self.insert_batch(std::slice::from_ref(entry)).await
    }

    async fn insert_batch(&self, entries: &[LogEntry]) -> Result<()> {
        let mut rows = self.rows.write();

        // Check every id before touching anything so the batch stays atomic
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in entries {
            if rows.contains_key(&entry.id) || !seen.insert(entry.id) {
                return Err(StorageError::DuplicateId(entry.id).into());
            }
        }

        for entry in entries {
            self.index(entry);
            rows.insert(entry.id, entry.clone());
        }

        self.stats
            .inserted
            .fetch_add(entries.len() as u64, Ordering::Relaxed);
        debug!(count = entries.len(), "Inserted entries into memory store");
        Ok(())
    }

    async fn query(&self, filter: &LogFilter) -> Result<Vec<LogEntry>> {
        let rows = self.rows.read();
        Ok(self
            .candidates(filter)
            .into_iter()
            .filter_map(|id| rows.get(&id))
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect())
    }

    async fn get_by_id(&self, id: Uuid, service: &str) -> Result<Option<LogEntry>> {
        Ok(self
            .rows
            .read()
            .get(&id)
            .filter(|entry| entry.service == service)
            .cloned())
    }

    async fn fetch_archivable(
        &self,
        service: &str,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LogEntry>> {
        let rows = self.rows.read();
        let mut matching: Vec<LogEntry> = self
            .candidates(&LogFilter::for_service(service))
            .into_iter()
            .filter_map(|id| rows.get(&id))
            .filter(|entry| entry.timestamp < cutoff)
            .cloned()
            .collect();
        drop(rows);

        matching.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn delete_by_ids(&self, ids: &[Uuid]) -> Result<usize> {
        let mut rows = self.rows.write();
        let mut removed = 0;
        for id in ids {
            if let Some(entry) = rows.remove(id) {
                self.unindex(&entry);
                removed += 1;
            }
        }

        self.stats
            .deleted
            .fetch_add(removed as u64, Ordering::Relaxed);
        Ok(removed)
    }

    async fn list_distinct_services(&self) -> Result<Vec<String>> {
        let _rows = self.rows.read();
        let mut services: Vec<String> = self
            .service_index
            .iter()
            .filter(|ids| !ids.value().is_empty())
            .map(|ids| ids.key().clone())
            .collect();
        services.sort();
        Ok(services)
    }

    async fn count(&self, service: Option<&str>) -> Result<u64> {
        let rows = self.rows.read();
        let count = match service {
            None => rows.len(),
            Some(name) => self.service_index.get(name).map_or(0, |ids| ids.len()),
        };
        Ok(count as u64)
    }

    async fn health_check(&self) -> Result<StoreHealth> {
        let start = Instant::now();
        let entry_count = self.rows.read().len() as u64;
        Ok(StoreHealth {
            is_healthy: true,
            response_time_ms: start.elapsed().as_millis() as u64,
            entry_count,
            backend: StorageBackend::Memory,
            message: None,
        })
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}

#[async_trait]
impl ServiceCatalog for MemoryHotStore {
    async fn create_service(&self, service: &Service) -> Result<()> {
        let mut services = self.services.write();
        if services.contains_key(&service.name) {
            return Err(Error::DuplicateServiceName(service.name.clone()));
        }
        if self.key_index.contains_key(&service.api_key) {
            return Err(StorageError::Backend("API key collision".into()).into());
        }

        self.key_index
            .insert(service.api_key.clone(), service.name.clone());
        services.insert(service.name.clone(), service.clone());
        Ok(())
    }

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Service>> {
        let services = self.services.read();
        Ok(self
            .key_index
            .get(api_key)
            .and_then(|name| services.get(name.value()).cloned()))
    }

    async fn list_services(&self) -> Result<Vec<ServiceSummary>> {
        let mut list: Vec<ServiceSummary> = self
            .services
            .read()
            .values()
            .map(ServiceSummary::from)
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.name.cmp(&b.name)));
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{now_millis, parse_timestamp, Level};

    fn entry(service: &str, ts: &str) -> LogEntry {
        LogEntry {
            id: Uuid::new_v4(),
            timestamp: parse_timestamp(ts).unwrap(),
            level: Level::Info,
            service: service.into(),
            message: "hello".into(),
            context: None,
            correlation_id: None,
            created_at: now_millis(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_query() {
        let store = MemoryHotStore::new();
        let e = entry("svc-a", "2024-01-15T10:00:00Z");
        store.insert(&e).await.unwrap();
        store
            .insert(&entry("svc-b", "2024-01-15T10:00:00Z"))
            .await
            .unwrap();

        let found = store.query(&LogFilter::for_service("svc-a")).await.unwrap();
        assert_eq!(found, vec![e.clone()]);
        assert_eq!(store.count(None).await.unwrap(), 2);
        assert_eq!(store.count(Some("svc-a")).await.unwrap(), 1);
        assert!(store.get_by_id(e.id, "svc-b").await.unwrap().is_none());
        assert!(store.get_by_id(e.id, "svc-a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_batch_with_duplicate_writes_nothing() {
        let store = MemoryHotStore::new();
        let existing = entry("svc", "2024-01-15T10:00:00Z");
        store.insert(&existing).await.unwrap();

        let batch = vec![entry("svc", "2024-01-15T11:00:00Z"), existing.clone()];
        let err = store.insert_batch(&batch).await.unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::DuplicateId(id)) if id == existing.id));
        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_correlation_index_query() {
        let store = MemoryHotStore::new();
        let mut e = entry("svc", "2024-01-15T10:00:00Z");
        e.correlation_id = Some("req-1".into());
        store.insert(&e).await.unwrap();
        store
            .insert(&entry("svc", "2024-01-15T10:00:00Z"))
            .await
            .unwrap();

        let mut filter = LogFilter::for_service("svc");
        filter.correlation_id = Some("req-1".into());
        assert_eq!(store.query(&filter).await.unwrap().len(), 1);

        // Correlation index must not leak across services
        let mut filter = LogFilter::for_service("other");
        filter.correlation_id = Some("req-1".into());
        assert!(store.query(&filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_archivable_and_delete() {
        let store = MemoryHotStore::new();
        let old2 = entry("svc", "2024-01-15T12:00:00Z");
        let old1 = entry("svc", "2024-01-15T08:00:00Z");
        let fresh = entry("svc", "2024-01-16T08:00:00Z");
        store
            .insert_batch(&[old2.clone(), old1.clone(), fresh.clone()])
            .await
            .unwrap();

        let cutoff = parse_timestamp("2024-01-16T00:00:00Z").unwrap();
        let batch = store.fetch_archivable("svc", cutoff, 10).await.unwrap();
        assert_eq!(batch, vec![old1.clone(), old2.clone()]);

        let limited = store.fetch_archivable("svc", cutoff, 1).await.unwrap();
        assert_eq!(limited, vec![old1.clone()]);

        let removed = store.delete_by_ids(&[old1.id, old2.id]).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count(Some("svc")).await.unwrap(), 1);
        assert_eq!(store.stats().total_deleted, 2);
    }

    #[tokio::test]
    async fn test_distinct_services_drop_empty() {
        let store = MemoryHotStore::new();
        let e = entry("svc-a", "2024-01-15T10:00:00Z");
        store.insert(&e).await.unwrap();
        store
            .insert(&entry("svc-b", "2024-01-15T10:00:00Z"))
            .await
            .unwrap();
        assert_eq!(
            store.list_distinct_services().await.unwrap(),
            vec!["svc-a".to_string(), "svc-b".to_string()]
        );

        store.delete_by_ids(&[e.id]).await.unwrap();
        assert_eq!(
            store.list_distinct_services().await.unwrap(),
            vec!["svc-b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_service_catalog() {
        let store = MemoryHotStore::new();
        let service = Service {
            id: Uuid::new_v4(),
            name: "billing".into(),
            api_key: "sk_test".into(),
            created_at: now_millis(),
        };
        store.create_service(&service).await.unwrap();

        let dup = Service {
            id: Uuid::new_v4(),
            api_key: "sk_other".into(),
            ..service.clone()
        };
        assert!(matches!(
            store.create_service(&dup).await,
            Err(Error::DuplicateServiceName(name)) if name == "billing"
        ));

        assert_eq!(
            store.find_by_api_key("sk_test").await.unwrap(),
            Some(service.clone())
        );
        assert!(store.find_by_api_key("sk_nope").await.unwrap().is_none());
        assert_eq!(store.list_services().await.unwrap().len(), 1);
    }
}
