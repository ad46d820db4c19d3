//! SQLite hot store.
//!
//! A single connection is shared behind a `parking_lot::Mutex` and every
//! call runs on the blocking pool so slow disk I/O never stalls the
//! runtime. Timestamps are stored as fixed-width RFC 3339 text, so range
//! predicates and `ORDER BY timestamp` compare lexicographically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::{HotStore, LogFilter, ServiceCatalog, StoreHealth};
use crate::config::StorageBackend;
use crate::error::StorageError;
use crate::model::{
    ceil_to_millis, format_timestamp, parse_timestamp, Level, LogEntry, Service, ServiceSummary,
};
use crate::{Error, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS logs (
    id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    level TEXT NOT NULL,
    service TEXT NOT NULL,
    message TEXT NOT NULL,
    context TEXT,
    correlation_id TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_logs_service ON logs(service);
CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);
CREATE INDEX IF NOT EXISTS idx_logs_correlation_id ON logs(correlation_id);

CREATE TABLE IF NOT EXISTS services (
    id TEXT PRIMARY KEY,
    name TEXT UNIQUE NOT NULL,
    api_key TEXT UNIQUE NOT NULL,
    created_at TEXT NOT NULL
);
";

const LOG_COLUMNS: &str =
    "id, timestamp, level, service, message, context, correlation_id, created_at";

/// Hot store on a SQLite database.
pub struct SqliteHotStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

/// Row as stored; decoded outside the rusqlite row callback.
struct RawLogRow {
    id: String,
    timestamp: String,
    level: String,
    service: String,
    message: String,
    context: Option<String>,
    correlation_id: Option<String>,
    created_at: String,
}

impl RawLogRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            level: row.get(2)?,
            service: row.get(3)?,
            message: row.get(4)?,
            context: row.get(5)?,
            correlation_id: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn decode(self) -> Result<LogEntry> {
        let corrupt = |message: String| StorageError::CorruptRow {
            id: self.id.clone(),
            message,
        };

        let id = Uuid::parse_str(&self.id).map_err(|e| corrupt(e.to_string()))?;
        let timestamp = parse_timestamp(&self.timestamp).map_err(|e| corrupt(e.to_string()))?;
        let created_at = parse_timestamp(&self.created_at).map_err(|e| corrupt(e.to_string()))?;
        let level = self
            .level
            .parse::<Level>()
            .map_err(|e| corrupt(e.to_string()))?;

        // Unparsable context never fails a read
        let context = self.context.as_deref().and_then(|raw| {
            serde_json::from_str(raw)
                .map_err(|e| {
                    warn!(id = %self.id, error = %e, "Dropping unparsable context");
                })
                .ok()
        });

        Ok(LogEntry {
            id,
            timestamp,
            level,
            service: self.service,
            message: self.message,
            context,
            correlation_id: self.correlation_id,
            created_at,
        })
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
}

fn encode_context(entry: &LogEntry) -> Result<Option<String>> {
    entry
        .context
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(Error::from)
}

fn insert_row(conn: &Connection, entry: &LogEntry) -> Result<()> {
    let context = encode_context(entry)?;
    conn.execute(
        "INSERT INTO logs (id, timestamp, level, service, message, context, correlation_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.id.to_string(),
            format_timestamp(&entry.timestamp),
            entry.level.as_str(),
            entry.service,
            entry.message,
            context,
            entry.correlation_id,
            format_timestamp(&entry.created_at),
        ],
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            Error::Storage(StorageError::DuplicateId(entry.id))
        } else {
            Error::from(e)
        }
    })?;
    Ok(())
}

impl SqliteHotStore {
    /// Open (or create) the database at `path`. `:memory:` opens a private
    /// in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let conn = Connection::open(&path)?;
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            debug!(journal_mode = %mode, "Configured SQLite journal");
            conn
        };

        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "Opened SQLite hot store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await?
    }

    fn query_rows(
        conn: &Connection,
        sql: &str,
        params: Vec<String>,
    ) -> Result<Vec<LogEntry>> {
        let mut stmt = conn.prepare(sql)?;
        let raw = stmt
            .query_map(params_from_iter(params.iter()), RawLogRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(RawLogRow::decode).collect()
    }
}

#[async_trait]
impl HotStore for SqliteHotStore {
    async fn insert(&self, entry: &LogEntry) -> Result<()> {
        let entry = entry.clone();
        self.with_conn(move |conn| insert_row(conn, &entry)).await
    }

    async fn insert_batch(&self, entries: &[LogEntry]) -> Result<()> {
        let entries = entries.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for entry in &entries {
                // Dropping `tx` on error rolls the whole batch back
                insert_row(&tx, entry)?;
            }
            tx.commit()
                .map_err(|e| StorageError::Transaction(e.to_string()))?;
            debug!(count = entries.len(), "Committed batch to SQLite");
            Ok(())
        })
        .await
    }

    async fn query(&self, filter: &LogFilter) -> Result<Vec<LogEntry>> {
        let mut sql = format!("SELECT {} FROM logs WHERE service = ?", LOG_COLUMNS);
        let mut params = vec![filter.service.clone()];

        if let Some(level) = filter.level {
            sql.push_str(" AND level = ?");
            params.push(level.as_str().to_string());
        }
        // Stored values are whole milliseconds, so a sub-millisecond start
        // rounds up and an end bound truncates.
        if let Some(start) = filter.start_time {
            sql.push_str(" AND timestamp >= ?");
            params.push(format_timestamp(&ceil_to_millis(start)));
        }
        if let Some(end) = filter.end_time {
            sql.push_str(" AND timestamp <= ?");
            params.push(format_timestamp(&end));
        }
        if let Some(ref correlation_id) = filter.correlation_id {
            sql.push_str(" AND correlation_id = ?");
            params.push(correlation_id.clone());
        }

        self.with_conn(move |conn| Self::query_rows(conn, &sql, params))
            .await
    }

    async fn get_by_id(&self, id: Uuid, service: &str) -> Result<Option<LogEntry>> {
        let service = service.to_string();
        self.with_conn(move |conn| {
            let raw = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM logs WHERE id = ?1 AND service = ?2",
                        LOG_COLUMNS
                    ),
                    params![id.to_string(), service],
                    RawLogRow::from_row,
                )
                .optional()?;
            raw.map(RawLogRow::decode).transpose()
        })
        .await
    }

    async fn fetch_archivable(
        &self,
        service: &str,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LogEntry>> {
        let sql = format!(
            "SELECT {} FROM logs WHERE service = ? AND timestamp < ? \
             ORDER BY timestamp ASC, id ASC LIMIT {}",
            LOG_COLUMNS, limit
        );
        let params = vec![service.to_string(), format_timestamp(&cutoff)];
        self.with_conn(move |conn| Self::query_rows(conn, &sql, params))
            .await
    }

    async fn delete_by_ids(&self, ids: &[Uuid]) -> Result<usize> {
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt = tx.prepare("DELETE FROM logs WHERE id = ?1")?;
                for id in &ids {
                    removed += stmt.execute(params![id])?;
                }
            }
            tx.commit()
                .map_err(|e| StorageError::Transaction(e.to_string()))?;
            Ok(removed)
        })
        .await
    }

    async fn list_distinct_services(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT service FROM logs ORDER BY service")?;
            let services = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(services)
        })
        .await
    }

    async fn count(&self, service: Option<&str>) -> Result<u64> {
        let service = service.map(String::from);
        self.with_conn(move |conn| {
            let count: i64 = match service {
                Some(name) => conn.query_row(
                    "SELECT COUNT(*) FROM logs WHERE service = ?1",
                    params![name],
                    |row| row.get(0),
                )?,
                None => conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?,
            };
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn health_check(&self) -> Result<StoreHealth> {
        let start = Instant::now();
        match self.count(None).await {
            Ok(entry_count) => Ok(StoreHealth {
                is_healthy: true,
                response_time_ms: start.elapsed().as_millis() as u64,
                entry_count,
                backend: StorageBackend::Sqlite,
                message: None,
            }),
            Err(e) => Ok(StoreHealth {
                is_healthy: false,
                response_time_ms: start.elapsed().as_millis() as u64,
                entry_count: 0,
                backend: StorageBackend::Sqlite,
                message: Some(e.to_string()),
            }),
        }
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::Sqlite
    }
}

#[async_trait]
impl ServiceCatalog for SqliteHotStore {
    async fn create_service(&self, service: &Service) -> Result<()> {
        let service = service.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO services (id, name, api_key, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    service.id.to_string(),
                    service.name,
                    service.api_key,
                    format_timestamp(&service.created_at),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) && e.to_string().contains("services.name") {
                    Error::DuplicateServiceName(service.name.clone())
                } else {
                    Error::from(e)
                }
            })?;
            Ok(())
        })
        .await
    }

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Service>> {
        let api_key = api_key.to_string();
        self.with_conn(move |conn| {
            let raw = conn
                .query_row(
                    "SELECT id, name, api_key, created_at FROM services WHERE api_key = ?1",
                    params![api_key],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;

            raw.map(|(id, name, api_key, created_at)| decode_service(id, name, api_key, created_at))
                .transpose()
        })
        .await
    }

    async fn list_services(&self) -> Result<Vec<ServiceSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, api_key, created_at FROM services ORDER BY created_at DESC, name ASC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(id, name, api_key, created_at)| {
                    decode_service(id, name, api_key, created_at).map(|s| ServiceSummary::from(&s))
                })
                .collect()
        })
        .await
    }
}

fn decode_service(id: String, name: String, api_key: String, created_at: String) -> Result<Service> {
    let corrupt = |message: String| StorageError::CorruptRow {
        id: id.clone(),
        message,
    };
    Ok(Service {
        id: Uuid::parse_str(&id).map_err(|e| corrupt(e.to_string()))?,
        created_at: parse_timestamp(&created_at).map_err(|e| corrupt(e.to_string()))?,
        name,
        api_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::now_millis;
    use tempfile::TempDir;

    fn entry(service: &str, ts: &str) -> LogEntry {
        LogEntry {
            id: Uuid::new_v4(),
            timestamp: parse_timestamp(ts).unwrap(),
            level: Level::Warn,
            service: service.into(),
            message: "disk almost full".into(),
            context: Some(serde_json::json!({"disk": "/dev/sda1", "pct": 91})),
            correlation_id: Some("req-7".into()),
            created_at: now_millis(),
        }
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_fields() {
        let store = SqliteHotStore::open_in_memory().unwrap();
        let e = entry("svc", "2024-01-15T10:00:00.123Z");
        store.insert(&e).await.unwrap();

        let found = store.get_by_id(e.id, "svc").await.unwrap();
        assert_eq!(found, Some(e.clone()));
        assert!(store.get_by_id(e.id, "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = SqliteHotStore::open_in_memory().unwrap();
        let e = entry("svc", "2024-01-15T10:00:00Z");
        store.insert(&e).await.unwrap();
        let err = store.insert(&e).await.unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::DuplicateId(id)) if id == e.id));
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back() {
        let store = SqliteHotStore::open_in_memory().unwrap();
        let existing = entry("svc", "2024-01-15T10:00:00Z");
        store.insert(&existing).await.unwrap();

        let batch = vec![
            entry("svc", "2024-01-15T11:00:00Z"),
            entry("svc", "2024-01-15T12:00:00Z"),
            existing.clone(),
        ];
        assert!(store.insert_batch(&batch).await.is_err());
        assert_eq!(store.count(Some("svc")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_filters() {
        let store = SqliteHotStore::open_in_memory().unwrap();
        let mut info = entry("svc", "2024-01-15T10:00:00Z");
        info.level = Level::Info;
        info.correlation_id = None;
        let warn = entry("svc", "2024-01-15T12:00:00Z");
        store.insert_batch(&[info.clone(), warn.clone()]).await.unwrap();
        store
            .insert(&entry("other", "2024-01-15T12:00:00Z"))
            .await
            .unwrap();

        let mut filter = LogFilter::for_service("svc");
        assert_eq!(store.query(&filter).await.unwrap().len(), 2);

        filter.level = Some(Level::Warn);
        assert_eq!(store.query(&filter).await.unwrap(), vec![warn.clone()]);

        let mut filter = LogFilter::for_service("svc");
        filter.start_time = Some(parse_timestamp("2024-01-15T11:00:00Z").unwrap());
        assert_eq!(store.query(&filter).await.unwrap(), vec![warn.clone()]);

        let mut filter = LogFilter::for_service("svc");
        filter.end_time = Some(info.timestamp);
        assert_eq!(store.query(&filter).await.unwrap(), vec![info.clone()]);

        let mut filter = LogFilter::for_service("svc");
        filter.correlation_id = Some("req-7".into());
        assert_eq!(store.query(&filter).await.unwrap(), vec![warn]);
    }

    #[tokio::test]
    async fn test_corrupt_context_is_nulled() {
        let store = SqliteHotStore::open_in_memory().unwrap();
        let e = entry("svc", "2024-01-15T10:00:00Z");
        store.insert(&e).await.unwrap();

        let id = e.id.to_string();
        store
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE logs SET context = '{not json' WHERE id = ?1",
                    params![id],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let found = store.get_by_id(e.id, "svc").await.unwrap().unwrap();
        assert!(found.context.is_none());
        assert_eq!(found.message, e.message);
    }

    #[tokio::test]
    async fn test_fetch_archivable_order_and_delete() {
        let store = SqliteHotStore::open_in_memory().unwrap();
        let late = entry("svc", "2024-01-15T18:00:00Z");
        let early = entry("svc", "2024-01-14T06:00:00Z");
        let fresh = entry("svc", "2024-01-20T06:00:00Z");
        store
            .insert_batch(&[late.clone(), early.clone(), fresh.clone()])
            .await
            .unwrap();

        let cutoff = parse_timestamp("2024-01-16T00:00:00Z").unwrap();
        let batch = store.fetch_archivable("svc", cutoff, 100).await.unwrap();
        assert_eq!(batch, vec![early.clone(), late.clone()]);

        let removed = store.delete_by_ids(&[early.id, late.id]).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count(None).await.unwrap(), 1);
        assert_eq!(
            store.list_distinct_services().await.unwrap(),
            vec!["svc".to_string()]
        );
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("logs.db");
        let e = entry("svc", "2024-01-15T10:00:00Z");
        {
            let store = SqliteHotStore::open(&path).unwrap();
            store.insert(&e).await.unwrap();
        }

        let store = SqliteHotStore::open(&path).unwrap();
        assert_eq!(store.count(None).await.unwrap(), 1);
        assert!(store.health_check().await.unwrap().is_healthy);
    }

    #[tokio::test]
    async fn test_service_catalog() {
        let store = SqliteHotStore::open_in_memory().unwrap();
        let service = Service {
            id: Uuid::new_v4(),
            name: "billing".into(),
            api_key: "sk_abc".into(),
            created_at: now_millis(),
        };
        store.create_service(&service).await.unwrap();

        let clash = Service {
            id: Uuid::new_v4(),
            api_key: "sk_def".into(),
            ..service.clone()
        };
        assert!(matches!(
            store.create_service(&clash).await,
            Err(Error::DuplicateServiceName(_))
        ));

        assert_eq!(
            store.find_by_api_key("sk_abc").await.unwrap(),
            Some(service)
        );
        assert!(store.find_by_api_key("sk_missing").await.unwrap().is_none());
        assert_eq!(store.list_services().await.unwrap().len(), 1);
    }
}
