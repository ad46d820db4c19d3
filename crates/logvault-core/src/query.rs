//! Merged queries across the hot store and the archive.
//!
//! Both tiers are read concurrently. Results are keyed by entry id with
//! archive rows inserted first, so the hot copy of an entry present in
//! both tiers wins. The merged list is sorted newest first and then paged.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::archive::{ArchiveFilter, ArchiveReader};
use crate::config::QueryConfig;
use crate::error::ValidationError;
use crate::hot::{HotStore, LogFilter};
use crate::metrics::VaultMetrics;
use crate::model::{parse_timestamp, Level, LogEntry};
use crate::{Error, Result};

/// Caller query parameters (wire shape).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// Pre-merge row counts per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCounts {
    pub database: usize,
    pub archived: usize,
}

/// One page of merged results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPage {
    pub logs: Vec<LogEntry>,
    /// Matching entries after dedup, across both tiers
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub sources: SourceCounts,
}

/// Combines hot store and archive results into pages.
pub struct QueryMerger {
    hot: Arc<dyn HotStore>,
    reader: Arc<ArchiveReader>,
    config: QueryConfig,
    metrics: Option<Arc<VaultMetrics>>,
}

impl QueryMerger {
    /// Create a new merger.
    pub fn new(hot: Arc<dyn HotStore>, reader: Arc<ArchiveReader>, config: QueryConfig) -> Self {
        Self {
            hot,
            reader,
            config,
            metrics: None,
        }
    }

    /// Record query outcomes in the given metrics.
    pub fn with_metrics(mut self, metrics: Arc<VaultMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Query `service`'s entries across both tiers.
    pub async fn query_logs(&self, service: &str, query: &LogQuery) -> Result<QueryPage> {
        let start = Instant::now();
        let result = self.run(service, query).await;

        if let Some(ref metrics) = self.metrics {
            metrics.record_query(start.elapsed(), result.as_ref().err());
        }
        result
    }

    async fn run(&self, service: &str, query: &LogQuery) -> Result<QueryPage> {
        let filter = self.build_filter(service, query)?;
        let limit = query
            .limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit.max(1));
        let offset = query.offset.unwrap_or(0);
        let archive_max = limit
            .saturating_add(offset)
            .saturating_mul(2)
            .max(self.config.min_archive_scan);

        let archive_filter = ArchiveFilter {
            level: filter.level,
            correlation_id: filter.correlation_id.clone(),
        };

        let deadline = Duration::from_millis(self.config.timeout_ms);
        let (hot, scan) = tokio::time::timeout(deadline, async {
            tokio::join!(
                self.hot.query(&filter),
                self.reader.read(
                    service,
                    filter.start_time,
                    filter.end_time,
                    &archive_filter,
                    Some(archive_max),
                )
            )
        })
        .await
        .map_err(|_| Error::Timeout(deadline))?;

        // The hot store is authoritative; its failure fails the query
        let hot = hot?;

        for skipped in &scan.skipped {
            warn!(
                service = %service,
                path = %skipped.path.display(),
                reason = %skipped.reason,
                "Archive partition left out of query"
            );
        }

        let sources = SourceCounts {
            database: hot.len(),
            archived: scan.entries.len(),
        };

        let mut merged: HashMap<_, LogEntry> = HashMap::with_capacity(hot.len() + scan.entries.len());
        for entry in scan.entries {
            merged.insert(entry.id, entry);
        }
        for entry in hot {
            merged.insert(entry.id, entry);
        }

        let mut logs: Vec<LogEntry> = merged.into_values().collect();
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        let total = logs.len();
        let logs: Vec<LogEntry> = logs.into_iter().skip(offset).take(limit).collect();

        debug!(
            service = %service,
            total = total,
            returned = logs.len(),
            database = sources.database,
            archived = sources.archived,
            "Merged query"
        );

        Ok(QueryPage {
            logs,
            total,
            limit,
            offset,
            sources,
        })
    }

    fn build_filter(&self, service: &str, query: &LogQuery) -> Result<LogFilter> {
        let level = match non_blank(&query.level) {
            Some(raw) => Some(raw.parse::<Level>()?),
            None => None,
        };
        let start_time = non_blank(&query.start_time)
            .map(parse_timestamp)
            .transpose()?;
        let end_time = non_blank(&query.end_time).map(parse_timestamp).transpose()?;

        if let (Some(s), Some(e)) = (start_time, end_time) {
            if s > e {
                return Err(ValidationError::InvalidParameter {
                    name: "start_time",
                    message: "must not be after end_time".into(),
                }
                .into());
            }
        }

        Ok(LogFilter {
            service: service.to_string(),
            level,
            start_time,
            end_time,
            correlation_id: non_blank(&query.correlation_id).map(String::from),
        })
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::PartitionLayout;
    use crate::hot::MemoryHotStore;
    use crate::model::{format_timestamp, now_millis};
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use uuid::Uuid;

    fn entry(service: &str, level: Level, ts: DateTime<Utc>, message: &str) -> LogEntry {
        LogEntry {
            id: Uuid::new_v4(),
            timestamp: ts,
            level,
            service: service.into(),
            message: message.into(),
            context: None,
            correlation_id: None,
            created_at: ts,
        }
    }

    async fn append(layout: &PartitionLayout, entries: &[LogEntry]) {
        for e in entries {
            let path = layout.partition_path(e.partition_date(), &e.service);
            tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .unwrap();
            let mut line = serde_json::to_vec(e).unwrap();
            line.push(b'\n');
            file.write_all(&line).await.unwrap();
        }
    }

    fn merger(dir: &TempDir, hot: Arc<MemoryHotStore>) -> (QueryMerger, PartitionLayout) {
        let layout = PartitionLayout::new(dir.path());
        let reader = Arc::new(ArchiveReader::new(layout.clone(), 1024 * 1024));
        (QueryMerger::new(hot, reader, QueryConfig::default()), layout)
    }

    #[tokio::test]
    async fn test_merge_dedups_with_hot_winning() {
        let dir = TempDir::new().unwrap();
        let hot = Arc::new(MemoryHotStore::new());
        let (merger, layout) = merger(&dir, hot.clone());

        let now = now_millis();
        let shared = entry("svc", Level::Info, now - ChronoDuration::days(2), "hot copy");
        let mut archived_copy = shared.clone();
        archived_copy.message = "archived copy".into();
        let old = entry("svc", Level::Error, now - ChronoDuration::days(3), "only archived");

        hot.insert(&shared).await.unwrap();
        append(&layout, &[archived_copy, old.clone()]).await;

        let page = merger.query_logs("svc", &LogQuery::default()).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.sources.database, 1);
        assert_eq!(page.sources.archived, 2);
        assert_eq!(page.logs[0].id, shared.id);
        assert_eq!(page.logs[0].message, "hot copy");
        assert_eq!(page.logs[1].id, old.id);
    }

    #[tokio::test]
    async fn test_pagination_and_limit_clamp() {
        let dir = TempDir::new().unwrap();
        let hot = Arc::new(MemoryHotStore::new());
        let (merger, _) = merger(&dir, hot.clone());

        let now = now_millis();
        for i in 0..5 {
            hot.insert(&entry(
                "svc",
                Level::Info,
                now - ChronoDuration::minutes(i),
                &format!("m{}", i),
            ))
            .await
            .unwrap();
        }

        let query = LogQuery {
            limit: Some(2),
            offset: Some(1),
            ..Default::default()
        };
        let page = merger.query_logs("svc", &query).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.limit, 2);
        assert_eq!(page.offset, 1);
        let messages: Vec<_> = page.logs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["m1", "m2"]);

        let query = LogQuery {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(merger.query_logs("svc", &query).await.unwrap().limit, 1);

        let query = LogQuery {
            limit: Some(50_000),
            ..Default::default()
        };
        assert_eq!(merger.query_logs("svc", &query).await.unwrap().limit, 1000);

        let query = LogQuery {
            offset: Some(10),
            ..Default::default()
        };
        let page = merger.query_logs("svc", &query).await.unwrap();
        assert!(page.logs.is_empty());
        assert_eq!(page.total, 5);
    }

    #[tokio::test]
    async fn test_filters_apply_to_both_tiers() {
        let dir = TempDir::new().unwrap();
        let hot = Arc::new(MemoryHotStore::new());
        let (merger, layout) = merger(&dir, hot.clone());

        let now = now_millis();
        hot.insert(&entry("svc", Level::Error, now, "hot error"))
            .await
            .unwrap();
        hot.insert(&entry("svc", Level::Info, now, "hot info"))
            .await
            .unwrap();
        append(
            &layout,
            &[
                entry("svc", Level::Error, now - ChronoDuration::days(2), "old error"),
                entry("svc", Level::Info, now - ChronoDuration::days(2), "old info"),
            ],
        )
        .await;

        let query = LogQuery {
            level: Some("ERROR".into()),
            ..Default::default()
        };
        let page = merger.query_logs("svc", &query).await.unwrap();
        assert_eq!(page.total, 2);
        assert!(page.logs.iter().all(|e| e.level == Level::Error));

        let query = LogQuery {
            start_time: Some(format_timestamp(&(now - ChronoDuration::hours(1)))),
            ..Default::default()
        };
        let page = merger.query_logs("svc", &query).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.sources.archived, 0);
    }

    #[tokio::test]
    async fn test_invalid_parameters() {
        let dir = TempDir::new().unwrap();
        let (merger, _) = merger(&dir, Arc::new(MemoryHotStore::new()));

        let query = LogQuery {
            level: Some("verbose".into()),
            ..Default::default()
        };
        assert!(matches!(
            merger.query_logs("svc", &query).await,
            Err(Error::Validation(ValidationError::InvalidLevel(_)))
        ));

        let query = LogQuery {
            start_time: Some("yesterday".into()),
            ..Default::default()
        };
        assert!(matches!(
            merger.query_logs("svc", &query).await,
            Err(Error::Validation(ValidationError::InvalidTimestamp(_)))
        ));

        let query = LogQuery {
            start_time: Some("2024-02-01T00:00:00Z".into()),
            end_time: Some("2024-01-01T00:00:00Z".into()),
            ..Default::default()
        };
        assert!(matches!(
            merger.query_logs("svc", &query).await,
            Err(Error::Validation(ValidationError::InvalidParameter { .. }))
        ));
    }

    #[tokio::test]
    async fn test_metrics_recorded() {
        let dir = TempDir::new().unwrap();
        let metrics = Arc::new(VaultMetrics::new().unwrap());
        let (merger, _) = merger(&dir, Arc::new(MemoryHotStore::new()));
        let merger = merger.with_metrics(metrics.clone());

        merger.query_logs("svc", &LogQuery::default()).await.unwrap();
        let bad = LogQuery {
            level: Some("nope".into()),
            ..Default::default()
        };
        let _ = merger.query_logs("svc", &bad).await;

        assert_eq!(metrics.queries(), 2);
        assert_eq!(
            metrics.query_failures(crate::metrics::ErrorType::Validation),
            1
        );
    }
}
