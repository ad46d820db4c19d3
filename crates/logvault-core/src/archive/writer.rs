//! Migration of aged hot entries into date partitions.
//!
//! ## Migration Strategy
//!
//! 1. **Cutoff**: midnight UTC of `today - days_old`
//! 2. **Fetch**: per service, the oldest `batch_size` entries before the cutoff
//! 3. **Group**: by the UTC calendar date of each entry's timestamp
//! 4. **Append**: one JSON line per entry to `{date}/{service}.jsonl`
//! 5. **Delete**: exactly the appended ids from the hot store
//!
//! Append happens before delete, so a crash in between leaves the entry in
//! both tiers. The query merger removes such duplicates by id.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::layout::PartitionLayout;
use crate::error::ArchiveError;
use crate::hot::HotStore;
use crate::metrics::VaultMetrics;
use crate::model::{start_of_day, LogEntry};
use crate::{Error, Result};

/// One partition written during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionWrite {
    pub date: NaiveDate,
    pub service: String,
    pub count: usize,
}

/// Outcome of one archive run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveRunResult {
    /// Entries moved from the hot store to the archive
    pub archived: usize,
    /// Partitions appended to, in write order
    pub partitions: Vec<PartitionWrite>,
}

/// Moves entries older than a cutoff from the hot store into the archive.
pub struct ArchiveWriter {
    hot: Arc<dyn HotStore>,
    layout: PartitionLayout,
    batch_size: usize,
    /// Serializes whole runs, and with them every partition append
    run_lock: Mutex<()>,
    metrics: Option<Arc<VaultMetrics>>,
}

impl ArchiveWriter {
    /// Create a new writer.
    pub fn new(hot: Arc<dyn HotStore>, layout: PartitionLayout, batch_size: usize) -> Self {
        Self {
            hot,
            layout,
            batch_size: batch_size.max(1),
            run_lock: Mutex::new(()),
            metrics: None,
        }
    }

    /// Record migrations in the given metrics.
    pub fn with_metrics(mut self, metrics: Arc<VaultMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Archive entries at least `days_old` whole days old.
    pub async fn archive(&self, days_old: u32) -> Result<ArchiveRunResult> {
        self.archive_before(cutoff_for(Utc::now(), days_old)).await
    }

    /// Archive every hot entry with `timestamp < cutoff`, one batch per service.
    pub async fn archive_before(&self, cutoff: DateTime<Utc>) -> Result<ArchiveRunResult> {
        let _run = self.run_lock.lock().await;
        let start = Instant::now();

        debug!(cutoff = %cutoff, batch_size = self.batch_size, "Starting archive run");

        let services = self.hot.list_distinct_services().await?;
        let mut result = ArchiveRunResult::default();

        for service in services {
            if let Err(e) = self.archive_service(&service, cutoff, &mut result).await {
                warn!(
                    service = %service,
                    archived = result.archived,
                    error = %e,
                    "Archive run aborted"
                );
                return Err(e);
            }
        }

        info!(
            archived = result.archived,
            partitions = result.partitions.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Archive run completed"
        );

        Ok(result)
    }

    async fn archive_service(
        &self,
        service: &str,
        cutoff: DateTime<Utc>,
        result: &mut ArchiveRunResult,
    ) -> Result<()> {
        let batch = self
            .hot
            .fetch_archivable(service, cutoff, self.batch_size)
            .await?;
        if batch.is_empty() {
            return Ok(());
        }

        for (date, entries) in group_by_date(batch) {
            let path = self.layout.partition_path(date, service);
            self.append_partition(&path, &entries)
                .await
                .map_err(|e| migration_error(service, e))?;

            let ids: Vec<Uuid> = entries.iter().map(|e| e.id).collect();
            self.hot
                .delete_by_ids(&ids)
                .await
                .map_err(|e| migration_error(service, e))?;

            debug!(
                service = %service,
                date = %date,
                count = entries.len(),
                path = %path.display(),
                "Archived partition"
            );

            if let Some(ref metrics) = self.metrics {
                metrics.record_archived(entries.len());
            }
            result.archived += entries.len();
            result.partitions.push(PartitionWrite {
                date,
                service: service.to_string(),
                count: entries.len(),
            });
        }

        Ok(())
    }

    /// Append entries as JSON lines. The file is only ever opened for append.
    ///
    /// Callers hold `run_lock`.
    async fn append_partition(&self, path: &Path, entries: &[LogEntry]) -> Result<()> {
        let mut buf = Vec::with_capacity(entries.len() * 256);
        for entry in entries {
            serde_json::to_writer(&mut buf, entry)?;
            buf.push(b'\n');
        }

        let append_err = |e: std::io::Error| -> Error {
            ArchiveError::Append {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
            .into()
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(append_err)?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(append_err)?;
        file.write_all(&buf).await.map_err(append_err)?;
        file.flush().await.map_err(append_err)?;
        // Durable before the hot copies are deleted
        file.sync_data().await.map_err(append_err)?;

        Ok(())
    }
}

/// Midnight UTC of `now - days_old` days.
pub fn cutoff_for(now: DateTime<Utc>, days_old: u32) -> DateTime<Utc> {
    let today = now.date_naive();
    let date = today
        .checked_sub_days(Days::new(u64::from(days_old)))
        .unwrap_or(NaiveDate::MIN);
    start_of_day(date)
}

/// Group entries by UTC calendar date, preserving order within each date.
fn group_by_date(entries: Vec<LogEntry>) -> BTreeMap<NaiveDate, Vec<LogEntry>> {
    let mut groups: BTreeMap<NaiveDate, Vec<LogEntry>> = BTreeMap::new();
    for entry in entries {
        groups.entry(entry.partition_date()).or_default().push(entry);
    }
    groups
}

fn migration_error(service: &str, err: Error) -> Error {
    match err {
        Error::Archive(ArchiveError::Append { .. }) => err,
        other => ArchiveError::Migration {
            service: service.to_string(),
            message: other.to_string(),
        }
        .into(),
    }
}
