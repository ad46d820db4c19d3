//! Best-effort streaming reads over archive partitions.
//!
//! The reader never fails: unreadable or oversize partitions are skipped
//! and reported in [`ArchiveScan::skipped`], malformed lines are counted
//! and dropped. Archived history is auxiliary to the hot tier.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use super::layout::PartitionLayout;
use crate::metrics::VaultMetrics;
use crate::model::{epoch, Level, LogEntry};

/// Predicates applied to archived entries besides the time range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveFilter {
    pub level: Option<Level>,
    pub correlation_id: Option<String>,
}

/// Why a partition was left out of a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// File above the configured size ceiling
    Oversize { size_bytes: u64, limit_bytes: u64 },
    /// I/O failure while opening or reading
    Unreadable { message: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Oversize {
                size_bytes,
                limit_bytes,
            } => write!(f, "{} bytes exceeds {} byte limit", size_bytes, limit_bytes),
            SkipReason::Unreadable { message } => write!(f, "unreadable: {}", message),
        }
    }
}

/// A partition excluded from results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPartition {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// Result of an archive read.
#[derive(Debug, Clone, Default)]
pub struct ArchiveScan {
    /// Matching entries, newest first
    pub entries: Vec<LogEntry>,
    /// Partitions that could not be used
    pub skipped: Vec<SkippedPartition>,
    /// Lines that did not decode
    pub malformed_lines: usize,
}

/// Streams matching entries out of archive partitions.
pub struct ArchiveReader {
    layout: PartitionLayout,
    max_partition_bytes: u64,
    metrics: Option<Arc<VaultMetrics>>,
}

enum FileOutcome {
    Read { entries: Vec<LogEntry>, malformed: usize },
    Missing,
    Skipped(SkipReason),
}

impl ArchiveReader {
    /// Create a new reader.
    pub fn new(layout: PartitionLayout, max_partition_bytes: u64) -> Self {
        Self {
            layout,
            max_partition_bytes,
            metrics: None,
        }
    }

    /// Record skips and malformed lines in the given metrics.
    pub fn with_metrics(mut self, metrics: Arc<VaultMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Read `service` entries within `[start, end]` (defaults: epoch, now).
    ///
    /// Dates are visited newest first. Once `max_results` entries are
    /// collected the scan stops, keeping the most recent history.
    pub async fn read(
        &self,
        service: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        filter: &ArchiveFilter,
        max_results: Option<usize>,
    ) -> ArchiveScan {
        let start = start.unwrap_or_else(epoch);
        let end = end.unwrap_or_else(Utc::now);
        let mut scan = ArchiveScan::default();

        if start > end || max_results == Some(0) {
            return scan;
        }

        let dates = match self.layout.list_dates().await {
            Ok(dates) => dates,
            Err(e) => {
                warn!(root = %self.layout.root().display(), error = %e, "Archive root unreadable");
                self.skip(
                    &mut scan,
                    self.layout.root().to_path_buf(),
                    SkipReason::Unreadable {
                        message: e.to_string(),
                    },
                );
                return scan;
            }
        };

        let (first, last) = (start.date_naive(), end.date_naive());
        for dir in dates
            .into_iter()
            .rev()
            .filter(|d| d.date >= first && d.date <= last)
        {
            let path = self.layout.partition_path(dir.date, service);
            let remaining = max_results.map(|max| max.saturating_sub(scan.entries.len()));

            match self
                .read_partition(&path, service, start, end, filter, remaining)
                .await
            {
                FileOutcome::Missing => continue,
                FileOutcome::Skipped(reason) => self.skip(&mut scan, path, reason),
                FileOutcome::Read { entries, malformed } => {
                    debug!(
                        path = %path.display(),
                        matched = entries.len(),
                        malformed = malformed,
                        "Scanned archive partition"
                    );
                    scan.entries.extend(entries);
                    scan.malformed_lines += malformed;
                    if malformed > 0 {
                        if let Some(ref metrics) = self.metrics {
                            metrics.record_malformed_lines(malformed);
                        }
                    }
                }
            }

            if max_results.is_some_and(|max| scan.entries.len() >= max) {
                break;
            }
        }

        scan.entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        scan
    }

    fn skip(&self, scan: &mut ArchiveScan, path: PathBuf, reason: SkipReason) {
        warn!(path = %path.display(), reason = %reason, "Skipping archive partition");
        if let Some(ref metrics) = self.metrics {
            metrics.record_partition_skipped();
        }
        scan.skipped.push(SkippedPartition { path, reason });
    }

    async fn read_partition(
        &self,
        path: &Path,
        service: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &ArchiveFilter,
        limit: Option<usize>,
    ) -> FileOutcome {
        let unreadable = |e: std::io::Error| {
            FileOutcome::Skipped(SkipReason::Unreadable {
                message: e.to_string(),
            })
        };

        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return FileOutcome::Missing,
            Err(e) => return unreadable(e),
        };
        if meta.len() > self.max_partition_bytes {
            return FileOutcome::Skipped(SkipReason::Oversize {
                size_bytes: meta.len(),
                limit_bytes: self.max_partition_bytes,
            });
        }

        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) => return unreadable(e),
        };

        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        let mut entries = Vec::new();
        let mut malformed = 0;
        let mut line_no = 0usize;

        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => return unreadable(e),
            }
            line_no += 1;

            let trimmed = trim_line(&line);
            if trimmed.is_empty() {
                continue;
            }

            let entry: LogEntry = match serde_json::from_slice(trimmed) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        line = line_no,
                        error = %e,
                        "Skipping malformed archive line"
                    );
                    malformed += 1;
                    continue;
                }
            };

            if entry.service == service
                && entry.timestamp >= start
                && entry.timestamp <= end
                && filter.level.map_or(true, |l| entry.level == l)
                && filter
                    .correlation_id
                    .as_deref()
                    .map_or(true, |c| entry.correlation_id.as_deref() == Some(c))
            {
                entries.push(entry);
                if limit.is_some_and(|max| entries.len() >= max) {
                    break;
                }
            }
        }

        FileOutcome::Read { entries, malformed }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end.max(start)]
}
