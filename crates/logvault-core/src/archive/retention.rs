//! Retention sweep over archive date partitions.
//!
//! Whole date directories older than the retention window are removed.
//! Each directory is deleted independently: one failure is recorded and
//! the sweep moves on to the next directory.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::layout::PartitionLayout;
use crate::metrics::VaultMetrics;
use crate::model::{epoch, start_of_day};
use crate::Result;

/// A date directory that could not be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepResult {
    /// Date partitions deleted
    pub deleted: usize,
    /// Directories that were eligible but could not be deleted
    pub failed: Vec<SweepFailure>,
}

/// Deletes archive date partitions older than the retention window.
pub struct RetentionSweeper {
    layout: PartitionLayout,
    retention_days: u32,
    metrics: Option<Arc<VaultMetrics>>,
}

impl RetentionSweeper {
    /// Create a new sweeper.
    pub fn new(layout: PartitionLayout, retention_days: u32) -> Self {
        Self {
            layout,
            retention_days,
            metrics: None,
        }
    }

    /// Record deletions in the given metrics.
    pub fn with_metrics(mut self, metrics: Arc<VaultMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Retention window in days.
    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Sweep relative to the current instant.
    pub async fn sweep(&self) -> Result<SweepResult> {
        self.sweep_as_of(Utc::now()).await
    }

    /// Delete every date directory whose midnight (UTC) lies before
    /// `now - retention_days`.
    pub async fn sweep_as_of(&self, now: DateTime<Utc>) -> Result<SweepResult> {
        let start = Instant::now();
        let threshold = now
            .checked_sub_signed(Duration::days(i64::from(self.retention_days)))
            .unwrap_or_else(epoch);

        debug!(threshold = %threshold, "Starting retention sweep");

        let mut result = SweepResult::default();
        for dir in self.layout.list_dates().await? {
            if start_of_day(dir.date) >= threshold {
                continue;
            }

            match tokio::fs::remove_dir_all(&dir.path).await {
                Ok(()) => {
                    debug!(path = %dir.path.display(), "Deleted archive partition");
                    result.deleted += 1;
                }
                Err(e) => {
                    warn!(path = %dir.path.display(), error = %e, "Failed to delete archive partition");
                    result.failed.push(SweepFailure {
                        path: dir.path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Some(ref metrics) = self.metrics {
            metrics.record_swept(result.deleted);
        }

        info!(
            deleted = result.deleted,
            failed = result.failed.len(),
            retention_days = self.retention_days,
            duration_ms = start.elapsed().as_millis() as u64,
            "Retention sweep completed"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_timestamp;
    use tempfile::TempDir;

    fn setup(dirs: &[&str]) -> (TempDir, PartitionLayout) {
        let dir = TempDir::new().unwrap();
        for name in dirs {
            let path = dir.path().join(name);
            std::fs::create_dir_all(&path).unwrap();
            std::fs::write(path.join("svc.jsonl"), b"{}\n").unwrap();
        }
        let layout = PartitionLayout::new(dir.path());
        (dir, layout)
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_expired() {
        let (dir, layout) = setup(&["2024-01-01", "2024-01-20", "2024-01-31", "notes"]);
        let sweeper = RetentionSweeper::new(layout, 10);

        let result = sweeper
            .sweep_as_of(parse_timestamp("2024-01-31T09:00:00Z").unwrap())
            .await
            .unwrap();

        assert_eq!(result.deleted, 2);
        assert!(result.failed.is_empty());
        assert!(!dir.path().join("2024-01-01").exists());
        assert!(!dir.path().join("2024-01-20").exists());
        assert!(dir.path().join("2024-01-31").exists());
        assert!(dir.path().join("notes").exists());
    }

    #[tokio::test]
    async fn test_day_at_window_edge_is_deleted_after_midnight() {
        let (dir, layout) = setup(&["2024-01-22", "2024-01-21", "2024-01-20"]);
        let sweeper = RetentionSweeper::new(layout, 10);

        let result = sweeper
            .sweep_as_of(parse_timestamp("2024-01-31T00:00:01Z").unwrap())
            .await
            .unwrap();

        assert_eq!(result.deleted, 2);
        assert!(dir.path().join("2024-01-22").exists());
        assert!(!dir.path().join("2024-01-21").exists());
        assert!(!dir.path().join("2024-01-20").exists());
    }

    #[tokio::test]
    async fn test_day_at_window_edge_kept_at_exact_midnight() {
        let (dir, layout) = setup(&["2024-01-21", "2024-01-20"]);
        let sweeper = RetentionSweeper::new(layout, 10);

        let result = sweeper
            .sweep_as_of(parse_timestamp("2024-01-31T00:00:00Z").unwrap())
            .await
            .unwrap();

        assert_eq!(result.deleted, 1);
        assert!(dir.path().join("2024-01-21").exists());
        assert!(!dir.path().join("2024-01-20").exists());
    }

    #[tokio::test]
    async fn test_sweep_twice_is_noop() {
        let (_dir, layout) = setup(&["2020-01-01"]);
        let sweeper = RetentionSweeper::new(layout, 30);
        assert_eq!(sweeper.sweep().await.unwrap().deleted, 1);
        assert_eq!(sweeper.sweep().await.unwrap().deleted, 0);
    }

    #[tokio::test]
    async fn test_missing_root() {
        let dir = TempDir::new().unwrap();
        let sweeper = RetentionSweeper::new(PartitionLayout::new(dir.path().join("none")), 30);
        assert_eq!(sweeper.sweep().await.unwrap(), SweepResult::default());
    }
}
