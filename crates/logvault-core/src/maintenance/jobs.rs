//! Archive and retention jobs for the scheduler.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::scheduler::MaintenanceJob;
use crate::archive::{ArchiveWriter, RetentionSweeper};
use crate::Result;

/// Scheduler name of [`ArchiveJob`].
pub const ARCHIVE_JOB: &str = "archive";
/// Scheduler name of [`SweepJob`].
pub const SWEEP_JOB: &str = "sweep";

/// Moves entries older than `days_old` days into the archive.
pub struct ArchiveJob {
    writer: Arc<ArchiveWriter>,
    days_old: u32,
}

impl ArchiveJob {
    pub fn new(writer: Arc<ArchiveWriter>, days_old: u32) -> Self {
        Self { writer, days_old }
    }
}

#[async_trait]
impl MaintenanceJob for ArchiveJob {
    fn name(&self) -> &str {
        ARCHIVE_JOB
    }

    async fn run(&self) -> Result<usize> {
        Ok(self.writer.archive(self.days_old).await?.archived)
    }
}

/// Deletes archive date partitions past retention.
pub struct SweepJob {
    sweeper: Arc<RetentionSweeper>,
}

impl SweepJob {
    pub fn new(sweeper: Arc<RetentionSweeper>) -> Self {
        Self { sweeper }
    }
}

#[async_trait]
impl MaintenanceJob for SweepJob {
    fn name(&self) -> &str {
        SWEEP_JOB
    }

    async fn run(&self) -> Result<usize> {
        let result = self.sweeper.sweep().await?;
        for failure in &result.failed {
            warn!(path = %failure.path.display(), reason = %failure.reason, "Partition not swept");
        }
        Ok(result.deleted)
    }
}
