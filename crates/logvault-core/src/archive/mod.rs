//! Cold archive tier: append-only JSON-lines partitions by date and service.

mod layout;
mod reader;
mod retention;
mod writer;

pub use layout::{format_date, parse_date, DateDir, PartitionLayout};
pub use reader::{ArchiveFilter, ArchiveReader, ArchiveScan, SkipReason, SkippedPartition};
pub use retention::{RetentionSweeper, SweepFailure, SweepResult};
pub use writer::{cutoff_for, ArchiveRunResult, ArchiveWriter, PartitionWrite};
