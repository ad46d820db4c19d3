//! Background maintenance for the archive tier.
//!
//! - **Archive**: migrate aged hot entries into date partitions
//! - **Sweep**: delete date partitions past the retention window

mod jobs;
mod scheduler;

pub use jobs::{ArchiveJob, SweepJob, ARCHIVE_JOB, SWEEP_JOB};
pub use scheduler::{MaintenanceJob, MaintenanceScheduler, ScheduledJob, TaskInfo, TaskStatus};
