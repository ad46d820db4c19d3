//! On-disk layout of the archive: `{root}/{YYYY-MM-DD}/{service}.jsonl`.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ArchiveError;
use crate::Result;

const DATE_FORMAT: &str = "%Y-%m-%d";
const PARTITION_EXTENSION: &str = "jsonl";

/// Maps `(date, service)` to partition files under one root directory.
#[derive(Debug, Clone)]
pub struct PartitionLayout {
    root: PathBuf,
}

/// A date directory found under the archive root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateDir {
    pub date: NaiveDate,
    pub path: PathBuf,
}

impl PartitionLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Archive root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every partition of one date.
    pub fn date_dir(&self, date: NaiveDate) -> PathBuf {
        self.root.join(format_date(date))
    }

    /// Partition file for one service on one date.
    pub fn partition_path(&self, date: NaiveDate, service: &str) -> PathBuf {
        self.date_dir(date)
            .join(format!("{}.{}", service, PARTITION_EXTENSION))
    }

    /// Date directories under the root, oldest first.
    ///
    /// A missing root yields an empty list. Entries whose names are not
    /// canonical `YYYY-MM-DD` dates are ignored.
    pub async fn list_dates(&self) -> Result<Vec<DateDir>> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ArchiveError::Read {
                    path: self.root.clone(),
                    message: e.to_string(),
                }
                .into())
            }
        };

        let mut dates = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().and_then(parse_date) {
                Some(date) => dates.push(DateDir {
                    date,
                    path: entry.path(),
                }),
                None => debug!(name = ?name, "Ignoring non-date archive directory"),
            }
        }

        dates.sort_by_key(|d| d.date);
        Ok(dates)
    }
}

/// `YYYY-MM-DD`.
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a canonical `YYYY-MM-DD` name; anything else is `None`.
pub fn parse_date(name: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(name, DATE_FORMAT)
        .ok()
        .filter(|date| format_date(*date) == name)
}
