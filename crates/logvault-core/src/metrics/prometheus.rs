//! Prometheus metrics export.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

use crate::{Error, Result};

/// Query duration buckets in seconds.
const QUERY_DURATION_BUCKETS: [f64; 9] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0];

/// Error types for labeled metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Bad caller input
    Validation,
    /// Hot store failures
    Storage,
    /// Archive tier failures
    Archive,
    /// Missing or rejected credentials
    Auth,
    /// Deadline exceeded
    Timeout,
    /// Unknown/other errors
    Other,
}

impl ErrorType {
    /// Get the label value for Prometheus export.
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorType::Validation => "validation",
            ErrorType::Storage => "storage",
            ErrorType::Archive => "archive",
            ErrorType::Auth => "auth",
            ErrorType::Timeout => "timeout",
            ErrorType::Other => "other",
        }
    }

    /// Classify an error.
    pub fn of(err: &Error) -> Self {
        match err {
            Error::Validation(_) | Error::BatchRejected(_) => ErrorType::Validation,
            Error::Storage(_) | Error::DuplicateServiceName(_) => ErrorType::Storage,
            Error::Archive(_) | Error::Io(_) => ErrorType::Archive,
            Error::Auth(_) => ErrorType::Auth,
            Error::Timeout(_) => ErrorType::Timeout,
            _ => ErrorType::Other,
        }
    }
}

/// Engine metrics registered on a dedicated Prometheus registry.
pub struct VaultMetrics {
    registry: Registry,

    // === COUNTERS ===
    entries_ingested: IntCounter,
    batches_rejected: IntCounter,
    entries_archived: IntCounter,
    partitions_swept: IntCounter,
    partitions_skipped: IntCounter,
    malformed_lines: IntCounter,
    queries: IntCounter,
    query_failures: IntCounterVec,
    maintenance_failures: IntCounterVec,

    // === GAUGES ===
    hot_entries: IntGauge,

    // === HISTOGRAMS ===
    query_duration: Histogram,
}

impl VaultMetrics {
    /// Create metrics registered on a fresh registry.
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new_custom(Some("logvault".into()), None)?)
    }

    /// Create metrics on the given registry.
    pub fn with_registry(registry: Registry) -> Result<Self> {
        let counter = |name: &str, help: &str| -> Result<IntCounter> {
            let c = IntCounter::new(name, help)?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };
        let labeled = |name: &str, help: &str, label: &str| -> Result<IntCounterVec> {
            let c = IntCounterVec::new(Opts::new(name, help), &[label])?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };

        let hot_entries = IntGauge::new("hot_entries", "Entries currently in the hot store")?;
        registry.register(Box::new(hot_entries.clone()))?;

        let query_duration = Histogram::with_opts(
            HistogramOpts::new("query_duration_seconds", "Duration of merged queries")
                .buckets(QUERY_DURATION_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(query_duration.clone()))?;

        Ok(Self {
            entries_ingested: counter("entries_ingested_total", "Log entries accepted")?,
            batches_rejected: counter("batches_rejected_total", "Batches rejected by validation")?,
            entries_archived: counter("entries_archived_total", "Entries moved to the archive")?,
            partitions_swept: counter(
                "partitions_swept_total",
                "Archive date partitions deleted by retention",
            )?,
            partitions_skipped: counter(
                "archive_partitions_skipped_total",
                "Archive partitions skipped during reads",
            )?,
            malformed_lines: counter(
                "archive_malformed_lines_total",
                "Archive lines that failed to decode",
            )?,
            queries: counter("queries_total", "Merged queries served")?,
            query_failures: labeled("query_failures_total", "Failed merged queries", "type")?,
            maintenance_failures: labeled(
                "maintenance_failures_total",
                "Failed maintenance runs",
                "job",
            )?,
            hot_entries,
            query_duration,
            registry,
        })
    }

    // === COUNTER RECORDING ===

    pub fn record_ingested(&self, count: usize) {
        self.entries_ingested.inc_by(count as u64);
    }

    pub fn record_batch_rejected(&self) {
        self.batches_rejected.inc();
    }

    pub fn record_archived(&self, count: usize) {
        self.entries_archived.inc_by(count as u64);
    }

    pub fn record_swept(&self, count: usize) {
        self.partitions_swept.inc_by(count as u64);
    }

    pub fn record_partition_skipped(&self) {
        self.partitions_skipped.inc();
    }

    pub fn record_malformed_lines(&self, count: usize) {
        self.malformed_lines.inc_by(count as u64);
    }

    /// Record a query outcome with its duration.
    pub fn record_query(&self, duration: Duration, error: Option<&Error>) {
        self.queries.inc();
        self.query_duration.observe(duration.as_secs_f64());
        if let Some(err) = error {
            self.query_failures
                .with_label_values(&[ErrorType::of(err).as_label()])
                .inc();
        }
    }

    /// Record a failed maintenance run.
    pub fn record_maintenance_failure(&self, job: &str) {
        self.maintenance_failures.with_label_values(&[job]).inc();
    }

    // === GAUGE UPDATES ===

    pub fn set_hot_entries(&self, count: u64) {
        self.hot_entries.set(count.min(i64::MAX as u64) as i64);
    }

    // === GETTERS ===

    pub fn entries_ingested(&self) -> u64 {
        self.entries_ingested.get()
    }

    pub fn batches_rejected(&self) -> u64 {
        self.batches_rejected.get()
    }

    pub fn entries_archived(&self) -> u64 {
        self.entries_archived.get()
    }

    pub fn partitions_swept(&self) -> u64 {
        self.partitions_swept.get()
    }

    pub fn partitions_skipped(&self) -> u64 {
        self.partitions_skipped.get()
    }

    pub fn malformed_lines(&self) -> u64 {
        self.malformed_lines.get()
    }

    pub fn queries(&self) -> u64 {
        self.queries.get()
    }

    pub fn query_failures(&self, error_type: ErrorType) -> u64 {
        self.query_failures
            .with_label_values(&[error_type.as_label()])
            .get()
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Export metrics in Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let mut buf = Vec::with_capacity(4096);
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| Error::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthError, StorageError};

    #[test]
    fn test_counters() {
        let metrics = VaultMetrics::new().unwrap();

        metrics.record_ingested(3);
        metrics.record_ingested(2);
        assert_eq!(metrics.entries_ingested(), 5);

        metrics.record_batch_rejected();
        assert_eq!(metrics.batches_rejected(), 1);

        metrics.record_archived(10);
        metrics.record_swept(2);
        metrics.record_partition_skipped();
        metrics.record_malformed_lines(4);
        assert_eq!(metrics.entries_archived(), 10);
        assert_eq!(metrics.partitions_swept(), 2);
        assert_eq!(metrics.partitions_skipped(), 1);
        assert_eq!(metrics.malformed_lines(), 4);
    }

    #[test]
    fn test_query_failures_by_type() {
        let metrics = VaultMetrics::new().unwrap();
        let timeout = Error::Timeout(Duration::from_secs(1));
        let storage: Error = StorageError::Backend("down".into()).into();

        metrics.record_query(Duration::from_millis(4), None);
        metrics.record_query(Duration::from_millis(40), Some(&timeout));
        metrics.record_query(Duration::from_millis(2), Some(&storage));

        assert_eq!(metrics.queries(), 3);
        assert_eq!(metrics.query_failures(ErrorType::Timeout), 1);
        assert_eq!(metrics.query_failures(ErrorType::Storage), 1);
        assert_eq!(metrics.query_failures(ErrorType::Auth), 0);
    }

    #[test]
    fn test_error_classification() {
        let auth: Error = AuthError::InvalidKey.into();
        assert_eq!(ErrorType::of(&auth), ErrorType::Auth);
        assert_eq!(ErrorType::of(&Error::Shutdown), ErrorType::Other);
    }

    #[test]
    fn test_prometheus_text_export() {
        let metrics = VaultMetrics::new().unwrap();
        metrics.record_ingested(7);
        metrics.set_hot_entries(42);
        metrics.record_query(Duration::from_millis(20), None);
        metrics.record_maintenance_failure("archive");

        let text = metrics.render().unwrap();
        assert!(text.contains("# TYPE logvault_entries_ingested_total counter"));
        assert!(text.contains("logvault_entries_ingested_total 7"));
        assert!(text.contains("logvault_hot_entries 42"));
        assert!(text.contains("logvault_query_duration_seconds_count 1"));
        assert!(text.contains("logvault_maintenance_failures_total{job=\"archive\"} 1"));
    }

    #[test]
    fn test_separate_instances_do_not_collide() {
        let a = VaultMetrics::new().unwrap();
        let b = VaultMetrics::new().unwrap();
        a.record_ingested(1);
        assert_eq!(b.entries_ingested(), 0);
    }
}
