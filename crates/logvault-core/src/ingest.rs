//! Ingestion path: validate caller entries, then write them to the hot store.
//!
//! A batch is all-or-nothing. Every entry is validated before the first
//! write, and the write itself is a single hot store transaction.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{BatchRejection, IndexedError, ValidationError};
use crate::hot::HotStore;
use crate::metrics::VaultMetrics;
use crate::model::{now_millis, LogEntry, NewLogEntry};
use crate::validation::validate_entry;
use crate::Result;

/// Validates and stores log entries for one service at a time.
pub struct Ingestor {
    hot: Arc<dyn HotStore>,
    max_batch_size: usize,
    metrics: Option<Arc<VaultMetrics>>,
}

impl Ingestor {
    /// Create a new ingestor.
    pub fn new(hot: Arc<dyn HotStore>, max_batch_size: usize) -> Self {
        Self {
            hot,
            max_batch_size,
            metrics: None,
        }
    }

    /// Count accepted entries and rejected batches.
    pub fn with_metrics(mut self, metrics: Arc<VaultMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Largest accepted batch.
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Validate and store one entry.
    pub async fn ingest(&self, service: &str, entry: NewLogEntry) -> Result<LogEntry> {
        let entry = validate_entry(service, entry, now_millis())?;
        self.hot.insert(&entry).await?;

        if let Some(ref metrics) = self.metrics {
            metrics.record_ingested(1);
        }
        debug!(service = %service, id = %entry.id, level = %entry.level, "Ingested entry");
        Ok(entry)
    }

    /// Validate every entry, then store all of them in one transaction.
    pub async fn ingest_batch(
        &self,
        service: &str,
        entries: Vec<NewLogEntry>,
    ) -> Result<Vec<LogEntry>> {
        self.check_batch_size(entries.len())?;

        let now = now_millis();
        let mut valid = Vec::with_capacity(entries.len());
        let mut errors = Vec::new();
        for (index, entry) in entries.into_iter().enumerate() {
            match validate_entry(service, entry, now) {
                Ok(entry) => valid.push(entry),
                Err(e) => errors.push(IndexedError {
                    index,
                    error: e.to_string(),
                }),
            }
        }

        self.store_batch(service, valid, errors).await
    }

    /// Like [`ingest_batch`](Self::ingest_batch), for items not yet decoded.
    ///
    /// Items that are not entry objects are reported at their index; the
    /// remaining items are still validated so the caller sees every error.
    pub async fn ingest_raw_batch(
        &self,
        service: &str,
        items: Vec<serde_json::Value>,
    ) -> Result<Vec<LogEntry>> {
        self.check_batch_size(items.len())?;

        let now = now_millis();
        let mut valid = Vec::with_capacity(items.len());
        let mut errors = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            let outcome = serde_json::from_value::<NewLogEntry>(item)
                .map_err(|e| ValidationError::MalformedEntry(e.to_string()))
                .and_then(|entry| validate_entry(service, entry, now));
            match outcome {
                Ok(entry) => valid.push(entry),
                Err(e) => errors.push(IndexedError {
                    index,
                    error: e.to_string(),
                }),
            }
        }

        self.store_batch(service, valid, errors).await
    }

    fn check_batch_size(&self, size: usize) -> Result<()> {
        let error = if size == 0 {
            ValidationError::EmptyBatch
        } else if size > self.max_batch_size {
            ValidationError::BatchTooLarge {
                size,
                max: self.max_batch_size,
            }
        } else {
            return Ok(());
        };

        self.record_rejected();
        Err(BatchRejection::whole_batch(error).into())
    }

    async fn store_batch(
        &self,
        service: &str,
        valid: Vec<LogEntry>,
        errors: Vec<IndexedError>,
    ) -> Result<Vec<LogEntry>> {
        if !errors.is_empty() {
            warn!(
                service = %service,
                rejected = errors.len(),
                batch_size = valid.len() + errors.len(),
                "Batch rejected by validation"
            );
            self.record_rejected();
            return Err(BatchRejection { errors }.into());
        }

        self.hot.insert_batch(&valid).await?;

        if let Some(ref metrics) = self.metrics {
            metrics.record_ingested(valid.len());
        }
        debug!(service = %service, count = valid.len(), "Ingested batch");
        Ok(valid)
    }

    fn record_rejected(&self) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_batch_rejected();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hot::MemoryHotStore;
    use crate::Error;
    use serde_json::json;

    fn ingestor(max: usize) -> (Ingestor, Arc<MemoryHotStore>, Arc<VaultMetrics>) {
        let hot = Arc::new(MemoryHotStore::new());
        let metrics = Arc::new(VaultMetrics::new().unwrap());
        let ingestor = Ingestor::new(hot.clone(), max).with_metrics(metrics.clone());
        (ingestor, hot, metrics)
    }

    #[tokio::test]
    async fn test_single_entry() {
        let (ingestor, hot, metrics) = ingestor(10);

        let stored = ingestor
            .ingest("svc", NewLogEntry::new("WARN", "disk 91%").with_correlation_id("req-9"))
            .await
            .unwrap();

        assert_eq!(stored.level.as_str(), "warn");
        assert_eq!(stored.correlation_id.as_deref(), Some("req-9"));
        assert_eq!(hot.count(Some("svc")).await.unwrap(), 1);
        assert_eq!(metrics.entries_ingested(), 1);
    }

    #[tokio::test]
    async fn test_single_entry_rejected() {
        let (ingestor, hot, _) = ingestor(10);

        let err = ingestor
            .ingest("svc", NewLogEntry::new("fatal", "boom"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidLevel(_))
        ));
        assert_eq!(hot.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_all_or_nothing() {
        let (ingestor, hot, metrics) = ingestor(10);

        let batch = vec![
            NewLogEntry::new("info", "one"),
            NewLogEntry::new("info", "two"),
            NewLogEntry {
                level: Some("info".into()),
                ..Default::default()
            },
            NewLogEntry::new("error", "four"),
        ];

        match ingestor.ingest_batch("svc", batch).await {
            Err(Error::BatchRejected(rejection)) => {
                assert_eq!(rejection.indexes(), vec![2]);
                assert!(rejection.errors[0].error.contains("message"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(hot.count(None).await.unwrap(), 0);
        assert_eq!(metrics.batches_rejected(), 1);
        assert_eq!(metrics.entries_ingested(), 0);
    }

    #[tokio::test]
    async fn test_batch_success_preserves_order() {
        let (ingestor, hot, _) = ingestor(10);

        let stored = ingestor
            .ingest_batch(
                "svc",
                vec![NewLogEntry::new("info", "a"), NewLogEntry::new("debug", "b")],
            )
            .await
            .unwrap();

        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].message, "a");
        assert_eq!(stored[1].message, "b");
        assert_eq!(hot.count(Some("svc")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_batch_size_limits() {
        let (ingestor, _, _) = ingestor(2);

        let err = ingestor.ingest_batch("svc", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::BatchRejected(_)));

        let oversized = vec![NewLogEntry::new("info", "x"); 3];
        match ingestor.ingest_batch("svc", oversized).await {
            Err(Error::BatchRejected(rejection)) => {
                assert!(rejection.errors[0].error.contains("exceeds maximum of 2"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_raw_batch_reports_every_bad_index() {
        let (ingestor, hot, _) = ingestor(10);

        let items = vec![
            json!({"level": "info", "message": "ok"}),
            json!("not an object"),
            json!({"level": "info", "message": "ok", "timestamp": "1999-01-01T00:00:00Z"}),
        ];

        match ingestor.ingest_raw_batch("svc", items).await {
            Err(Error::BatchRejected(rejection)) => {
                assert_eq!(rejection.indexes(), vec![1, 2]);
                assert!(rejection.errors[0].error.starts_with("Malformed entry"));
                assert!(rejection.errors[1].error.contains("out of bounds"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(hot.count(None).await.unwrap(), 0);
    }
}
