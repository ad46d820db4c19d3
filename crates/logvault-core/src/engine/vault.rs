//! Top-level facade wiring every tier together.
//!
//! Integrates:
//! - Hot store and service catalog chosen by configuration
//! - Ingestor for single and batched writes
//! - Archive writer, reader and retention sweeper
//! - Query merger over both tiers
//! - Maintenance scheduler for periodic archive and sweep runs

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive::{
    ArchiveReader, ArchiveRunResult, ArchiveWriter, PartitionLayout, RetentionSweeper,
    SweepResult,
};
use crate::auth::{self, ApiKeyAuthenticator};
use crate::config::Config;
use crate::health::{self, HealthCheck, HealthReport};
use crate::hot::{HotStore, ServiceCatalog, StorageFactoryRegistry};
use crate::ingest::Ingestor;
use crate::maintenance::{ArchiveJob, MaintenanceScheduler, ScheduledJob, SweepJob};
use crate::metrics::VaultMetrics;
use crate::model::{LogEntry, NewLogEntry, Service, ServiceSummary};
use crate::query::{LogQuery, QueryMerger, QueryPage};
use crate::Result;

/// The log storage engine.
pub struct LogVault {
    config: Config,
    hot: Arc<dyn HotStore>,
    catalog: Arc<dyn ServiceCatalog>,
    layout: PartitionLayout,
    ingestor: Ingestor,
    writer: Arc<ArchiveWriter>,
    sweeper: Arc<RetentionSweeper>,
    merger: QueryMerger,
    authenticator: ApiKeyAuthenticator,
    metrics: Arc<VaultMetrics>,
    health: Arc<HealthCheck>,
}

impl LogVault {
    /// Open the engine with the built-in storage backends.
    pub async fn open(config: Config) -> Result<Self> {
        Self::open_with_registry(config, &StorageFactoryRegistry::with_defaults()).await
    }

    /// Open the engine, building storage through the given registry.
    pub async fn open_with_registry(
        config: Config,
        registry: &StorageFactoryRegistry,
    ) -> Result<Self> {
        config.validate()?;

        let health = Arc::new(HealthCheck::new());
        health.register_component(health::HOT_STORE);
        health.register_component(health::ARCHIVE);
        health.register_component(health::SCHEDULER);

        let metrics = Arc::new(VaultMetrics::new()?);

        let storage = match registry.create(&config.storage).await {
            Ok(storage) => {
                health.mark_healthy(health::HOT_STORE);
                storage
            }
            Err(e) => {
                health.mark_unhealthy(health::HOT_STORE, &e.to_string());
                return Err(e);
            }
        };

        let layout = PartitionLayout::new(config.archive.root.clone());

        let ingestor = Ingestor::new(storage.hot.clone(), config.ingest.max_batch_size)
            .with_metrics(metrics.clone());

        let writer = Arc::new(
            ArchiveWriter::new(storage.hot.clone(), layout.clone(), config.archive.batch_size)
                .with_metrics(metrics.clone()),
        );

        let reader = Arc::new(
            ArchiveReader::new(layout.clone(), config.archive.max_partition_bytes)
                .with_metrics(metrics.clone()),
        );

        let sweeper = Arc::new(
            RetentionSweeper::new(layout.clone(), config.archive.retention_days)
                .with_metrics(metrics.clone()),
        );

        let merger = QueryMerger::new(storage.hot.clone(), reader, config.query.clone())
            .with_metrics(metrics.clone());

        let authenticator = ApiKeyAuthenticator::new(
            storage.catalog.clone(),
            config.server.admin_api_key.clone(),
        );
        if !authenticator.admin_configured() {
            warn!("No admin API key configured; admin operations are disabled");
        }

        info!(
            backend = %config.storage.backend,
            archive_root = %layout.root().display(),
            retention_days = config.archive.retention_days,
            "Log vault opened"
        );

        Ok(Self {
            config,
            hot: storage.hot,
            catalog: storage.catalog,
            layout,
            ingestor,
            writer,
            sweeper,
            merger,
            authenticator,
            metrics,
            health,
        })
    }

    // === INGESTION ===

    /// Validate and store one entry for `service`.
    pub async fn ingest(&self, service: &str, entry: NewLogEntry) -> Result<LogEntry> {
        self.ingestor.ingest(service, entry).await
    }

    /// Validate and store a batch, all or nothing.
    pub async fn ingest_batch(
        &self,
        service: &str,
        entries: Vec<NewLogEntry>,
    ) -> Result<Vec<LogEntry>> {
        self.ingestor.ingest_batch(service, entries).await
    }

    /// Like [`ingest_batch`](Self::ingest_batch) for undecoded JSON items.
    pub async fn ingest_raw_batch(
        &self,
        service: &str,
        items: Vec<serde_json::Value>,
    ) -> Result<Vec<LogEntry>> {
        self.ingestor.ingest_raw_batch(service, items).await
    }

    // === QUERIES ===

    /// Merged, deduplicated, paged query over both tiers.
    pub async fn query_logs(&self, service: &str, query: &LogQuery) -> Result<QueryPage> {
        self.merger.query_logs(service, query).await
    }

    /// Hot store point lookup scoped to `service`.
    pub async fn get_log(&self, service: &str, id: Uuid) -> Result<Option<LogEntry>> {
        self.hot.get_by_id(id, service).await
    }

    // === MAINTENANCE ===

    /// Move entries at least `days_old` days old into the archive.
    pub async fn archive(&self, days_old: u32) -> Result<ArchiveRunResult> {
        self.writer.archive(days_old).await
    }

    /// Delete archive partitions past retention.
    pub async fn sweep(&self) -> Result<SweepResult> {
        self.sweeper.sweep().await
    }

    /// Build a scheduler running the archive and sweep jobs.
    ///
    /// Jobs share this vault's writer and sweeper, so scheduled and manual
    /// archive runs never overlap.
    pub fn scheduler(&self) -> Arc<MaintenanceScheduler> {
        let sched = &self.config.scheduler;
        // Anchors were checked by `Config::validate` in `open`
        let jobs = vec![
            ScheduledJob::new(
                Arc::new(ArchiveJob::new(self.writer.clone(), sched.archive_days_old)),
                Duration::from_secs(sched.archive_interval_seconds),
                sched.archive_enabled,
            )
            .with_start_at(sched.archive_start().ok().flatten()),
            ScheduledJob::new(
                Arc::new(SweepJob::new(self.sweeper.clone())),
                Duration::from_secs(sched.sweep_interval_seconds),
                sched.sweep_enabled,
            )
            .with_start_at(sched.sweep_start().ok().flatten()),
        ];

        Arc::new(
            MaintenanceScheduler::new(jobs)
                .with_metrics(self.metrics.clone())
                .with_health(self.health.clone()),
        )
    }

    // === SERVICES ===

    /// Register a service and return it with its API key.
    pub async fn create_service(&self, name: &str) -> Result<Service> {
        auth::create_service(self.catalog.as_ref(), name).await
    }

    /// All services, newest first, without keys.
    pub async fn list_services(&self) -> Result<Vec<ServiceSummary>> {
        self.catalog.list_services().await
    }

    /// API-key authenticator bound to this vault's catalog.
    pub fn authenticator(&self) -> &ApiKeyAuthenticator {
        &self.authenticator
    }

    // === HEALTH ===

    /// Probe the hot store and the archive root, then report.
    pub async fn check_health(&self) -> HealthReport {
        let start = Instant::now();
        match self.hot.health_check().await {
            Ok(probe) if probe.is_healthy => {
                self.health.mark_healthy(health::HOT_STORE);
                self.metrics.set_hot_entries(probe.entry_count);
            }
            Ok(probe) => {
                let reason = probe.message.unwrap_or_else(|| "probe failed".into());
                warn!(reason = %reason, "Hot store unhealthy");
                self.health.mark_unhealthy(health::HOT_STORE, &reason);
            }
            Err(e) => {
                warn!(error = %e, "Hot store unreachable");
                self.health.mark_unhealthy(health::HOT_STORE, &e.to_string());
            }
        }

        match self.layout.list_dates().await {
            Ok(_) => self.health.mark_healthy(health::ARCHIVE),
            Err(e) => self.health.mark_degraded(health::ARCHIVE, &e.to_string()),
        }

        let report = self.health.report();
        debug!(
            status = ?report.status,
            duration_ms = start.elapsed().as_millis() as u64,
            "Health check completed"
        );
        report
    }

    /// Component health tracker.
    pub fn health(&self) -> &Arc<HealthCheck> {
        &self.health
    }

    /// Engine metrics.
    pub fn metrics(&self) -> &Arc<VaultMetrics> {
        &self.metrics
    }

    /// Hot store backing this vault.
    pub fn hot_store(&self) -> &Arc<dyn HotStore> {
        &self.hot
    }

    /// Archive partition layout.
    pub fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageBackend;
    use crate::health::HealthStatus;
    use tempfile::TempDir;

    fn memory_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        config.archive.root = dir.path().join("archives");
        config
    }

    #[tokio::test]
    async fn test_open_and_health() {
        let dir = TempDir::new().unwrap();
        let vault = LogVault::open(memory_config(&dir)).await.unwrap();

        vault
            .ingest("svc", NewLogEntry::new("info", "hello"))
            .await
            .unwrap();

        let report = vault.check_health().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(vault
            .metrics()
            .render()
            .unwrap()
            .contains("logvault_hot_entries 1"));
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let mut config = memory_config(&dir);
        config.archive.batch_size = 0;
        assert!(LogVault::open(config).await.is_err());
    }

    #[tokio::test]
    async fn test_unsupported_backend() {
        let dir = TempDir::new().unwrap();
        let result =
            LogVault::open_with_registry(memory_config(&dir), &StorageFactoryRegistry::new())
                .await;
        assert!(matches!(
            result,
            Err(crate::Error::Storage(
                crate::error::StorageError::UnsupportedBackend(_)
            ))
        ));
    }

    #[tokio::test]
    async fn test_get_log_is_scoped() {
        let dir = TempDir::new().unwrap();
        let vault = LogVault::open(memory_config(&dir)).await.unwrap();

        let stored = vault
            .ingest("svc-a", NewLogEntry::new("info", "mine"))
            .await
            .unwrap();

        assert!(vault.get_log("svc-a", stored.id).await.unwrap().is_some());
        assert!(vault.get_log("svc-b", stored.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scheduler_trigger_uses_shared_writer() {
        let dir = TempDir::new().unwrap();
        let vault = LogVault::open(memory_config(&dir)).await.unwrap();
        let scheduler = vault.scheduler();

        assert_eq!(scheduler.job_names(), vec!["archive", "sweep"]);
        assert_eq!(scheduler.trigger("archive").await.unwrap(), 0);
        assert_eq!(scheduler.trigger("sweep").await.unwrap(), 0);
    }
}
