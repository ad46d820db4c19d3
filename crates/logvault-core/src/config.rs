//! Configuration structures for logvault.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Hot store configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Archive tier configuration
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Ingestion limits
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Query limits
    #[serde(default)]
    pub query: QueryConfig,

    /// Maintenance scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Hot store backend selection.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// SQLite file (or `:memory:`) database
    #[default]
    Sqlite,
    /// Process-local in-memory tables
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Sqlite => write!(f, "sqlite"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

/// Hot store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Backend engine
    #[serde(default)]
    pub backend: StorageBackend,

    /// SQLite database path (`:memory:` for a private in-memory database)
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

/// Archive tier configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchiveConfig {
    /// Root directory holding `{YYYY-MM-DD}/{service}.jsonl` partitions
    #[serde(default = "default_archive_root")]
    pub root: PathBuf,

    /// Maximum hot entries migrated per service per run
    #[serde(default = "default_archive_batch_size")]
    pub batch_size: usize,

    /// Date partitions older than this many days are swept
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Partitions larger than this are skipped by the reader
    #[serde(default = "default_max_partition_bytes")]
    pub max_partition_bytes: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root: default_archive_root(),
            batch_size: default_archive_batch_size(),
            retention_days: default_retention_days(),
            max_partition_bytes: default_max_partition_bytes(),
        }
    }
}

/// Ingestion configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Maximum entries accepted in one batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
        }
    }
}

/// Query configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Page size when the caller gives none
    #[serde(default = "default_query_limit")]
    pub default_limit: usize,

    /// Upper bound on page size
    #[serde(default = "default_max_query_limit")]
    pub max_limit: usize,

    /// Deadline for a merged query in milliseconds
    #[serde(default = "default_query_timeout_ms")]
    pub timeout_ms: u64,

    /// Floor of the archive scan cap
    #[serde(default = "default_min_archive_scan")]
    pub min_archive_scan: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_query_limit(),
            max_limit: default_max_query_limit(),
            timeout_ms: default_query_timeout_ms(),
            min_archive_scan: default_min_archive_scan(),
        }
    }
}

/// Maintenance scheduler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Enable periodic archive migration
    #[serde(default = "default_enabled")]
    pub archive_enabled: bool,

    /// Archive interval in seconds
    #[serde(default = "default_daily_interval")]
    pub archive_interval_seconds: u64,

    /// UTC time of day (`HH:MM`) of the first archive run
    #[serde(default = "default_archive_at")]
    pub archive_at: Option<String>,

    /// Age threshold in days for scheduled archive runs
    #[serde(default = "default_archive_days_old")]
    pub archive_days_old: u32,

    /// Enable periodic retention sweep
    #[serde(default = "default_enabled")]
    pub sweep_enabled: bool,

    /// Sweep interval in seconds
    #[serde(default = "default_daily_interval")]
    pub sweep_interval_seconds: u64,

    /// UTC time of day (`HH:MM`) of the first sweep run
    #[serde(default = "default_sweep_at")]
    pub sweep_at: Option<String>,
}

impl SchedulerConfig {
    /// Parsed archive anchor.
    pub fn archive_start(&self) -> crate::Result<Option<NaiveTime>> {
        parse_time_of_day("archive_at", self.archive_at.as_deref())
    }

    /// Parsed sweep anchor.
    pub fn sweep_start(&self) -> crate::Result<Option<NaiveTime>> {
        parse_time_of_day("sweep_at", self.sweep_at.as_deref())
    }
}

fn parse_time_of_day(field: &str, raw: Option<&str>) -> crate::Result<Option<NaiveTime>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => NaiveTime::parse_from_str(raw, "%H:%M")
            .map(Some)
            .map_err(|_| crate::Error::Config(format!("{} must be HH:MM, got '{}'", field, raw))),
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            archive_enabled: default_enabled(),
            archive_interval_seconds: default_daily_interval(),
            archive_at: default_archive_at(),
            archive_days_old: default_archive_days_old(),
            sweep_enabled: default_enabled(),
            sweep_interval_seconds: default_daily_interval(),
            sweep_at: default_sweep_at(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Admin credential; admin routes are disabled when unset
    #[serde(default)]
    pub admin_api_key: Option<String>,

    /// Browser origins allowed by CORS; `"*"` allows any origin
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Per-client request limits
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            admin_api_key: None,
            allowed_origins: default_allowed_origins(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Fixed-window request limits, counted per client address.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Window length in milliseconds
    #[serde(default = "default_rate_window_ms")]
    pub window_ms: u64,

    /// Requests per window across all routes
    #[serde(default = "default_rate_max")]
    pub max_requests: u32,

    /// Requests per window on `/api/logs` routes
    #[serde(default = "default_rate_log_max")]
    pub log_max_requests: u32,

    /// Requests per window on `/health`
    #[serde(default = "default_rate_health_max")]
    pub health_max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            window_ms: default_rate_window_ms(),
            max_requests: default_rate_max(),
            log_max_requests: default_rate_log_max(),
            health_max_requests: default_rate_health_max(),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Filter directive for tracing-subscriber.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./data/logs.db")
}
fn default_archive_root() -> PathBuf {
    PathBuf::from("./data/archives")
}
fn default_archive_batch_size() -> usize {
    10000
}
fn default_retention_days() -> u32 {
    30
}
fn default_max_partition_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_max_batch_size() -> usize {
    100
}
fn default_query_limit() -> usize {
    100
}
fn default_max_query_limit() -> usize {
    1000
}
fn default_query_timeout_ms() -> u64 {
    10000
}
fn default_min_archive_scan() -> usize {
    1000
}
fn default_enabled() -> bool {
    true
}
fn default_daily_interval() -> u64 {
    86400
}
fn default_archive_at() -> Option<String> {
    Some("02:00".into())
}

fn default_sweep_at() -> Option<String> {
    Some("03:00".into())
}

fn default_archive_days_old() -> u32 {
    1
}
fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".into(),
        "http://localhost:3000".into(),
    ]
}

fn default_rate_window_ms() -> u64 {
    60_000
}

fn default_rate_max() -> u32 {
    100
}

fn default_rate_log_max() -> u32 {
    1000
}

fn default_rate_health_max() -> u32 {
    60
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.storage.backend == StorageBackend::Sqlite
            && self.storage.sqlite_path.as_os_str().is_empty()
        {
            return Err(crate::Error::Config(
                "sqlite_path is required for the sqlite backend".into(),
            ));
        }

        if self.archive.root.as_os_str().is_empty() {
            return Err(crate::Error::Config("Archive root is required".into()));
        }

        if self.archive.batch_size == 0 {
            return Err(crate::Error::Config(
                "Archive batch_size must be greater than zero".into(),
            ));
        }

        if self.ingest.max_batch_size == 0 {
            return Err(crate::Error::Config(
                "Ingest max_batch_size must be greater than zero".into(),
            ));
        }

        if self.query.max_limit == 0 || self.query.default_limit > self.query.max_limit {
            return Err(crate::Error::Config(
                "Query default_limit must be within 1..=max_limit".into(),
            ));
        }

        if self.scheduler.archive_enabled && self.scheduler.archive_interval_seconds == 0 {
            return Err(crate::Error::Config(
                "Archive interval must be greater than zero".into(),
            ));
        }

        self.scheduler.archive_start()?;
        self.scheduler.sweep_start()?;

        if self.scheduler.sweep_enabled && self.scheduler.sweep_interval_seconds == 0 {
            return Err(crate::Error::Config(
                "Sweep interval must be greater than zero".into(),
            ));
        }

        if matches!(&self.server.admin_api_key, Some(key) if key.trim().is_empty()) {
            return Err(crate::Error::Config(
                "admin_api_key must not be blank when set".into(),
            ));
        }

        let limits = &self.server.rate_limit;
        if limits.enabled
            && (limits.window_ms == 0
                || limits.max_requests == 0
                || limits.log_max_requests == 0
                || limits.health_max_requests == 0)
        {
            return Err(crate::Error::Config(
                "Rate limit window and maximums must be greater than zero".into(),
            ));
        }

        if self.server.admin_api_key.is_none() {
            tracing::warn!("No admin API key configured; admin operations will be rejected");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
    }

    #[test]
    fn test_default_archive_config() {
        let config = ArchiveConfig::default();
        assert_eq!(config.root, PathBuf::from("./data/archives"));
        assert_eq!(config.batch_size, 10000);
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.max_partition_bytes, 104_857_600);
    }

    #[test]
    fn test_default_scheduler_config() {
        let config = SchedulerConfig::default();
        assert!(config.archive_enabled);
        assert!(config.sweep_enabled);
        assert_eq!(config.archive_interval_seconds, 86400);
        assert_eq!(config.archive_days_old, 1);
    }

    #[test]
    fn test_default_query_and_ingest_config() {
        assert_eq!(IngestConfig::default().max_batch_size, 100);
        let query = QueryConfig::default();
        assert_eq!(query.default_limit, 100);
        assert_eq!(query.min_archive_scan, 1000);
        assert_eq!(query.timeout_ms, 10000);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [storage]
            backend = "memory"

            [archive]
            root = "/var/lib/logvault/archives"
            retention_days = 7

            [server]
            admin_api_key = "admin-secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.archive.retention_days, 7);
        assert_eq!(config.archive.batch_size, 10000);
        assert_eq!(config.server.admin_api_key.as_deref(), Some("admin-secret"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scheduler_anchors() {
        let config = Config::default();
        assert_eq!(
            config.scheduler.archive_start().unwrap(),
            NaiveTime::from_hms_opt(2, 0, 0)
        );
        assert_eq!(
            config.scheduler.sweep_start().unwrap(),
            NaiveTime::from_hms_opt(3, 0, 0)
        );

        let config: Config = toml::from_str(
            r#"
            [scheduler]
            archive_at = ""
            sweep_at = "04:30"
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.archive_start().unwrap(), None);
        assert_eq!(
            config.scheduler.sweep_start().unwrap(),
            NaiveTime::from_hms_opt(4, 30, 0)
        );

        let mut config = Config::default();
        config.scheduler.archive_at = Some("2am".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("archive_at"));
    }

    #[test]
    fn test_server_limits_and_origins() {
        let config = Config::default();
        assert_eq!(config.server.rate_limit.window_ms, 60_000);
        assert_eq!(config.server.rate_limit.max_requests, 100);
        assert_eq!(config.server.rate_limit.log_max_requests, 1000);
        assert_eq!(config.server.rate_limit.health_max_requests, 60);
        assert_eq!(config.server.allowed_origins.len(), 2);

        let config: Config = toml::from_str(
            r#"
            [server]
            allowed_origins = ["*"]

            [server.rate_limit]
            max_requests = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.server.allowed_origins, vec!["*"]);
        assert_eq!(config.server.rate_limit.max_requests, 5);
        assert_eq!(config.server.rate_limit.log_max_requests, 1000);

        let mut config = Config::default();
        config.server.rate_limit.health_max_requests = 0;
        assert!(config.validate().is_err());
        config.server.rate_limit.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_batch_size() {
        let mut config = Config::default();
        config.archive.batch_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_config_validation_limits() {
        let mut config = Config::default();
        config.query.default_limit = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_blank_admin_key() {
        let mut config = Config::default();
        config.server.admin_api_key = Some("   ".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("admin_api_key"));
    }

    #[test]
    fn test_log_level_filter() {
        assert_eq!(LogLevel::default().as_filter(), "info");
        assert_eq!(LogFormat::default(), LogFormat::Json);
    }
}
