//! Storage factory for creating hot store instances.
//!
//! The backend is chosen by `storage.backend` in configuration:
//!
//! - `sqlite` - file or in-memory SQLite database
//! - `memory` - process-local tables, lost on restart

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::memory::MemoryHotStore;
use super::sqlite::SqliteHotStore;
use super::store::{HotStore, ServiceCatalog};
use crate::config::{StorageBackend, StorageConfig};
use crate::error::StorageError;
use crate::Result;

/// The two capabilities of one backend, sharing the same underlying engine.
#[derive(Clone)]
pub struct StorageHandles {
    /// Log entry tier
    pub hot: Arc<dyn HotStore>,
    /// Service registry
    pub catalog: Arc<dyn ServiceCatalog>,
}

impl StorageHandles {
    /// Split one engine into both capabilities.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: HotStore + ServiceCatalog + 'static,
    {
        Self {
            hot: store.clone(),
            catalog: store,
        }
    }
}

/// Creates a storage backend for one engine.
#[async_trait]
pub trait HotStoreFactory: Send + Sync {
    /// Build a backend from configuration.
    async fn create(&self, config: &StorageConfig) -> Result<StorageHandles>;

    /// Engine this factory builds.
    fn backend(&self) -> StorageBackend;

    /// Whether this factory handles the given configuration.
    fn supports(&self, config: &StorageConfig) -> bool {
        self.backend() == config.backend
    }
}

/// Factory for [`SqliteHotStore`].
pub struct SqliteStoreFactory;

#[async_trait]
impl HotStoreFactory for SqliteStoreFactory {
    async fn create(&self, config: &StorageConfig) -> Result<StorageHandles> {
        let path = config.sqlite_path.clone();
        let store = tokio::task::spawn_blocking(move || SqliteHotStore::open(path)).await??;
        Ok(StorageHandles::from_store(Arc::new(store)))
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::Sqlite
    }
}

/// Factory for [`MemoryHotStore`].
pub struct MemoryStoreFactory;

#[async_trait]
impl HotStoreFactory for MemoryStoreFactory {
    async fn create(&self, _config: &StorageConfig) -> Result<StorageHandles> {
        Ok(StorageHandles::from_store(Arc::new(MemoryHotStore::new())))
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}

/// Registry of storage factories.
pub struct StorageFactoryRegistry {
    factories: Vec<Box<dyn HotStoreFactory>>,
}

impl Default for StorageFactoryRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl StorageFactoryRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// Create a registry with the built-in engines.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SqliteStoreFactory));
        registry.register(Box::new(MemoryStoreFactory));
        registry
    }

    /// Register a new factory.
    pub fn register(&mut self, factory: Box<dyn HotStoreFactory>) {
        self.factories.push(factory);
    }

    /// Create a backend based on configuration.
    pub async fn create(&self, config: &StorageConfig) -> Result<StorageHandles> {
        for factory in &self.factories {
            if factory.supports(config) {
                let handles = factory.create(config).await?;
                info!(backend = %config.backend, "Hot store ready");
                return Ok(handles);
            }
        }

        Err(StorageError::UnsupportedBackend(config.backend.to_string()).into())
    }

    /// Engines this registry can build.
    pub fn supported_backends(&self) -> Vec<StorageBackend> {
        self.factories.iter().map(|f| f.backend()).collect()
    }
}
