//! Hot store: the live, mutable tier.

mod factory;
mod memory;
mod sqlite;
mod store;

pub use factory::{
    HotStoreFactory, MemoryStoreFactory, SqliteStoreFactory, StorageFactoryRegistry,
    StorageHandles,
};
pub use memory::{MemoryHotStore, MemoryStoreStats};
pub use sqlite::SqliteHotStore;
pub use store::{HotStore, LogFilter, ServiceCatalog, StoreHealth};
