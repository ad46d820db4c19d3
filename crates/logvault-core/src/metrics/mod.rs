//! Metrics collection and export.

mod prometheus;

pub use self::prometheus::{ErrorType, VaultMetrics};
