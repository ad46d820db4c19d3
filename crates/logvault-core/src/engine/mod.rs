//! Engine facade.

mod vault;

pub use vault::LogVault;
