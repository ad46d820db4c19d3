//! CLI command implementations.

pub mod maintenance;
pub mod serve;
pub mod service;
pub mod status;
