//! Shared foundation for the tessera sharding proxy: error taxonomy,
//! namespace/config model, shutdown signal, and the telemetry seam.

pub mod config;
pub mod error;
pub mod metrics;
pub mod shutdown;

pub use error::{ProxyError, ProxyResult};
