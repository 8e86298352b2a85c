//! # Conduit Core
//!
//! Core components for the Conduit data movement framework.
//! This crate provides the connector contract, the batch and status envelopes exchanged
//! between connectors, the sink format dispatcher, configuration and error types.

#![warn(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod connector;
pub mod envelope;
pub mod error;
pub mod format;

// Re-exports for convenience
pub use config::{ConnectorConfig, ConnectorSpec, PipelineConfig};
pub use connector::{
    BoxSink, BoxSource, Connector, ConnectorStream, ExecutionGuard, Lifecycle, LifecycleState,
};
pub use envelope::{BatchEnvelope, BatchMetadata, Record, StatusEnvelope};
pub use error::{ConduitError, Result};
pub use format::{FormatRegistry, FormatWriter};

/// Version of the Conduit Core module
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging system
pub fn init_logging(log_level: log::LevelFilter) -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_millis()
        .try_init()
        .map_err(|e| ConduitError::Configuration(format!("Failed to initialize logging: {}", e)))?;

    log::info!("Conduit Core v{} initialized", VERSION);
    Ok(())
}
