//! # Conduit Connector
//!
//! Connectors for the Conduit data movement framework.
//! This crate provides the PostgreSQL source, the S3 sink, the built-in format writers, a
//! registry of connector factories and a driver that wires a source into its sinks.

#![warn(unsafe_code)]
#![warn(missing_docs)]

pub mod format;
pub mod pipeline;
pub mod postgres;
pub mod registry;
pub mod s3;

// Re-exports for convenience
pub use format::{default_formats, CsvWriter, JsonWriter, ParquetWriter};
pub use pipeline::{Pipeline, PipelineProgress, PipelineReport, SinkOutcome};
pub use postgres::{InMemoryBackend, PostgresBackend, PostgresSourceConnector};
pub use registry::ConnectorRegistry;
pub use s3::S3SinkConnector;

/// Version of the Conduit Connector module
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
