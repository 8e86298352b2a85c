//! Error types for Conduit
//!
//! Lifecycle, configuration and source failures travel through [`Result`]. Per-batch sink
//! outcomes never do: they are reported as [`crate::envelope::StatusEnvelope`] values.

use thiserror::Error;

/// Result type for Conduit operations
pub type Result<T> = std::result::Result<T, ConduitError>;

/// Errors that can occur in Conduit
#[derive(Debug, Error)]
pub enum ConduitError {
    /// A required configuration key is missing or has the wrong shape
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// External resource acquisition failed during initialization
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query or fetch failed while a source was streaming batches
    #[error("Source execution error: {0}")]
    SourceExecution(String),

    /// No writer is registered for the requested format identifier
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Serialization or persistence failed inside a sink
    #[error("Sink write error: {0}")]
    SinkWrite(String),

    /// A lifecycle method was called out of order
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConduitError {
    /// Stable name of the error kind, used in logs and pipeline reports
    pub fn kind(&self) -> &'static str {
        match self {
            ConduitError::Configuration(_) => "ConfigurationError",
            ConduitError::Connection(_) => "ConnectionError",
            ConduitError::SourceExecution(_) => "SourceExecutionError",
            ConduitError::UnsupportedFormat(_) => "UnsupportedFormatError",
            ConduitError::SinkWrite(_) => "SinkWriteError",
            ConduitError::Lifecycle(_) => "LifecycleError",
            ConduitError::Io(_) => "IoError",
            ConduitError::Json(_) => "JsonError",
            ConduitError::Yaml(_) => "YamlError",
        }
    }

    /// Whether the error leaves the connector instance unusable
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConduitError::Configuration(_) | ConduitError::Connection(_) | ConduitError::Lifecycle(_)
        )
    }
}
