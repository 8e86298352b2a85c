//! Connector registry
//!
//! Maps a connector type name to a factory, separately for sources and sinks.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use conduit_core::{BoxSink, BoxSource, ConduitError, ConnectorConfig, ConnectorSpec, Result};

use crate::postgres::PostgresSourceConnector;
use crate::s3::S3SinkConnector;

/// Builds a source from its configuration
pub type SourceFactory = Arc<dyn Fn(ConnectorConfig) -> Result<BoxSource> + Send + Sync>;

/// Builds a sink from its configuration
pub type SinkFactory = Arc<dyn Fn(ConnectorConfig) -> Result<BoxSink> + Send + Sync>;

/// Source and sink factories by type name
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    sources: HashMap<String, SourceFactory>,
    sinks: HashMap<String, SinkFactory>,
}

impl ConnectorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `postgresql` source and `s3` sink
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_source(
            crate::postgres::CONNECTOR_TYPE,
            Arc::new(|config: ConnectorConfig| -> Result<BoxSource> {
                Ok(Box::new(PostgresSourceConnector::new(config)))
            }),
        );
        registry.register_sink(
            crate::s3::CONNECTOR_TYPE,
            Arc::new(|config: ConnectorConfig| -> Result<BoxSink> {
                Ok(Box::new(S3SinkConnector::new(config)))
            }),
        );
        registry
    }

    /// Register a source factory, replacing any previous one under the name
    pub fn register_source(&mut self, name: impl Into<String>, factory: SourceFactory) {
        self.sources.insert(name.into(), factory);
    }

    /// Register a sink factory, replacing any previous one under the name
    pub fn register_sink(&mut self, name: impl Into<String>, factory: SinkFactory) {
        self.sinks.insert(name.into(), factory);
    }

    /// Build a source
    pub fn create_source(&self, name: &str, config: ConnectorConfig) -> Result<BoxSource> {
        match self.sources.get(name) {
            Some(factory) => factory(config),
            None => Err(ConduitError::Configuration(format!(
                "Unknown source connector: {}",
                name
            ))),
        }
    }

    /// Build a sink
    pub fn create_sink(&self, name: &str, config: ConnectorConfig) -> Result<BoxSink> {
        match self.sinks.get(name) {
            Some(factory) => factory(config),
            None => Err(ConduitError::Configuration(format!(
                "Unknown sink connector: {}",
                name
            ))),
        }
    }

    /// Build a source from a pipeline entry
    pub fn source_from_spec(&self, spec: &ConnectorSpec) -> Result<BoxSource> {
        self.create_source(&spec.connector_type, spec.config.clone())
    }

    /// Build a sink from a pipeline entry
    pub fn sink_from_spec(&self, spec: &ConnectorSpec) -> Result<BoxSink> {
        self.create_sink(&spec.connector_type, spec.config.clone())
    }

    /// Registered source names, sorted
    pub fn source_names(&self) -> Vec<&str> {
        sorted_names(self.sources.keys())
    }

    /// Registered sink names, sorted
    pub fn sink_names(&self) -> Vec<&str> {
        sorted_names(self.sinks.keys())
    }
}

fn sorted_names<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<&'a str> {
    let mut names: Vec<&str> = keys.map(String::as_str).collect();
    names.sort_unstable();
    names
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("sources", &self.source_names())
            .field("sinks", &self.sink_names())
            .finish()
    }
}
