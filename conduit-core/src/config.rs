//! Configuration for Conduit
//!
//! [`ConnectorConfig`] is the immutable key/value mapping handed to a connector at construction.
//! [`PipelineConfig`] is the YAML document that names one source and its sinks.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ConduitError, Result};

/// Immutable connector configuration
///
/// Unknown keys are kept and ignored. A key holding `null` counts as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectorConfig {
    values: Map<String, Value>,
}

impl ConnectorConfig {
    /// Wrap an existing map
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Build a configuration from a JSON value, which must be an object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            Value::Null => Ok(Self::default()),
            other => Err(ConduitError::Configuration(format!(
                "connector configuration must be a mapping, got {}",
                other
            ))),
        }
    }

    /// Raw value for a key; `null` is reported as absent
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    /// Whether a non-null value is present for the key
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Underlying map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Check that every key is present, in the given order
    ///
    /// The error names the first missing key.
    pub fn require_keys(&self, keys: &[&str]) -> Result<()> {
        match keys.iter().find(|key| !self.contains_key(key)) {
            Some(missing) => Err(ConduitError::Configuration(format!(
                "Missing required config field: {}",
                missing
            ))),
            None => Ok(()),
        }
    }

    /// Required string value
    pub fn require_str(&self, key: &str) -> Result<&str> {
        match self.get(key) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(malformed(key, "a string", other)),
            None => Err(ConduitError::Configuration(format!(
                "Missing required config field: {}",
                key
            ))),
        }
    }

    /// Optional string value; present values of another type are malformed
    pub fn optional_str(&self, key: &str) -> Result<Option<&str>> {
        match self.get(key) {
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(malformed(key, "a string", other)),
            None => Ok(None),
        }
    }

    /// Optional string value with a default
    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str> {
        Ok(self.optional_str(key)?.unwrap_or(default))
    }

    /// Optional unsigned integer with a default; numeric strings are accepted
    pub fn u64_or(&self, key: &str, default: u64) -> Result<u64> {
        match self.get(key) {
            None => Ok(default),
            Some(Value::Number(n)) => n
                .as_u64()
                .ok_or_else(|| malformed(key, "a non-negative integer", &Value::Number(n.clone()))),
            Some(Value::String(s)) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| malformed(key, "a non-negative integer", &Value::String(s.clone()))),
            Some(other) => Err(malformed(key, "a non-negative integer", other)),
        }
    }
}

impl From<Map<String, Value>> for ConnectorConfig {
    fn from(values: Map<String, Value>) -> Self {
        Self::new(values)
    }
}

fn malformed(key: &str, expected: &str, found: &Value) -> ConduitError {
    ConduitError::Configuration(format!(
        "Malformed config field: {} (expected {}, found {})",
        key, expected, found
    ))
}

/// A connector entry in a pipeline document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSpec {
    /// Registered connector type, e.g. `postgresql` or `s3`
    #[serde(rename = "type")]
    pub connector_type: String,

    /// Connector configuration
    #[serde(default)]
    pub config: ConnectorConfig,
}

/// Pipeline document: one source feeding one or more sinks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Optional pipeline name, used in logs
    #[serde(default)]
    pub name: Option<String>,

    /// Source connector
    pub source: ConnectorSpec,

    /// Sink connectors, fed in declared order
    pub sinks: Vec<ConnectorSpec>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: log::LevelFilter,
}

fn default_log_level() -> log::LevelFilter {
    log::LevelFilter::Info
}

impl PipelineConfig {
    /// Load a pipeline from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref()).map_err(|e| {
            ConduitError::Configuration(format!(
                "Failed to open pipeline file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: Self = serde_yaml::from_reader(file)
            .map_err(|e| ConduitError::Configuration(format!("Failed to parse pipeline file: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    /// Load a pipeline from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| ConduitError::Configuration(format!("Failed to parse pipeline: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    /// Display name
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("pipeline")
    }

    fn check(&self) -> Result<()> {
        if self.sinks.is_empty() {
            return Err(ConduitError::Configuration(
                "pipeline must declare at least one sink".to_string(),
            ));
        }
        Ok(())
    }
}
