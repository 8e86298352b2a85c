//! Format dispatch for sinks
//!
//! A [`FormatRegistry`] maps a format identifier (`parquet`, `json`, `csv`, ...) to a
//! [`FormatWriter`]. Sinks resolve the configured identifier at write time; new formats are
//! added by registering them, never by changing the resolution code.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::envelope::Record;
use crate::error::{ConduitError, Result};

/// Serializes a batch of records into one artifact
pub trait FormatWriter: Send + Sync {
    /// MIME type of the produced bytes
    fn content_type(&self) -> &'static str;

    /// Serialize the records
    fn write_batch(&self, records: &[Record]) -> Result<Vec<u8>>;
}

/// Identifier to writer lookup table
#[derive(Clone, Default)]
pub struct FormatRegistry {
    writers: HashMap<String, Arc<dyn FormatWriter>>,
}

impl FormatRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a writer, replacing any writer already bound to the identifier
    pub fn register(
        &mut self,
        identifier: impl Into<String>,
        writer: Arc<dyn FormatWriter>,
    ) -> Option<Arc<dyn FormatWriter>> {
        self.writers.insert(identifier.into(), writer)
    }

    /// Builder-style [`FormatRegistry::register`]
    pub fn with(mut self, identifier: impl Into<String>, writer: Arc<dyn FormatWriter>) -> Self {
        self.register(identifier, writer);
        self
    }

    /// Look up the writer for an identifier
    pub fn resolve(&self, identifier: &str) -> Result<Arc<dyn FormatWriter>> {
        self.writers
            .get(identifier)
            .cloned()
            .ok_or_else(|| ConduitError::UnsupportedFormat(identifier.to_string()))
    }

    /// Whether the identifier is registered
    pub fn contains(&self, identifier: &str) -> bool {
        self.writers.contains_key(identifier)
    }

    /// Registered identifiers, sorted
    pub fn identifiers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.writers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatRegistry")
            .field("formats", &self.identifiers())
            .finish()
    }
}
