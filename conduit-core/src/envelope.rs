//! Envelopes exchanged between connectors
//!
//! A [`BatchEnvelope`] carries one page of records plus provenance metadata from a source to
//! a sink. A [`StatusEnvelope`] is what a sink reports back for one write attempt.

use std::convert::TryFrom;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConduitError;

/// One record: field name to value, in the order the producer emitted the fields
pub type Record = Map<String, Value>;

/// Provenance attached to a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMetadata {
    /// Kind of the producing connector, e.g. `postgresql`
    pub source: String,

    /// Number of records in the batch
    pub batch_size: usize,

    /// Ordered field names, for tabular sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,

    /// Any further provenance the producer chose to add
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A page of records with its provenance
///
/// Immutable once built: `batch_size` in the metadata always equals the number of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBatchEnvelope")]
pub struct BatchEnvelope {
    data: Vec<Record>,
    metadata: BatchMetadata,
}

#[derive(Deserialize)]
struct RawBatchEnvelope {
    #[serde(default)]
    data: Vec<Record>,
    metadata: BatchMetadata,
}

impl TryFrom<RawBatchEnvelope> for BatchEnvelope {
    type Error = ConduitError;

    fn try_from(raw: RawBatchEnvelope) -> Result<Self, Self::Error> {
        if raw.data.len() != raw.metadata.batch_size {
            return Err(ConduitError::Configuration(format!(
                "batch envelope declares batch_size {} but carries {} records",
                raw.metadata.batch_size,
                raw.data.len()
            )));
        }
        Ok(Self {
            data: raw.data,
            metadata: raw.metadata,
        })
    }
}

impl BatchEnvelope {
    /// Build an envelope for records produced by `source`
    pub fn new(source: impl Into<String>, data: Vec<Record>) -> Self {
        let metadata = BatchMetadata {
            source: source.into(),
            batch_size: data.len(),
            columns: None,
            extra: Map::new(),
        };
        Self { data, metadata }
    }

    /// Attach the ordered column names of a tabular source
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.metadata.columns = Some(columns);
        self
    }

    /// Attach an extra provenance entry; `source`, `batch_size` and `columns` are reserved
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if !matches!(key.as_str(), "source" | "batch_size" | "columns") {
            self.metadata.extra.insert(key, value);
        }
        self
    }

    /// Records in the batch
    pub fn data(&self) -> &[Record] {
        &self.data
    }

    /// Batch provenance
    pub fn metadata(&self) -> &BatchMetadata {
        &self.metadata
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the batch carries no records
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Split into records and metadata
    pub fn into_parts(self) -> (Vec<Record>, BatchMetadata) {
        (self.data, self.metadata)
    }
}

/// Outcome of one sink invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum StatusEnvelope {
    /// The batch was persisted
    #[serde(rename = "success")]
    Success {
        /// Fully qualified location of the written artifact
        #[serde(rename = "file_location")]
        location: String,
        /// Records persisted
        records_written: usize,
        /// Metadata of the input batch, passed through
        metadata: BatchMetadata,
    },

    /// The batch was not persisted
    #[serde(rename = "error")]
    Failure {
        /// Description of the underlying cause
        #[serde(rename = "error")]
        error_description: String,
    },
}

impl StatusEnvelope {
    /// Whether this is a success
    pub fn is_success(&self) -> bool {
        matches!(self, StatusEnvelope::Success { .. })
    }

    /// Build a failure from an error, keeping its description
    pub fn failure(error: &ConduitError) -> Self {
        StatusEnvelope::Failure {
            error_description: error.to_string(),
        }
    }

    /// Location of the written artifact, when successful
    pub fn location(&self) -> Option<&str> {
        match self {
            StatusEnvelope::Success { location, .. } => Some(location),
            StatusEnvelope::Failure { .. } => None,
        }
    }
}
