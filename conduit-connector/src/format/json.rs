//! JSON array writer

use conduit_core::{ConduitError, FormatWriter, Record, Result};

/// Writes a batch as one pretty-printed JSON array (two-space indent)
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonWriter;

impl FormatWriter for JsonWriter {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn write_batch(&self, records: &[Record]) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(records)
            .map_err(|e| ConduitError::SinkWrite(format!("Failed to encode JSON: {}", e)))
    }
}
