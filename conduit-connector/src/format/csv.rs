//! CSV writer
//!
//! The header is the union of the batch's field names in first-seen order. Records missing a
//! field get an empty cell, nulls are empty, strings are written raw and nested values are
//! JSON-encoded.

use std::borrow::Cow;
use std::collections::HashSet;

use serde_json::Value;

use conduit_core::{ConduitError, FormatWriter, Record, Result};

/// Writes a batch as CSV with a header row
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvWriter;

impl CsvWriter {
    /// Field names across the batch, first-seen order
    pub fn header(records: &[Record]) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut header = Vec::new();
        for key in records.iter().flat_map(|r| r.keys()) {
            if seen.insert(key.as_str()) {
                header.push(key.as_str());
            }
        }
        header
    }
}

impl FormatWriter for CsvWriter {
    fn content_type(&self) -> &'static str {
        "text/csv"
    }

    fn write_batch(&self, records: &[Record]) -> Result<Vec<u8>> {
        let header = Self::header(records);
        let mut writer = csv::Writer::from_writer(Vec::new());

        writer.write_record(&header).map_err(csv_error)?;
        for record in records {
            let cells: Vec<Cow<'_, str>> = header.iter().map(|key| cell(record.get(*key))).collect();
            writer
                .write_record(cells.iter().map(|c| c.as_bytes()))
                .map_err(csv_error)?;
        }

        writer
            .into_inner()
            .map_err(|e| ConduitError::SinkWrite(format!("Failed to flush CSV: {}", e)))
    }
}

fn cell(value: Option<&Value>) -> Cow<'_, str> {
    match value {
        None | Some(Value::Null) => Cow::Borrowed(""),
        Some(Value::String(s)) => Cow::Borrowed(s),
        Some(other) => Cow::Owned(other.to_string()),
    }
}

fn csv_error(e: csv::Error) -> ConduitError {
    ConduitError::SinkWrite(format!("Failed to encode CSV: {}", e))
}
