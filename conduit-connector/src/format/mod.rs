//! Built-in format writers
//!
//! Each writer turns one batch of records into one artifact. The identifier a writer is
//! registered under doubles as the artifact's file extension.

pub mod csv;
pub mod json;
pub mod parquet;

use std::sync::Arc;

use conduit_core::FormatRegistry;

pub use self::csv::CsvWriter;
pub use self::json::JsonWriter;
pub use self::parquet::ParquetWriter;

/// Format used when a sink does not name one
pub const DEFAULT_FORMAT: &str = "parquet";

/// Registry with `parquet`, `json` and `csv`
pub fn default_formats() -> FormatRegistry {
    FormatRegistry::new()
        .with("parquet", Arc::new(ParquetWriter::default()))
        .with("json", Arc::new(JsonWriter))
        .with("csv", Arc::new(CsvWriter))
}
