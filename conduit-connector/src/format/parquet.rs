//! Parquet writer
//!
//! The Arrow schema is inferred from the batch itself: columns appear in first-seen order,
//! booleans, integers, floats and strings map to their Arrow types, a column holding integers
//! above `i64::MAX` maps to uint64 unless it also holds negatives, and a column mixing integers and floats widens to float64 as long as every
//! integer in it is exact as a float. Anything else (nested values, mixed types, wide integers
//! mixed with floats) is stored as its JSON text. A column that is null everywhere becomes a
//! nullable string.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::builder::{
    BooleanBuilder, Float64Builder, Int64Builder, StringBuilder, UInt64Builder,
};
use arrow_array::{ArrayRef, RecordBatch, RecordBatchOptions};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::Value;

use conduit_core::{ConduitError, FormatWriter, Record, Result};

/// Integers up to this magnitude survive a round trip through f64
const MAX_EXACT_FLOAT_INT: u64 = 1 << 53;

/// Writes a batch as a single-row-group Parquet file
#[derive(Debug, Clone, Copy)]
pub struct ParquetWriter {
    compression: Compression,
}

impl Default for ParquetWriter {
    fn default() -> Self {
        Self {
            compression: Compression::SNAPPY,
        }
    }
}

impl ParquetWriter {
    /// Writer using the given codec
    pub fn with_compression(compression: Compression) -> Self {
        Self { compression }
    }

    /// Infer the Arrow schema of a batch
    pub fn infer_schema(records: &[Record]) -> Schema {
        let mut columns: Vec<InferredColumn<'_>> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();

        for (key, value) in records.iter().flat_map(|r| r.iter()) {
            let inferred = infer_type(value);
            let exact = is_exact_float(value);
            let negative = value.as_i64().map_or(false, |i| i < 0);
            match positions.get(key.as_str()) {
                Some(&idx) => {
                    let column = &mut columns[idx];
                    column.data_type = merge_types(column.data_type.take(), inferred);
                    column.exact_as_float &= exact;
                    column.has_negative |= negative;
                }
                None => {
                    positions.insert(key.as_str(), columns.len());
                    columns.push(InferredColumn {
                        name: key.as_str(),
                        data_type: inferred,
                        exact_as_float: exact,
                        has_negative: negative,
                    });
                }
            }
        }

        let fields: Vec<Field> = columns
            .into_iter()
            .map(|column| {
                let data_type = match column.data_type {
                    Some(DataType::Float64) if !column.exact_as_float => DataType::Utf8,
                    Some(DataType::UInt64) if column.has_negative => DataType::Utf8,
                    Some(ty) => ty,
                    None => DataType::Utf8,
                };
                Field::new(column.name, data_type, true)
            })
            .collect();
        Schema::new(fields)
    }
}

impl FormatWriter for ParquetWriter {
    fn content_type(&self) -> &'static str {
        "application/vnd.apache.parquet"
    }

    fn write_batch(&self, records: &[Record]) -> Result<Vec<u8>> {
        let schema = Arc::new(Self::infer_schema(records));
        let columns: Vec<ArrayRef> = schema
            .fields()
            .iter()
            .map(|field| build_array(records, field.name(), field.data_type()))
            .collect();

        let options = RecordBatchOptions::new().with_row_count(Some(records.len()));
        let batch = RecordBatch::try_new_with_options(schema.clone(), columns, &options)
            .map_err(|e| parquet_error(&e))?;

        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .build();

        let mut buffer = Vec::new();
        let mut writer =
            ArrowWriter::try_new(&mut buffer, schema, Some(props)).map_err(|e| parquet_error(&e))?;
        writer.write(&batch).map_err(|e| parquet_error(&e))?;
        writer.close().map_err(|e| parquet_error(&e))?;

        Ok(buffer)
    }
}

struct InferredColumn<'a> {
    name: &'a str,
    data_type: Option<DataType>,
    /// Every integer seen so far is exact as f64
    exact_as_float: bool,
    has_negative: bool,
}

/// `None` for null, which carries no type information
fn infer_type(value: &Value) -> Option<DataType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(DataType::Boolean),
        Value::Number(n) if n.is_i64() => Some(DataType::Int64),
        Value::Number(n) if n.is_u64() => Some(DataType::UInt64),
        Value::Number(_) => Some(DataType::Float64),
        Value::String(_) | Value::Array(_) | Value::Object(_) => Some(DataType::Utf8),
    }
}

fn is_exact_float(value: &Value) -> bool {
    match value {
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => i.unsigned_abs() <= MAX_EXACT_FLOAT_INT,
            (None, Some(u)) => u <= MAX_EXACT_FLOAT_INT,
            (None, None) => true,
        },
        _ => true,
    }
}

fn merge_types(a: Option<DataType>, b: Option<DataType>) -> Option<DataType> {
    match (a, b) {
        (None, t) | (t, None) => t,
        (Some(a), Some(b)) if a == b => Some(a),
        (Some(DataType::Int64), Some(DataType::UInt64))
        | (Some(DataType::UInt64), Some(DataType::Int64)) => Some(DataType::UInt64),
        (Some(DataType::Int64 | DataType::UInt64), Some(DataType::Float64))
        | (Some(DataType::Float64), Some(DataType::Int64 | DataType::UInt64)) => {
            Some(DataType::Float64)
        }
        _ => Some(DataType::Utf8),
    }
}

fn build_array(records: &[Record], name: &str, data_type: &DataType) -> ArrayRef {
    match data_type {
        DataType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(records.len());
            for record in records {
                builder.append_option(record.get(name).and_then(Value::as_bool));
            }
            Arc::new(builder.finish())
        }
        DataType::Int64 => {
            let mut builder = Int64Builder::with_capacity(records.len());
            for record in records {
                builder.append_option(record.get(name).and_then(Value::as_i64));
            }
            Arc::new(builder.finish())
        }
        DataType::UInt64 => {
            let mut builder = UInt64Builder::with_capacity(records.len());
            for record in records {
                builder.append_option(record.get(name).and_then(Value::as_u64));
            }
            Arc::new(builder.finish())
        }
        DataType::Float64 => {
            let mut builder = Float64Builder::with_capacity(records.len());
            for record in records {
                builder.append_option(record.get(name).and_then(Value::as_f64));
            }
            Arc::new(builder.finish())
        }
        _ => {
            let mut builder = StringBuilder::new();
            for record in records {
                match record.get(name) {
                    None | Some(Value::Null) => builder.append_null(),
                    Some(Value::String(s)) => builder.append_value(s),
                    Some(other) => builder.append_value(other.to_string()),
                }
            }
            Arc::new(builder.finish())
        }
    }
}

fn parquet_error(e: &dyn std::fmt::Display) -> ConduitError {
    ConduitError::SinkWrite(format!("Failed to encode Parquet: {}", e))
}
