//! tokio-postgres implementation of the query backend
//!
//! Paging uses a server-side cursor: the query is declared inside a transaction and read with
//! `FETCH FORWARD n`, so only one page is held in memory at a time.
//!
//! Columns whose type has a native JSON mapping are decoded directly. Every other column
//! (numeric, interval, bytea, arrays, enums, ...) is cast to text on the server, so its value
//! arrives in PostgreSQL's own text form instead of being lost.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use log::{debug, error, info};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, NoTls, Row};
use uuid::Uuid;

use conduit_core::{ConduitError, Record, Result};

use super::backend::{ConnectionSettings, QueryBackend, QueryClient, RowCursor};

/// Connects to PostgreSQL with tokio-postgres
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresBackend;

#[async_trait]
impl QueryBackend for PostgresBackend {
    async fn connect(&self, settings: &ConnectionSettings) -> Result<Box<dyn QueryClient>> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&settings.host)
            .port(settings.port)
            .dbname(&settings.database)
            .user(&settings.username)
            .password(&settings.password);

        let (client, connection) = config.connect(NoTls).await.map_err(|e| {
            ConduitError::Connection(format!(
                "Failed to connect to PostgreSQL at {}:{}/{}: {}",
                settings.host, settings.port, settings.database, e
            ))
        })?;

        // Drive the connection in the background
        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        info!(
            "PostgreSQL connection established to {}:{}/{}",
            settings.host, settings.port, settings.database
        );

        Ok(Box::new(PostgresClient {
            client,
            connection,
            cursor_open: AtomicBool::new(false),
            next_cursor: AtomicU64::new(0),
        }))
    }
}

/// Open PostgreSQL connection
pub struct PostgresClient {
    client: Client,
    connection: JoinHandle<()>,
    /// A cursor transaction was started and not yet committed
    cursor_open: AtomicBool,
    next_cursor: AtomicU64,
}

#[async_trait]
impl QueryClient for PostgresClient {
    async fn open_cursor<'a>(&'a self, query: &str) -> Result<Box<dyn RowCursor + 'a>> {
        let query = query.trim().trim_end_matches(';');

        // A previous stream was dropped before exhaustion
        if self.cursor_open.swap(false, Ordering::SeqCst) {
            debug!("Rolling back abandoned cursor transaction");
            self.client.batch_execute("ROLLBACK").await.map_err(query_error)?;
        }

        let statement = self.client.prepare(query).await.map_err(query_error)?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let native: Vec<bool> = statement
            .columns()
            .iter()
            .map(|c| is_native(c.type_()))
            .collect();

        let query = match text_cast_query(query, &columns, &native) {
            Some(wrapped) => {
                debug!("Casting non-native columns to text: {}", wrapped);
                wrapped
            }
            None => query.to_string(),
        };

        let name = format!(
            "conduit_cursor_{}",
            self.next_cursor.fetch_add(1, Ordering::SeqCst)
        );
        self.cursor_open.store(true, Ordering::SeqCst);
        self.client
            .batch_execute(&format!("BEGIN; DECLARE {} NO SCROLL CURSOR FOR {}", name, query))
            .await
            .map_err(query_error)?;

        debug!("Declared cursor {} for query: {}", name, query);

        Ok(Box::new(PostgresCursor {
            client: self,
            name,
            columns,
            closed: false,
        }))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let PostgresClient {
            client, connection, ..
        } = *self;

        // Dropping the client ends the connection task
        drop(client);
        connection.await.map_err(|e| {
            ConduitError::Connection(format!("PostgreSQL connection task failed: {}", e))
        })?;

        info!("PostgreSQL connection closed");
        Ok(())
    }
}

/// Server-side cursor inside a transaction
struct PostgresCursor<'a> {
    client: &'a PostgresClient,
    name: String,
    columns: Vec<String>,
    closed: bool,
}

#[async_trait]
impl RowCursor for PostgresCursor<'_> {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn fetch(&mut self, max_rows: usize) -> Result<Vec<Record>> {
        let rows = self
            .client
            .client
            .query(&format!("FETCH FORWARD {} FROM {}", max_rows, self.name), &[])
            .await
            .map_err(query_error)?;

        rows.iter().map(row_to_record).collect()
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.client
            .client
            .batch_execute(&format!("CLOSE {}; COMMIT", self.name))
            .await
            .map_err(query_error)?;
        self.client.cursor_open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn query_error(e: tokio_postgres::Error) -> ConduitError {
    ConduitError::SourceExecution(format!("Error executing PostgreSQL query: {}", e))
}

/// Types decoded directly into JSON values
fn is_native(ty: &Type) -> bool {
    [
        Type::BOOL,
        Type::INT2,
        Type::INT4,
        Type::INT8,
        Type::OID,
        Type::FLOAT4,
        Type::FLOAT8,
        Type::TIMESTAMP,
        Type::TIMESTAMPTZ,
        Type::DATE,
        Type::TIME,
        Type::UUID,
        Type::JSON,
        Type::JSONB,
        Type::TEXT,
        Type::VARCHAR,
        Type::BPCHAR,
        Type::NAME,
    ]
    .contains(ty)
}

/// Wrap `query` so every non-native column is read as text; `None` when nothing needs a cast
fn text_cast_query(query: &str, columns: &[String], native: &[bool]) -> Option<String> {
    if native.iter().all(|&n| n) {
        return None;
    }

    let select: Vec<String> = columns
        .iter()
        .zip(native)
        .map(|(name, &native)| {
            let quoted = quote_ident(name);
            if native {
                quoted
            } else {
                format!("{}::text AS {}", quoted, quoted)
            }
        })
        .collect();

    Some(format!(
        "SELECT {} FROM ({}) AS conduit_source",
        select.join(", "),
        query
    ))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Convert a PostgreSQL row to a record, keeping column order
fn row_to_record(row: &Row) -> Result<Record> {
    let mut record = Record::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = column_value(row, idx, column.type_()).map_err(|e| {
            ConduitError::SourceExecution(format!(
                "Cannot read column {} of type {}: {}",
                column.name(),
                column.type_(),
                e
            ))
        })?;
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

fn column_value(
    row: &Row,
    idx: usize,
    ty: &Type,
) -> std::result::Result<Value, tokio_postgres::Error> {
    let value = if *ty == Type::BOOL {
        get::<bool>(row, idx)
    } else if *ty == Type::INT2 {
        get::<i16>(row, idx)
    } else if *ty == Type::INT4 {
        get::<i32>(row, idx)
    } else if *ty == Type::INT8 {
        get::<i64>(row, idx)
    } else if *ty == Type::OID {
        get::<u32>(row, idx)
    } else if *ty == Type::FLOAT4 {
        get::<f32>(row, idx)
    } else if *ty == Type::FLOAT8 {
        get::<f64>(row, idx)
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(idx)
            .map(|v| v.map(|ts| Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())))
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(idx)
            .map(|v| v.map(|ts| Value::String(ts.to_rfc3339())))
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<NaiveDate>>(idx)
            .map(|v| v.map(|d| Value::String(d.to_string())))
    } else if *ty == Type::TIME {
        row.try_get::<_, Option<NaiveTime>>(idx)
            .map(|v| v.map(|t| Value::String(t.to_string())))
    } else if *ty == Type::UUID {
        row.try_get::<_, Option<Uuid>>(idx)
            .map(|v| v.map(|u| Value::String(u.to_string())))
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<Value>>(idx)
    } else {
        // Text-like columns, including the ones cast to text
        get::<String>(row, idx)
    }?;

    Ok(value.unwrap_or(Value::Null))
}

fn get<'a, T>(row: &'a Row, idx: usize) -> std::result::Result<Option<Value>, tokio_postgres::Error>
where
    T: FromSql<'a> + Into<Value>,
{
    row.try_get::<_, Option<T>>(idx).map(|v| v.map(Into::into))
}
