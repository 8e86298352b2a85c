//! Query backend seam for the PostgreSQL source
//!
//! The source connector only needs three things from a database: a connection, a forward-only
//! cursor over one query, and the column names of that query. [`QueryBackend`],
//! [`QueryClient`] and [`RowCursor`] describe exactly that, so the paging logic does not depend
//! on the wire protocol.

use async_trait::async_trait;

use conduit_core::{Record, Result};

/// Connection parameters for a query backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database name
    pub database: String,
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

/// Opens connections
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Connect; failures are reported as `ConduitError::Connection`
    async fn connect(&self, settings: &ConnectionSettings) -> Result<Box<dyn QueryClient>>;
}

/// One open connection
#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Run the query and position a cursor before its first row
    async fn open_cursor<'a>(&'a self, query: &str) -> Result<Box<dyn RowCursor + 'a>>;

    /// Close the connection
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Forward-only cursor over one query result
#[async_trait]
pub trait RowCursor: Send {
    /// Column names of the result, in projection order
    fn columns(&self) -> &[String];

    /// Fetch up to `max_rows` rows; an empty page means the result is exhausted
    async fn fetch(&mut self, max_rows: usize) -> Result<Vec<Record>>;

    /// Release the cursor
    async fn close(&mut self) -> Result<()>;
}
