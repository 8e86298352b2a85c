//! In-memory query backend
//!
//! Serves a fixed result set for every query. Used by tests and dry runs, and handy for
//! checking a pipeline's sink side without a database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use conduit_core::{ConduitError, Record, Result};

use super::backend::{ConnectionSettings, QueryBackend, QueryClient, RowCursor};

/// Counters shared between a backend and the clients it hands out
#[derive(Debug, Default)]
pub struct BackendStats {
    attempts: AtomicUsize,
    connects: AtomicUsize,
    closes: AtomicUsize,
    queries: AtomicUsize,
    fetches: AtomicUsize,
}

impl BackendStats {
    /// Successful connections
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Closed connections
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Opened cursors
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Fetch round trips, including the final empty one
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

/// Backend serving a fixed result set
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    columns: Vec<String>,
    rows: Arc<Vec<Record>>,
    connect_error: Option<String>,
    connect_failures: Option<usize>,
    fail_on_fetch: Option<(usize, String)>,
    stats: Arc<BackendStats>,
}

impl InMemoryBackend {
    /// Backend returning `rows` under the given column names
    pub fn new(columns: Vec<String>, rows: Vec<Record>) -> Self {
        Self {
            columns,
            rows: Arc::new(rows),
            ..Self::default()
        }
    }

    /// Refuse every connection with the given cause
    pub fn failing_connect(mut self, cause: impl Into<String>) -> Self {
        self.connect_error = Some(cause.into());
        self
    }

    /// Refuse only the first `attempts` connections with the given cause
    pub fn failing_first_connects(mut self, attempts: usize, cause: impl Into<String>) -> Self {
        self.connect_error = Some(cause.into());
        self.connect_failures = Some(attempts);
        self
    }

    /// Fail the fetch with the given zero-based index
    pub fn failing_fetch(mut self, fetch_index: usize, cause: impl Into<String>) -> Self {
        self.fail_on_fetch = Some((fetch_index, cause.into()));
        self
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<BackendStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl QueryBackend for InMemoryBackend {
    async fn connect(&self, settings: &ConnectionSettings) -> Result<Box<dyn QueryClient>> {
        let attempt = self.stats.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self.connect_failures.map_or(true, |failures| attempt < failures);
        if let (Some(cause), true) = (&self.connect_error, refused) {
            return Err(ConduitError::Connection(format!(
                "Failed to connect to PostgreSQL at {}:{}/{}: {}",
                settings.host, settings.port, settings.database, cause
            )));
        }
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryClient {
            backend: self.clone(),
        }))
    }
}

struct InMemoryClient {
    backend: InMemoryBackend,
}

#[async_trait]
impl QueryClient for InMemoryClient {
    async fn open_cursor<'a>(&'a self, _query: &str) -> Result<Box<dyn RowCursor + 'a>> {
        self.backend.stats.queries.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryCursor {
            backend: &self.backend,
            position: 0,
            fetches: 0,
        }))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.backend.stats.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct InMemoryCursor<'a> {
    backend: &'a InMemoryBackend,
    position: usize,
    fetches: usize,
}

#[async_trait]
impl RowCursor for InMemoryCursor<'_> {
    fn columns(&self) -> &[String] {
        &self.backend.columns
    }

    async fn fetch(&mut self, max_rows: usize) -> Result<Vec<Record>> {
        let index = self.fetches;
        self.fetches += 1;
        self.backend.stats.fetches.fetch_add(1, Ordering::SeqCst);

        if let Some((fail_at, cause)) = &self.backend.fail_on_fetch {
            if *fail_at == index {
                return Err(ConduitError::SourceExecution(format!(
                    "Error executing PostgreSQL query: {}",
                    cause
                )));
            }
        }

        let end = (self.position + max_rows).min(self.backend.rows.len());
        let page = self.backend.rows[self.position..end].to_vec();
        self.position = end;
        Ok(page)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
