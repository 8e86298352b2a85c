//! PostgreSQL source connector
//!
//! Runs one query and streams its result set as batch envelopes of at most `batch_size`
//! records. Pages are fetched on demand: nothing is read from the server until the consumer
//! asks for the next envelope.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, error, info};

use conduit_core::{
    BatchEnvelope, ConduitError, Connector, ConnectorConfig, ConnectorStream, ExecutionGuard,
    Lifecycle, LifecycleState, Result,
};

pub mod backend;
pub mod client;
pub mod memory;

pub use self::backend::{ConnectionSettings, QueryBackend, QueryClient, RowCursor};
pub use self::client::PostgresBackend;
pub use self::memory::{BackendStats, InMemoryBackend};

/// Connector type and the `source` tag written into batch metadata
pub const CONNECTOR_TYPE: &str = "postgresql";

/// Keys every PostgreSQL source configuration must carry, in check order
pub const REQUIRED_KEYS: [&str; 5] = ["host", "database", "username", "password", "query"];

/// Default server port
pub const DEFAULT_PORT: u16 = 5432;

/// Default page size
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Validated source settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    /// Where to connect
    pub connection: ConnectionSettings,
    /// Query whose result set is streamed
    pub query: String,
    /// Maximum records per envelope
    pub batch_size: usize,
}

impl SourceSettings {
    /// Parse and check a source configuration
    pub fn from_config(config: &ConnectorConfig) -> Result<Self> {
        config.require_keys(&REQUIRED_KEYS)?;

        let port = config.u64_or("port", u64::from(DEFAULT_PORT))?;
        let port = u16::try_from(port).map_err(|_| {
            ConduitError::Configuration(format!("Malformed config field: port ({} is out of range)", port))
        })?;

        let batch_size = config.u64_or("batch_size", DEFAULT_BATCH_SIZE as u64)?;
        if batch_size == 0 {
            return Err(ConduitError::Configuration(
                "Malformed config field: batch_size (must be at least 1)".to_string(),
            ));
        }
        let batch_size = usize::try_from(batch_size).map_err(|_| {
            ConduitError::Configuration(format!(
                "Malformed config field: batch_size ({} is too large)",
                batch_size
            ))
        })?;

        Ok(Self {
            connection: ConnectionSettings {
                host: config.require_str("host")?.to_string(),
                port,
                database: config.require_str("database")?.to_string(),
                username: config.require_str("username")?.to_string(),
                password: config.require_str("password")?.to_string(),
            },
            query: config.require_str("query")?.to_string(),
            batch_size,
        })
    }
}

/// PostgreSQL source connector
pub struct PostgresSourceConnector {
    config: ConnectorConfig,
    lifecycle: Lifecycle,
    backend: Arc<dyn QueryBackend>,
    settings: Option<SourceSettings>,
    client: Option<Box<dyn QueryClient>>,
}

impl PostgresSourceConnector {
    /// Source backed by a real PostgreSQL server
    pub fn new(config: ConnectorConfig) -> Self {
        Self::with_backend(config, Arc::new(PostgresBackend))
    }

    /// Source backed by any query backend
    pub fn with_backend(config: ConnectorConfig, backend: Arc<dyn QueryBackend>) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::new(CONNECTOR_TYPE),
            backend,
            settings: None,
            client: None,
        }
    }

    /// Settings, once validated
    pub fn settings(&self) -> Option<&SourceSettings> {
        self.settings.as_ref()
    }
}

#[async_trait]
impl Connector for PostgresSourceConnector {
    type Output = BatchEnvelope;

    fn connector_type(&self) -> &'static str {
        CONNECTOR_TYPE
    }

    fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    fn validate_config(&mut self) -> Result<()> {
        self.lifecycle.ensure_can_validate()?;
        self.settings = Some(SourceSettings::from_config(&self.config)?);
        self.lifecycle.mark_validated();
        Ok(())
    }

    async fn initialize(&mut self) -> Result<()> {
        self.lifecycle.ensure_can_initialize()?;
        let settings = self.settings.as_ref().ok_or_else(|| {
            ConduitError::Lifecycle("postgresql connector was validated without settings".to_string())
        })?;

        let client = match self.backend.connect(&settings.connection).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to PostgreSQL: {}", e);
                self.lifecycle.mark_failed();
                return Err(e);
            }
        };

        self.client = Some(client);
        self.lifecycle.mark_initialized();
        Ok(())
    }

    fn execute(
        &mut self,
        _input: Option<Arc<BatchEnvelope>>,
    ) -> Result<ConnectorStream<'_, BatchEnvelope>> {
        let guard = self.lifecycle.begin_execution()?;
        let (client, settings) = match (self.client.as_deref(), self.settings.as_ref()) {
            (Some(client), Some(settings)) => (client, settings),
            _ => {
                return Err(ConduitError::Lifecycle(
                    "postgresql connector has no open connection".to_string(),
                ))
            }
        };

        let pager = Pager {
            client,
            query: &settings.query,
            batch_size: settings.batch_size,
            cursor: None,
            columns: Vec::new(),
            pages: 0,
            _guard: guard,
        };

        Ok(stream::try_unfold(pager, Pager::next_page).boxed())
    }

    async fn cleanup(&mut self) -> Result<()> {
        if self.lifecycle.is_cleaned() {
            return Ok(());
        }
        self.lifecycle.mark_cleaned();

        match self.client.take() {
            Some(client) => client.close().await.map_err(|e| {
                error!("Failed to close PostgreSQL connection: {}", e);
                e
            }),
            None => Ok(()),
        }
    }
}

/// State of one execution: the cursor is opened on the first pull
struct Pager<'a> {
    client: &'a dyn QueryClient,
    query: &'a str,
    batch_size: usize,
    cursor: Option<Box<dyn RowCursor + 'a>>,
    columns: Vec<String>,
    pages: usize,
    _guard: ExecutionGuard<'a>,
}

impl<'a> Pager<'a> {
    async fn next_page(mut self) -> Result<Option<(BatchEnvelope, Self)>> {
        let mut cursor = match self.cursor.take() {
            Some(cursor) => cursor,
            None => {
                debug!("Executing PostgreSQL query: {}", self.query);
                let cursor = self.client.open_cursor(self.query).await.map_err(log_failure)?;
                self.columns = cursor.columns().to_vec();
                cursor
            }
        };

        let records = cursor.fetch(self.batch_size).await.map_err(log_failure)?;
        if records.is_empty() {
            cursor.close().await.map_err(log_failure)?;
            info!("PostgreSQL query exhausted after {} batches", self.pages);
            return Ok(None);
        }

        self.pages += 1;
        debug!("Fetched batch {} with {} records", self.pages, records.len());

        let envelope = BatchEnvelope::new(CONNECTOR_TYPE, records).with_columns(self.columns.clone());
        self.cursor = Some(cursor);
        Ok(Some((envelope, self)))
    }
}

fn log_failure(e: ConduitError) -> ConduitError {
    error!("Error executing PostgreSQL query: {}", e);
    e
}
