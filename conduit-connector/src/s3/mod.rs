//! S3 sink connector
//!
//! Writes each incoming batch as one object under the configured prefix, in the configured
//! format. Write failures are reported as a `Failure` status, never as a stream error.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};

use conduit_core::{
    BatchEnvelope, ConduitError, Connector, ConnectorConfig, ConnectorStream, FormatRegistry,
    FormatWriter, Lifecycle, LifecycleState, Result, StatusEnvelope,
};

use crate::format::{default_formats, DEFAULT_FORMAT};

pub mod naming;

pub use self::naming::ArtifactNamer;

/// Connector type
pub const CONNECTOR_TYPE: &str = "s3";

/// Keys every S3 sink configuration must carry, in check order
pub const REQUIRED_KEYS: [&str; 2] = ["bucket_name", "key_prefix"];

/// Region used when none is configured
pub const DEFAULT_REGION: &str = "us-east-1";

/// Validated sink settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSettings {
    /// Target bucket
    pub bucket_name: String,
    /// Key prefix, without leading or trailing slashes
    pub key_prefix: String,
    /// Static access key; the environment's credential chain is used when absent
    pub access_key_id: Option<String>,
    /// Secret for `access_key_id`
    pub secret_access_key: Option<String>,
    /// Bucket region
    pub region: String,
    /// Custom endpoint for S3-compatible stores
    pub endpoint_url: Option<String>,
    /// Format identifier, resolved at write time
    pub format: String,
}

impl SinkSettings {
    /// Parse and check a sink configuration
    pub fn from_config(config: &ConnectorConfig) -> Result<Self> {
        config.require_keys(&REQUIRED_KEYS)?;

        let bucket_name = config.require_str("bucket_name")?;
        if bucket_name.trim().is_empty() {
            return Err(ConduitError::Configuration(
                "Malformed config field: bucket_name (must not be empty)".to_string(),
            ));
        }

        let access_key_id = config.optional_str("access_key_id")?;
        let secret_access_key = config.optional_str("secret_access_key")?;
        match (access_key_id, secret_access_key) {
            (Some(_), None) => {
                return Err(ConduitError::Configuration(
                    "Malformed config field: access_key_id (secret_access_key is missing)".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(ConduitError::Configuration(
                    "Malformed config field: secret_access_key (access_key_id is missing)".to_string(),
                ))
            }
            _ => {}
        }

        Ok(Self {
            bucket_name: bucket_name.to_string(),
            key_prefix: naming::normalize_prefix(config.require_str("key_prefix")?).to_string(),
            access_key_id: access_key_id.map(str::to_string),
            secret_access_key: secret_access_key.map(str::to_string),
            region: config.str_or("region", DEFAULT_REGION)?.to_string(),
            endpoint_url: config.optional_str("endpoint_url")?.map(str::to_string),
            format: config.str_or("format", DEFAULT_FORMAT)?.to_string(),
        })
    }
}

/// S3 sink connector
pub struct S3SinkConnector {
    config: ConnectorConfig,
    lifecycle: Lifecycle,
    formats: FormatRegistry,
    settings: Option<SinkSettings>,
    injected_store: Option<Arc<dyn ObjectStore>>,
    store: Option<Arc<dyn ObjectStore>>,
    namer: ArtifactNamer,
}

impl S3SinkConnector {
    /// Sink with the built-in formats, writing to S3
    pub fn new(config: ConnectorConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::new(CONNECTOR_TYPE),
            formats: default_formats(),
            settings: None,
            injected_store: None,
            store: None,
            namer: ArtifactNamer::new(),
        }
    }

    /// Write to the given store instead of building an S3 client
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.injected_store = Some(store);
        self
    }

    /// Register an additional format, or replace a built-in one
    pub fn with_format(mut self, identifier: impl Into<String>, writer: Arc<dyn FormatWriter>) -> Self {
        self.formats.register(identifier, writer);
        self
    }

    /// Formats this sink can write
    pub fn formats(&self) -> &FormatRegistry {
        &self.formats
    }

    /// Settings, once validated
    pub fn settings(&self) -> Option<&SinkSettings> {
        self.settings.as_ref()
    }
}

fn build_s3_store(settings: &SinkSettings) -> Result<Arc<dyn ObjectStore>> {
    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(&settings.bucket_name)
        .with_region(&settings.region);

    if let Some(endpoint) = &settings.endpoint_url {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(endpoint.starts_with("http://"));
    }

    if let (Some(key), Some(secret)) = (&settings.access_key_id, &settings.secret_access_key) {
        builder = builder
            .with_access_key_id(key)
            .with_secret_access_key(secret);
    }

    let store = builder
        .build()
        .map_err(|e| ConduitError::Connection(format!("Failed to create S3 client: {}", e)))?;

    Ok(Arc::new(store))
}

#[async_trait]
impl Connector for S3SinkConnector {
    type Output = StatusEnvelope;

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
        self.settings = Some(SinkSettings::from_config(&self.config)?);
        self.lifecycle.mark_validated();
        Ok(())
    }

    async fn initialize(&mut self) -> Result<()> {
        self.lifecycle.ensure_can_initialize()?;
        let settings = self.settings.as_ref().ok_or_else(|| {
            ConduitError::Lifecycle("s3 connector was validated without settings".to_string())
        })?;

        let store = match &self.injected_store {
            Some(store) => store.clone(),
            None => match build_s3_store(settings) {
                Ok(store) => store,
                Err(e) => {
                    error!("Failed to connect to S3: {}", e);
                    self.lifecycle.mark_failed();
                    return Err(e);
                }
            },
        };

        info!(
            "S3 sink ready for s3://{}/{} ({})",
            settings.bucket_name, settings.key_prefix, settings.format
        );
        self.store = Some(store);
        self.lifecycle.mark_initialized();
        Ok(())
    }

    fn execute(
        &mut self,
        input: Option<Arc<BatchEnvelope>>,
    ) -> Result<ConnectorStream<'_, StatusEnvelope>> {
        let guard = self.lifecycle.begin_execution()?;
        let (store, settings) = match (self.store.clone(), self.settings.as_ref()) {
            (Some(store), Some(settings)) => (store, settings),
            _ => {
                return Err(ConduitError::Lifecycle(
                    "s3 connector has no open store".to_string(),
                ))
            }
        };

        let batch = match input {
            Some(batch) if !batch.is_empty() => batch,
            _ => {
                warn!("No data to write to S3");
                return Ok(stream::empty().boxed());
            }
        };

        let key = self
            .namer
            .next_key(&settings.key_prefix, &settings.format, Utc::now());
        let request = WriteRequest {
            store,
            formats: &self.formats,
            bucket: &settings.bucket_name,
            format: &settings.format,
            key,
            batch,
        };

        Ok(stream::once(async move {
            let _guard = guard;
            Ok(request.run().await)
        })
        .boxed())
    }

    async fn cleanup(&mut self) -> Result<()> {
        if self.lifecycle.is_cleaned() {
            return Ok(());
        }
        self.lifecycle.mark_cleaned();
        if self.store.take().is_some() {
            info!("S3 sink closed");
        }
        Ok(())
    }
}

/// One batch bound for one object key
struct WriteRequest<'a> {
    store: Arc<dyn ObjectStore>,
    formats: &'a FormatRegistry,
    bucket: &'a str,
    format: &'a str,
    key: String,
    batch: Arc<BatchEnvelope>,
}

impl WriteRequest<'_> {
    async fn run(self) -> StatusEnvelope {
        match self.write().await {
            Ok(location) => {
                info!("Wrote {} records to {}", self.batch.len(), location);
                StatusEnvelope::Success {
                    location,
                    records_written: self.batch.len(),
                    metadata: self.batch.metadata().clone(),
                }
            }
            Err(e) => {
                error!("Failed to write batch to S3: {}", e);
                StatusEnvelope::failure(&e)
            }
        }
    }

    async fn write(&self) -> Result<String> {
        let writer = self.formats.resolve(self.format)?;
        let bytes = writer.write_batch(self.batch.data())?;
        let location = format!("s3://{}/{}", self.bucket, self.key);

        debug!(
            "Uploading {} bytes ({}) to {}",
            bytes.len(),
            writer.content_type(),
            location
        );

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, writer.content_type().into());
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&ObjectPath::from(self.key.as_str()), PutPayload::from(bytes), options)
            .await
            .map_err(|e| ConduitError::SinkWrite(format!("Failed to upload to {}: {}", location, e)))?;

        Ok(location)
    }
}
