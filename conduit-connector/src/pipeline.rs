//! Pipeline driver
//!
//! Drives one source into any number of sinks. Each batch the source yields is handed to every
//! sink in declared order before the next batch is pulled, so at most one batch is in flight.

use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use conduit_core::{BoxSink, BoxSource, Result, StatusEnvelope};

/// What a sink reported for one batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkOutcome {
    /// Position of the sink in the pipeline
    pub sink_index: usize,
    /// Sink connector type
    pub sink_type: String,
    /// Zero-based index of the batch
    pub batch_index: usize,
    /// Reported status
    #[serde(flatten)]
    pub status: StatusEnvelope,
}

/// Summary of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineReport {
    /// Batches pulled from the source
    pub batches_read: usize,
    /// Records across those batches
    pub records_read: usize,
    /// Sink statuses, in the order they were produced
    pub outcomes: Vec<SinkOutcome>,
    /// The run stopped early on request
    pub cancelled: bool,
}

impl PipelineReport {
    /// Successful writes
    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_success()).count()
    }

    /// Failed writes
    pub fn failures(&self) -> usize {
        self.outcomes.len() - self.successes()
    }

    /// Records persisted across all sinks
    pub fn records_written(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match &o.status {
                StatusEnvelope::Success { records_written, .. } => *records_written,
                StatusEnvelope::Failure { .. } => 0,
            })
            .sum()
    }
}

/// Progress after each batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineProgress {
    /// Batches pulled so far
    pub batches_read: usize,
    /// Records pulled so far
    pub records_read: usize,
}

/// Source to sinks driver
pub struct Pipeline {
    name: String,
    cancel: Option<CancellationToken>,
    progress_callback: Option<Box<dyn Fn(PipelineProgress) + Send + Sync>>,
}

impl Pipeline {
    /// Driver with the given name, used in logs
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cancel: None,
            progress_callback: None,
        }
    }

    /// Stop pulling batches once the token is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Receive progress after every batch
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(PipelineProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Pipeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check every connector's configuration without acquiring resources
    ///
    /// Reports the first invalid connector.
    pub fn validate(source: &mut BoxSource, sinks: &mut [BoxSink]) -> Result<()> {
        source.validate_config()?;
        for sink in sinks.iter_mut() {
            sink.validate_config()?;
        }
        Ok(())
    }

    /// Open every connector, move all batches, then clean everything up
    ///
    /// If a connector fails to open, the ones already opened are cleaned up and the error is
    /// returned. A source error stops the run; it is returned after cleanup. Sink failures are
    /// recorded in the report and do not stop the run.
    pub async fn run(&self, source: &mut BoxSource, sinks: &mut [BoxSink]) -> Result<PipelineReport> {
        info!("Starting pipeline {}", self.name);

        if let Err(e) = open_all(source, sinks).await {
            error!("Pipeline {} failed to start: {}", self.name, e);
            if let Err(cleanup_err) = cleanup_all(source, sinks).await {
                warn!("Cleanup after failed start also failed: {}", cleanup_err);
            }
            return Err(e);
        }

        let mut report = PipelineReport::default();
        let outcome = self.drive(source, sinks, &mut report).await;
        let cleanup = cleanup_all(source, sinks).await;

        if let Err(e) = outcome {
            error!(
                "Pipeline {} stopped after {} batches: {} ({})",
                self.name,
                report.batches_read,
                e,
                e.kind()
            );
            return Err(e);
        }
        cleanup?;

        info!(
            "Pipeline {} finished: {} batches, {} records read, {} writes succeeded, {} failed{}",
            self.name,
            report.batches_read,
            report.records_read,
            report.successes(),
            report.failures(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    async fn drive(
        &self,
        source: &mut BoxSource,
        sinks: &mut [BoxSink],
        report: &mut PipelineReport,
    ) -> Result<()> {
        let mut batches = source.execute(None)?;

        loop {
            if self.is_cancelled() {
                info!("Pipeline {} cancelled", self.name);
                report.cancelled = true;
                break;
            }

            let batch = match batches.next().await {
                Some(batch) => Arc::new(batch?),
                None => break,
            };

            let batch_index = report.batches_read;
            report.batches_read += 1;
            report.records_read += batch.len();
            debug!("Batch {} carries {} records", batch_index, batch.len());

            for (sink_index, sink) in sinks.iter_mut().enumerate() {
                let sink_type = sink.connector_type();
                let statuses: Vec<StatusEnvelope> =
                    sink.execute(Some(batch.clone()))?.try_collect().await?;

                for status in statuses {
                    if let StatusEnvelope::Failure { error_description } = &status {
                        warn!(
                            "Sink {} ({}) failed on batch {}: {}",
                            sink_index, sink_type, batch_index, error_description
                        );
                    }
                    report.outcomes.push(SinkOutcome {
                        sink_index,
                        sink_type: sink_type.to_string(),
                        batch_index,
                        status,
                    });
                }
            }

            if let Some(callback) = &self.progress_callback {
                callback(PipelineProgress {
                    batches_read: report.batches_read,
                    records_read: report.records_read,
                });
            }
        }

        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, CancellationToken::is_cancelled)
    }
}

async fn open_all(source: &mut BoxSource, sinks: &mut [BoxSink]) -> Result<()> {
    source.open().await?;
    for sink in sinks.iter_mut() {
        sink.open().await?;
    }
    Ok(())
}

/// Clean up every connector, returning the first error
async fn cleanup_all(source: &mut BoxSource, sinks: &mut [BoxSink]) -> Result<()> {
    let mut first_error = None;

    let results = std::iter::once(source.cleanup().await);
    let mut sink_results = Vec::with_capacity(sinks.len());
    for sink in sinks.iter_mut() {
        sink_results.push(sink.cleanup().await);
    }

    for result in results.chain(sink_results) {
        if let Err(e) = result {
            error!("Cleanup failed: {}", e);
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postgres::{InMemoryBackend, PostgresSourceConnector};
    use crate::s3::S3SinkConnector;
    use conduit_core::{ConduitError, ConnectorConfig, LifecycleState, Record};
    use object_store::memory::InMemory;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn source_config(batch_size: usize) -> ConnectorConfig {
        ConnectorConfig::from_value(json!({
            "host": "localhost",
            "database": "shop",
            "username": "etl",
            "password": "secret",
            "query": "SELECT id FROM orders",
            "batch_size": batch_size
        }))
        .unwrap()
    }

    fn sink_config(format: &str) -> ConnectorConfig {
        ConnectorConfig::from_value(json!({
            "bucket_name": "b",
            "key_prefix": "p",
            "format": format
        }))
        .unwrap()
    }

    fn rows(count: usize) -> Vec<Record> {
        (0..count)
            .map(|i| json!({"id": i}).as_object().cloned().unwrap())
            .collect()
    }

    fn source(backend: InMemoryBackend, batch_size: usize) -> BoxSource {
        Box::new(PostgresSourceConnector::with_backend(
            source_config(batch_size),
            Arc::new(backend),
        ))
    }

    fn sink(format: &str) -> BoxSink {
        Box::new(S3SinkConnector::new(sink_config(format)).with_store(Arc::new(InMemory::new())))
    }

    #[tokio::test]
    async fn test_fan_out() {
        let backend = InMemoryBackend::new(vec!["id".into()], rows(5));
        let stats = backend.stats();
        let mut source = source(backend, 2);
        let mut sinks = vec![sink("json"), sink("xml")];

        let progress = Arc::new(AtomicUsize::new(0));
        let seen = progress.clone();
        let report = Pipeline::new("orders")
            .with_progress_callback(move |p| seen.store(p.records_read, Ordering::SeqCst))
            .run(&mut source, &mut sinks)
            .await
            .unwrap();

        assert_eq!(report.batches_read, 3);
        assert_eq!(report.records_read, 5);
        assert_eq!(report.outcomes.len(), 6);
        assert_eq!(report.successes(), 3);
        assert_eq!(report.failures(), 3);
        assert_eq!(report.records_written(), 5);
        assert!(!report.cancelled);
        assert_eq!(progress.load(Ordering::SeqCst), 5);

        assert!(report
            .outcomes
            .iter()
            .filter(|o| o.sink_index == 1)
            .all(|o| !o.status.is_success() && o.sink_type == "s3"));

        assert_eq!(source.state(), LifecycleState::Cleaned);
        assert!(sinks.iter().all(|s| s.state() == LifecycleState::Cleaned));
        assert_eq!(stats.closes(), 1);
    }

    #[tokio::test]
    async fn test_source_error_surfaces_after_cleanup() {
        let backend = InMemoryBackend::new(vec!["id".into()], rows(5)).failing_fetch(1, "connection reset");
        let stats = backend.stats();
        let mut source = source(backend, 2);
        let mut sinks = vec![sink("csv")];

        let err = Pipeline::new("orders")
            .run(&mut source, &mut sinks)
            .await
            .unwrap_err();

        assert!(matches!(err, ConduitError::SourceExecution(_)));
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(stats.closes(), 1);
        assert_eq!(sinks[0].state(), LifecycleState::Cleaned);
    }

    #[tokio::test]
    async fn test_failed_open_cleans_up_opened_connectors() {
        let backend = InMemoryBackend::new(vec!["id".into()], rows(1));
        let stats = backend.stats();
        let mut source = source(backend, 2);
        let mut sinks: Vec<BoxSink> = vec![
            sink("json"),
            Box::new(S3SinkConnector::new(ConnectorConfig::default())),
        ];

        let err = Pipeline::new("orders")
            .run(&mut source, &mut sinks)
            .await
            .unwrap_err();

        assert!(matches!(err, ConduitError::Configuration(_)));
        assert!(err.to_string().contains("bucket_name"));
        assert_eq!(stats.connects(), 1);
        assert_eq!(stats.closes(), 1);
        assert_eq!(stats.queries(), 0);
        assert_eq!(sinks[0].state(), LifecycleState::Cleaned);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_batch() {
        let backend = InMemoryBackend::new(vec!["id".into()], rows(10));
        let stats = backend.stats();
        let mut source = source(backend, 2);
        let mut sinks = vec![sink("json")];

        let token = CancellationToken::new();
        token.cancel();

        let report = Pipeline::new("orders")
            .with_cancellation(token)
            .run(&mut source, &mut sinks)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.batches_read, 0);
        assert_eq!(stats.queries(), 0);
        assert_eq!(stats.closes(), 1);
    }

    #[tokio::test]
    async fn test_cancel_between_batches() {
        let backend = InMemoryBackend::new(vec!["id".into()], rows(10));
        let mut source = source(backend, 2);
        let mut sinks = vec![sink("json")];

        let token = CancellationToken::new();
        let trigger = token.clone();
        let report = Pipeline::new("orders")
            .with_cancellation(token)
            .with_progress_callback(move |p| {
                if p.batches_read == 2 {
                    trigger.cancel();
                }
            })
            .run(&mut source, &mut sinks)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.batches_read, 2);
        assert_eq!(report.records_read, 4);
    }

    #[test]
    fn test_validate() {
        let mut source = source(InMemoryBackend::default(), 2);
        let mut sinks = vec![sink("parquet")];
        Pipeline::validate(&mut source, &mut sinks).unwrap();

        let mut source: BoxSource = Box::new(PostgresSourceConnector::new(ConnectorConfig::default()));
        let err = Pipeline::validate(&mut source, &mut sinks).unwrap_err();
        assert!(err.to_string().contains("host"));
    }

    #[test]
    fn test_report_serialization() {
        let report = PipelineReport {
            batches_read: 1,
            records_read: 2,
            outcomes: vec![SinkOutcome {
                sink_index: 0,
                sink_type: "s3".into(),
                batch_index: 0,
                status: StatusEnvelope::Failure {
                    error_description: "Unsupported format: xml".into(),
                },
            }],
            cancelled: false,
        };

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["outcomes"][0]["status"], "error");
        assert_eq!(value["outcomes"][0]["error"], "Unsupported format: xml");
        assert_eq!(value["outcomes"][0]["sink_type"], "s3");
    }
}
