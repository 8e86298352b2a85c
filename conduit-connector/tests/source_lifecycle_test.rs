//! Integration tests for connector lifecycles
//!
//! Drives the PostgreSQL source and the S3 sink through boxed `Connector` trait objects, with
//! in-memory backends in place of the real services.

use std::sync::Arc;

use futures::TryStreamExt;
use object_store::memory::InMemory;
use serde_json::json;

use conduit_connector::postgres::InMemoryBackend;
use conduit_connector::{PostgresSourceConnector, S3SinkConnector};
use conduit_core::{
    BatchEnvelope, BoxSink, BoxSource, ConduitError, ConnectorConfig, LifecycleState, Record,
    StatusEnvelope,
};

fn customers(count: usize) -> Vec<Record> {
    (1..=count)
        .map(|id| {
            json!({"id": id, "email": format!("user{}@example.com", id), "vip": id % 2 == 0})
                .as_object()
                .cloned()
                .unwrap()
        })
        .collect()
}

fn source_config(batch_size: usize) -> ConnectorConfig {
    ConnectorConfig::from_value(json!({
        "host": "db.internal",
        "port": "6432",
        "database": "crm",
        "username": "reader",
        "password": "hunter2",
        "query": "SELECT id, email, vip FROM customers ORDER BY id",
        "batch_size": batch_size,
        "application_name": "ignored"
    }))
    .unwrap()
}

fn source(backend: InMemoryBackend, batch_size: usize) -> BoxSource {
    Box::new(PostgresSourceConnector::with_backend(
        source_config(batch_size),
        Arc::new(backend),
    ))
}

fn backend(count: usize) -> InMemoryBackend {
    InMemoryBackend::new(
        vec!["id".into(), "email".into(), "vip".into()],
        customers(count),
    )
}

#[tokio::test]
async fn test_source_full_lifecycle() {
    let backend = backend(5);
    let stats = backend.stats();
    let mut source = source(backend, 2);

    assert_eq!(source.state(), LifecycleState::Unconfigured);
    source.validate_config().unwrap();
    assert_eq!(source.state(), LifecycleState::Validated);
    source.initialize().await.unwrap();
    assert_eq!(source.state(), LifecycleState::Initialized);

    {
        let stream = source.execute(None).unwrap();
        let batches: Vec<BatchEnvelope> = stream.try_collect().await.unwrap();

        let sizes: Vec<usize> = batches.iter().map(BatchEnvelope::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(batches.iter().all(|b| b.metadata().columns.as_ref().map(Vec::len) == Some(3)));

        let all: Vec<Record> = batches.into_iter().flat_map(|b| b.into_parts().0).collect();
        assert_eq!(all, customers(5));
    }

    source.cleanup().await.unwrap();
    source.cleanup().await.unwrap();
    assert_eq!(stats.connects(), 1);
    assert_eq!(stats.closes(), 1);

    let err = source.execute(None).err().unwrap();
    assert!(matches!(err, ConduitError::Lifecycle(_)));
    assert_eq!(err.kind(), "LifecycleError");
}

#[tokio::test]
async fn test_source_ignores_upstream_input() {
    let mut source = source(backend(3), 10);
    source.open().await.unwrap();

    let upstream = Arc::new(BatchEnvelope::new("s3", customers(1)));
    let batches: Vec<BatchEnvelope> = source
        .execute(Some(upstream))
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 3);
    assert_eq!(batches[0].metadata().source, "postgresql");
}

#[tokio::test]
async fn test_source_connection_failure() {
    let backend = backend(3).failing_connect("no pg_hba.conf entry for host");
    let stats = backend.stats();
    let mut source = source(backend, 10);

    let err = source.open().await.unwrap_err();
    assert!(matches!(err, ConduitError::Connection(_)));
    assert!(err.is_fatal());
    assert!(err.to_string().contains("db.internal:6432/crm"));
    assert!(err.to_string().contains("pg_hba.conf"));
    assert_eq!(source.state(), LifecycleState::Failed);

    source.cleanup().await.unwrap();
    assert_eq!(stats.closes(), 0);
    assert_eq!(source.state(), LifecycleState::Cleaned);
}

#[tokio::test]
async fn test_source_fetch_failure_keeps_earlier_batches() {
    let mut source = source(backend(10).failing_fetch(2, "could not serialize access"), 3);
    source.open().await.unwrap();

    let mut stream = source.execute(None).unwrap();
    let mut received = Vec::new();
    let err = loop {
        match stream.try_next().await {
            Ok(Some(batch)) => received.push(batch),
            Ok(None) => panic!("stream ended without error"),
            Err(e) => break e,
        }
    };
    drop(stream);

    assert_eq!(received.len(), 2);
    assert_eq!(err.kind(), "SourceExecutionError");
    assert!(err.to_string().contains("could not serialize access"));
}

#[tokio::test]
async fn test_sink_full_lifecycle() {
    let store = Arc::new(InMemory::new());
    let mut sink: BoxSink = Box::new(
        S3SinkConnector::new(
            ConnectorConfig::from_value(json!({
                "bucket_name": "analytics",
                "key_prefix": "crm/customers/",
                "format": "csv",
                "region": "eu-west-1"
            }))
            .unwrap(),
        )
        .with_store(store),
    );

    sink.open().await.unwrap();

    let batch = Arc::new(BatchEnvelope::new("postgresql", customers(3)));
    let statuses: Vec<StatusEnvelope> = sink
        .execute(Some(batch.clone()))
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    match &statuses[..] {
        [StatusEnvelope::Success {
            location,
            records_written,
            metadata,
        }] => {
            assert!(location.starts_with("s3://analytics/crm/customers/data_"));
            assert!(location.ends_with(".csv"));
            assert_eq!(*records_written, 3);
            assert_eq!(metadata, batch.metadata());
        }
        other => panic!("unexpected statuses {:?}", other),
    }

    sink.cleanup().await.unwrap();
    assert!(sink.execute(Some(batch)).is_err());
}

#[tokio::test]
async fn test_initialize_before_validate_is_rejected() {
    let mut source = source(backend(1), 1);
    let err = source.initialize().await.unwrap_err();
    assert!(matches!(err, ConduitError::Lifecycle(_)));
    assert_eq!(source.state(), LifecycleState::Unconfigured);
}
