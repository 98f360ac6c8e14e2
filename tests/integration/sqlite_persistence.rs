//! SQLite persistence tests
//!
//! These tests verify the database-backed deployment through the facade:
//! - Data survives closing and reopening the database
//! - Counters merged by the engine under concurrent writers
//! - Kinds stay fixed across restarts

use std::sync::Arc;

use futures::future::join_all;
use pretty_assertions::assert_eq;
use telemetry_store::storage::{MetricRecord, StorageBackend, StorageFacade};

use crate::helpers::*;

#[tokio::test]
async fn test_sqlite_data_survives_reopen() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(&temp_dir.path().join("metrics.db"));

    let storage = StorageFacade::open(&config).await.unwrap();
    storage.set_all(sample_batch()).await.unwrap();
    let before = storage.get_all().await.unwrap();
    storage.close().await.unwrap();

    let storage = StorageFacade::open(&config).await.unwrap();
    assert_eq!(storage.get_all().await.unwrap(), before);

    // Exact float round-trip through REAL columns
    assert_eq!(
        storage.get("RandomValue").await.unwrap().unwrap().value,
        Some(0.1 + 0.2)
    );
    storage.close().await.unwrap();
}

#[tokio::test]
async fn test_sqlite_kind_is_fixed_across_restarts() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(&temp_dir.path().join("metrics.db"));

    let storage = StorageFacade::open(&config).await.unwrap();
    storage
        .set("PollCount", MetricRecord::counter("PollCount", 1))
        .await
        .unwrap();
    storage.close().await.unwrap();

    let storage = StorageFacade::open(&config).await.unwrap();
    let result = storage
        .set("PollCount", MetricRecord::gauge("PollCount", 1.0))
        .await;

    assert!(result.unwrap_err().is_type_mismatch());
    assert_eq!(
        storage.get("PollCount").await.unwrap(),
        Some(MetricRecord::counter("PollCount", 1))
    );
    storage.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_concurrent_counter_increments() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(&temp_dir.path().join("metrics.db"));
    let storage = Arc::new(StorageFacade::open(&config).await.unwrap());

    let tasks = (0..100).map(|_| {
        let storage = storage.clone();
        tokio::spawn(async move {
            storage
                .set("PollCount", MetricRecord::counter("PollCount", 1))
                .await
        })
    });

    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    assert_eq!(
        storage.get("PollCount").await.unwrap(),
        Some(MetricRecord::counter("PollCount", 100))
    );
    storage.close().await.unwrap();
}

#[tokio::test]
async fn test_sqlite_missing_metric_is_none() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(&temp_dir.path().join("metrics.db"));
    let storage = StorageFacade::open(&config).await.unwrap();

    assert_eq!(storage.get("nope").await.unwrap(), None);
    assert!(storage.get_all().await.unwrap().is_empty());
    storage.close().await.unwrap();
}
