//! Concurrency and race condition tests
//!
//! These tests hammer one store from many tasks at once:
//! - Concurrent writes to distinct ids never lose a key
//! - Concurrent counter increments never lose an update
//! - Readers and the snapshot flusher run alongside writers

use std::sync::Arc;

use futures::future::join_all;
use pretty_assertions::assert_eq;
use telemetry_store::config::StorageConfig;
use telemetry_store::storage::{
    MemoryBackend, MetricRecord, SnapshotReader, StorageBackend, StorageFacade,
};

use crate::helpers::*;

const TASKS: usize = 200;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_ids_no_lost_keys() {
    let store = Arc::new(MemoryBackend::new());

    let tasks = (0..TASKS).map(|i| {
        let store = store.clone();
        tokio::spawn(async move {
            let id = format!("gauge-{i}");
            store
                .set(&id, MetricRecord::gauge(id.clone(), i as f64))
                .await
        })
    });

    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let all = store.get_all().await.unwrap();
    assert_eq!(all.len(), TASKS);
    assert_eq!(all["gauge-17"].value, Some(17.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_counter_increments_no_lost_updates() {
    let store = Arc::new(MemoryBackend::new());

    let tasks = (0..TASKS).map(|_| {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .set("PollCount", MetricRecord::counter("PollCount", 1))
                .await
        })
    });

    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let stored = store.get("PollCount").await.unwrap().unwrap();
    assert_eq!(stored.delta, Some(TASKS as i64));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_batches_are_applied_whole() {
    let store = Arc::new(MemoryBackend::new());

    let tasks = (0..50).map(|_| {
        let store = store.clone();
        tokio::spawn(async move { store.set_all(sample_batch()).await })
    });

    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let all = store.get_all().await.unwrap();
    assert_eq!(all.len(), sample_batch().len());
    assert_eq!(all["PollCount"].delta, Some(50 * 5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_kind_conflicts_keep_first_kind() {
    let store = Arc::new(MemoryBackend::new());

    let tasks = (0..100).map(|i| {
        let store = store.clone();
        tokio::spawn(async move {
            let record = if i % 2 == 0 {
                MetricRecord::counter("Contested", 1)
            } else {
                MetricRecord::gauge("Contested", 1.0)
            };
            store.set("Contested", record).await
        })
    });

    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    // Whichever kind got there first, every write of the other kind was rejected
    let stored = store.get("Contested").await.unwrap().unwrap();
    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 50);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.is_type_mismatch())
    );
    if let Some(total) = stored.delta {
        assert_eq!(total, 50);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_synchronous_snapshots_under_concurrent_writes() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("Metrics.data");
    let storage = Arc::new(
        StorageFacade::open(&file_config(&path, 0, false))
            .await
            .unwrap(),
    );

    let tasks = (0..50).map(|_| {
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

    // The last snapshot written holds the final total, never an older one
    let on_disk = SnapshotReader::new(&path).read_file().await.unwrap();
    assert_eq!(on_disk, vec![MetricRecord::counter("PollCount", 50)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flush_alongside_writers_and_readers() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("Metrics.data");
    let storage = Arc::new(
        StorageFacade::open(&file_config(&path, 3600, false))
            .await
            .unwrap(),
    );

    let writers = (0..TASKS).map(|i| {
        let storage = storage.clone();
        tokio::spawn(async move {
            let id = format!("m{i}");
            storage.set(&id, MetricRecord::gauge(id.clone(), 1.0)).await?;
            if i % 20 == 0 {
                storage.flush().await?;
            }
            storage.get_all().await.map(|_| ())
        })
    });

    for result in join_all(writers).await {
        result.unwrap().unwrap();
    }

    storage.close().await.unwrap();
    let on_disk = SnapshotReader::new(&path).read_file().await.unwrap();
    assert_eq!(on_disk.len(), TASKS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_facade_counter_increments() {
    let storage = Arc::new(StorageFacade::open(&StorageConfig::Memory).await.unwrap());

    let tasks = (0..TASKS).map(|_| {
        let storage = storage.clone();
        tokio::spawn(async move {
            storage
                .set_all(vec![MetricRecord::counter("PollCount", 1)])
                .await
        })
    });

    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    assert_eq!(
        storage.get("PollCount").await.unwrap(),
        Some(MetricRecord::counter("PollCount", TASKS as i64))
    );
}
