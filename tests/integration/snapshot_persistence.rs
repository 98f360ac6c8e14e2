//! Snapshot persistence across restarts
//!
//! These tests open a file-backed store, write to it, close it, and open
//! it again from the same file, the way the server restarts.

use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use telemetry_store::storage::{
    MetricRecord, SnapshotReader, StorageBackend, StorageError, StorageFacade,
};

use crate::helpers::*;

#[tokio::test]
async fn test_restart_restores_state() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("Metrics.data");
    let config = file_config(&path, 300, true);

    let storage = StorageFacade::open(&config).await.unwrap();
    storage.set_all(sample_batch()).await.unwrap();
    storage
        .set("PollCount", MetricRecord::counter("PollCount", 2))
        .await
        .unwrap();
    let before = storage.get_all().await.unwrap();
    storage.close().await.unwrap();

    let storage = StorageFacade::open(&config).await.unwrap();
    assert_eq!(storage.get_all().await.unwrap(), before);

    // Counters keep accumulating on top of the restored total
    storage
        .set("PollCount", MetricRecord::counter("PollCount", 3))
        .await
        .unwrap();
    assert_eq!(
        storage.get("PollCount").await.unwrap(),
        Some(MetricRecord::counter("PollCount", 10))
    );
    storage.close().await.unwrap();
}

#[tokio::test]
async fn test_periodic_flush_runs_in_background() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("Metrics.data");

    let storage = StorageFacade::open(&file_config(&path, 1, false))
        .await
        .unwrap();
    storage
        .set("Alloc", MetricRecord::gauge("Alloc", 42.0))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let on_disk = SnapshotReader::new(&path).read_file().await.unwrap();
    assert_eq!(on_disk, vec![MetricRecord::gauge("Alloc", 42.0)]);

    let stats = storage.flush_stats().await.unwrap();
    assert!(stats.flush_count >= 1);
    storage.close().await.unwrap();
}

#[tokio::test]
async fn test_close_writes_final_snapshot() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("Metrics.data");

    let storage = StorageFacade::open(&file_config(&path, 3600, false))
        .await
        .unwrap();
    storage.set_all(sample_batch()).await.unwrap();
    assert!(SnapshotReader::new(&path).read_file().await.unwrap().is_empty());

    storage.close().await.unwrap();

    let on_disk = SnapshotReader::new(&path).read_file().await.unwrap();
    assert_eq!(on_disk.len(), sample_batch().len());
}

#[tokio::test]
async fn test_synchronous_mode_survives_restart_without_close() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("Metrics.data");
    let config = file_config(&path, 0, true);

    {
        let storage = StorageFacade::open(&config).await.unwrap();
        storage
            .set("PollCount", MetricRecord::counter("PollCount", 1))
            .await
            .unwrap();
        storage
            .set("Alloc", MetricRecord::gauge("Alloc", 0.5))
            .await
            .unwrap();
        // Dropped without close, as after a crash
    }

    let storage = StorageFacade::open(&config).await.unwrap();
    let all = storage.get_all().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["PollCount"], MetricRecord::counter("PollCount", 1));
    assert_eq!(all["Alloc"], MetricRecord::gauge("Alloc", 0.5));
}

#[tokio::test]
async fn test_missing_snapshot_starts_empty() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("Metrics.data");

    let storage = StorageFacade::open(&file_config(&path, 300, true))
        .await
        .unwrap();

    assert!(storage.get_all().await.unwrap().is_empty());
    storage.close().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_snapshot_is_fatal_when_restoring() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("Metrics.data");
    std::fs::write(&path, r#"[{"id": "Alloc", "type": "gau"#).unwrap();

    let result = StorageFacade::open(&file_config(&path, 300, true)).await;

    assert_matches!(result, Err(StorageError::CorruptSnapshot { .. }));
}

#[tokio::test]
async fn test_invalid_record_in_snapshot_is_fatal_when_restoring() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("Metrics.data");
    std::fs::write(&path, r#"[{"id": "Alloc", "type": "gauge"}]"#).unwrap();

    let result = StorageFacade::open(&file_config(&path, 300, true)).await;

    assert_matches!(result, Err(err) if err.is_validation());
}

#[tokio::test]
async fn test_corrupt_snapshot_is_ignored_without_restore() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("Metrics.data");
    std::fs::write(&path, "not json").unwrap();

    let storage = StorageFacade::open(&file_config(&path, 300, false))
        .await
        .unwrap();

    assert!(storage.get_all().await.unwrap().is_empty());
    storage.close().await.unwrap();

    // The final snapshot replaced the broken file
    assert!(SnapshotReader::new(&path).read_file().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_restore_accepts_hash_field() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("Metrics.data");
    std::fs::write(
        &path,
        r#"[
            {"id": "PollCount", "type": "counter", "delta": 12, "hash": "c0ffee"},
            {"id": "Alloc", "type": "gauge", "value": 2.5}
        ]"#,
    )
    .unwrap();

    let storage = StorageFacade::open(&file_config(&path, 300, true))
        .await
        .unwrap();

    assert_eq!(
        storage.get("PollCount").await.unwrap(),
        Some(MetricRecord::counter("PollCount", 12).with_digest("c0ffee"))
    );
    storage.close().await.unwrap();

    // Written back under the current field name
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains(r#""digest": "c0ffee""#));
}
