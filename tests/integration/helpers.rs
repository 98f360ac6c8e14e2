//! Helper functions for integration tests

use std::path::Path;

use telemetry_store::config::StorageConfig;
use telemetry_store::storage::MetricRecord;

pub fn file_config(path: &Path, flush_interval_secs: u64, restore: bool) -> StorageConfig {
    StorageConfig::File {
        path: path.to_path_buf(),
        flush_interval_secs,
        restore,
    }
}

#[cfg(feature = "storage-sqlite")]
pub fn sqlite_config(path: &Path) -> StorageConfig {
    StorageConfig::Sqlite {
        path: path.to_path_buf(),
        timeout_secs: 5,
        retry_delays_ms: vec![10, 20, 40],
    }
}

/// One reporting cycle, the way an agent sends it
pub fn sample_batch() -> Vec<MetricRecord> {
    vec![
        MetricRecord::gauge("Alloc", 1_234_567.0),
        MetricRecord::gauge("GCCPUFraction", 0.000_123_456_789_012_345_6),
        MetricRecord::gauge("RandomValue", 0.1 + 0.2),
        MetricRecord::counter("PollCount", 5),
    ]
}
