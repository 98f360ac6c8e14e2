//! Snapshot file persistence for the in-memory backend
//!
//! A snapshot is one complete image of the store: a JSON array of
//! metric records, sorted by id, pretty-printed so it can be inspected
//! by hand. Every write replaces the whole file, it is never appended to.
//!
//! ## Crash safety
//!
//! Writes truncate the file in place and then write the new image. A
//! crash in between leaves a truncated or empty file behind; the reader
//! reports a truncated file as corrupt and an empty one as holding no
//! metrics.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, trace};

use super::error::{StorageError, StorageResult};
use super::schema::MetricRecord;

fn io_error<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> StorageError + 'a {
    move |source| StorageError::Io {
        op,
        path: path.to_path_buf(),
        source,
    }
}

/// Writes full snapshots of the store to a file
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    path: PathBuf,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file content with `metrics`
    #[instrument(skip_all, fields(path = %self.path.display(), count = metrics.len()))]
    pub async fn write_metrics(&self, metrics: &HashMap<String, MetricRecord>) -> StorageResult<()> {
        let mut records: Vec<&MetricRecord> = metrics.values().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));

        let data = serde_json::to_vec_pretty(&records)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .await
            .map_err(io_error("write_metrics", &self.path))?;

        file.write_all(&data)
            .await
            .map_err(io_error("write_metrics", &self.path))?;
        file.sync_data()
            .await
            .map_err(io_error("write_metrics", &self.path))?;

        debug!("wrote snapshot of {} metrics ({} bytes)", records.len(), data.len());
        Ok(())
    }

    /// Replace a single record in the snapshot, keeping all others
    ///
    /// Reads the current file, swaps in `record` by id and rewrites the
    /// whole image. `record` must already hold the merged state (the
    /// running total for counters).
    #[instrument(skip_all, fields(path = %self.path.display(), id = %record.id))]
    pub async fn write_metric(&self, record: &MetricRecord) -> StorageResult<()> {
        let existing = SnapshotReader::new(&self.path).read_file().await?;

        let mut metrics: HashMap<String, MetricRecord> = existing
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        metrics.insert(record.id.clone(), record.clone());

        self.write_metrics(&metrics).await
    }
}

/// Reads snapshots written by [`SnapshotWriter`]
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    path: PathBuf,
}

impl SnapshotReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode every record in the file
    ///
    /// A missing or empty file yields no records. Content that doesn't
    /// decode is reported as `CorruptSnapshot`.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn read_file(&self) -> StorageResult<Vec<MetricRecord>> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                trace!("no snapshot file yet");
                return Ok(Vec::new());
            }
            Err(err) => return Err(io_error("read_file", &self.path)(err)),
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            trace!("snapshot file is empty");
            return Ok(Vec::new());
        }

        let records: Vec<MetricRecord> =
            serde_json::from_slice(&data).map_err(|source| StorageError::CorruptSnapshot {
                path: self.path.clone(),
                source,
            })?;

        debug!("read {} metrics from snapshot", records.len());
        Ok(records)
    }
}
