//! Storage facade
//!
//! [`StorageFacade`] picks exactly one backend from a [`StorageConfig`]
//! when it's opened and forwards the storage contract to it for the rest
//! of the process lifetime:
//!
//! - **memory**: a `MemoryBackend`, nothing is persisted
//! - **file**: a `MemoryBackend` holding the live state plus snapshot
//!   persistence, either periodic (a `SnapshotFlusher` actor) or
//!   synchronous after every accepted write
//! - **sqlite**: a `SqliteBackend`
//!
//! For the file deployment the snapshot is restored into memory while
//! opening, so it is complete before the first request is served.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::backend::StorageBackend;
use super::error::{StorageError, StorageResult};
use super::memory::MemoryBackend;
use super::schema::MetricRecord;
use super::snapshot::{SnapshotReader, SnapshotWriter};
use crate::actors::flusher::FlusherHandle;
use crate::actors::messages::FlushStats;
use crate::config::StorageConfig;

#[cfg(feature = "storage-sqlite")]
use super::retry::RetryExecutor;
#[cfg(feature = "storage-sqlite")]
use super::sqlite::{SqliteBackend, SqliteSettings};

/// When snapshots of the file deployment are written
enum FlushCadence {
    /// After every accepted write, before the write returns
    Synchronous,

    /// By a background actor at a fixed interval
    Periodic(FlusherHandle),
}

enum Backend {
    Memory(Arc<MemoryBackend>),

    File {
        store: Arc<MemoryBackend>,
        writer: Arc<Mutex<SnapshotWriter>>,
        cadence: FlushCadence,
    },

    #[cfg(feature = "storage-sqlite")]
    Sqlite(SqliteBackend),
}

/// Single entry point to whichever backend was configured
pub struct StorageFacade {
    backend: Backend,
}

impl fmt::Debug for StorageFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageFacade")
            .field("backend", &self.backend_name())
            .finish_non_exhaustive()
    }
}

impl StorageFacade {
    /// In-memory storage without persistence
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(MemoryBackend::new())),
        }
    }

    /// Open the configured backend
    ///
    /// For the file backend with `restore` set, a snapshot that doesn't
    /// decode fails the whole call: starting with empty history when
    /// history was asked for is not an option.
    #[instrument(skip_all, fields(backend = config.backend_name()))]
    pub async fn open(config: &StorageConfig) -> StorageResult<Self> {
        config.validate()?;

        let backend = match config {
            StorageConfig::Memory => Backend::Memory(Arc::new(MemoryBackend::new())),

            StorageConfig::File {
                path,
                flush_interval_secs,
                restore,
            } => {
                let store = Arc::new(MemoryBackend::new());

                if *restore {
                    let records = SnapshotReader::new(path).read_file().await?;
                    let count = records.len();
                    store.set_all(records).await?;
                    info!("restored {} metrics from {}", count, path.display());
                }

                let writer = Arc::new(Mutex::new(SnapshotWriter::new(path)));
                let cadence = if *flush_interval_secs == 0 {
                    debug!("writing snapshot after every write");
                    FlushCadence::Synchronous
                } else {
                    FlushCadence::Periodic(FlusherHandle::spawn(
                        store.clone(),
                        writer.clone(),
                        Duration::from_secs(*flush_interval_secs),
                    ))
                };

                Backend::File {
                    store,
                    writer,
                    cadence,
                }
            }

            #[cfg(feature = "storage-sqlite")]
            StorageConfig::Sqlite {
                path, timeout_secs, ..
            } => {
                let settings = SqliteSettings {
                    call_timeout: Duration::from_secs(*timeout_secs),
                    retry: RetryExecutor::new(config.retry_delays().unwrap_or_default()),
                    ..SqliteSettings::default()
                };
                Backend::Sqlite(SqliteBackend::with_settings(path, settings).await?)
            }

            #[cfg(not(feature = "storage-sqlite"))]
            StorageConfig::Sqlite { .. } => {
                return Err(StorageError::InvalidConfig(
                    "sqlite support is not compiled in".to_string(),
                ));
            }
        };

        info!("{} storage ready", config.backend_name());
        Ok(Self { backend })
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.backend {
            Backend::Memory(_) => "memory",
            Backend::File { .. } => "file",
            #[cfg(feature = "storage-sqlite")]
            Backend::Sqlite(_) => "sqlite",
        }
    }

    /// Connectivity probe, a no-op unless a database is configured
    pub async fn ping(&self) -> StorageResult<()> {
        match &self.backend {
            #[cfg(feature = "storage-sqlite")]
            Backend::Sqlite(db) => db.ping().await,
            _ => Ok(()),
        }
    }

    /// Write a full snapshot now (file backend only)
    #[instrument(skip(self))]
    pub async fn flush(&self) -> StorageResult<()> {
        match &self.backend {
            Backend::File {
                cadence: FlushCadence::Periodic(flusher),
                ..
            } => flusher.flush().await,
            Backend::File {
                store,
                writer,
                cadence: FlushCadence::Synchronous,
            } => write_full_snapshot(store, writer).await,
            _ => Ok(()),
        }
    }

    /// Statistics of the periodic flusher, if one is running
    pub async fn flush_stats(&self) -> Option<FlushStats> {
        match &self.backend {
            Backend::File {
                cadence: FlushCadence::Periodic(flusher),
                ..
            } => flusher.get_stats().await,
            _ => None,
        }
    }

    /// Best-effort final flush, then release the backend
    ///
    /// Writes accepted concurrently with `close` may or may not be part of
    /// the final snapshot.
    #[instrument(skip(self))]
    pub async fn close(&self) -> StorageResult<()> {
        info!("closing {} storage", self.backend_name());

        match &self.backend {
            Backend::Memory(_) => Ok(()),
            Backend::File {
                cadence: FlushCadence::Periodic(flusher),
                ..
            } => flusher.shutdown().await,
            Backend::File {
                store,
                writer,
                cadence: FlushCadence::Synchronous,
            } => write_full_snapshot(store, writer).await,
            #[cfg(feature = "storage-sqlite")]
            Backend::Sqlite(db) => {
                db.close().await;
                Ok(())
            }
        }
    }
}

async fn write_full_snapshot(
    store: &MemoryBackend,
    writer: &Mutex<SnapshotWriter>,
) -> StorageResult<()> {
    let writer = writer.lock().await;
    // Read under the writer lock so a later writer never persists older state
    let metrics = store.get_all().await?;
    writer.write_metrics(&metrics).await
}

async fn write_current_record(
    store: &MemoryBackend,
    writer: &Mutex<SnapshotWriter>,
    id: &str,
) -> StorageResult<()> {
    let writer = writer.lock().await;
    let Some(current) = store.get(id).await? else {
        return Ok(());
    };

    match writer.write_metric(&current).await {
        // The file on disk can't be patched, replace it with the full store
        Err(StorageError::CorruptSnapshot { path, source }) => {
            warn!("replacing corrupt snapshot {}: {}", path.display(), source);
            let metrics = store.get_all().await?;
            writer.write_metrics(&metrics).await
        }
        result => result,
    }
}

#[async_trait]
impl StorageBackend for StorageFacade {
    async fn set(&self, id: &str, record: MetricRecord) -> StorageResult<()> {
        match &self.backend {
            Backend::Memory(store) => store.set(id, record).await,
            Backend::File {
                store,
                writer,
                cadence,
            } => {
                store.set(id, record).await?;
                if let FlushCadence::Synchronous = cadence {
                    write_current_record(store, writer, id).await?;
                }
                Ok(())
            }
            #[cfg(feature = "storage-sqlite")]
            Backend::Sqlite(db) => db.set(id, record).await,
        }
    }

    async fn get(&self, id: &str) -> StorageResult<Option<MetricRecord>> {
        match &self.backend {
            Backend::Memory(store) | Backend::File { store, .. } => store.get(id).await,
            #[cfg(feature = "storage-sqlite")]
            Backend::Sqlite(db) => db.get(id).await,
        }
    }

    async fn get_all(&self) -> StorageResult<HashMap<String, MetricRecord>> {
        match &self.backend {
            Backend::Memory(store) | Backend::File { store, .. } => store.get_all().await,
            #[cfg(feature = "storage-sqlite")]
            Backend::Sqlite(db) => db.get_all().await,
        }
    }

    async fn set_all(&self, batch: Vec<MetricRecord>) -> StorageResult<()> {
        match &self.backend {
            Backend::Memory(store) => store.set_all(batch).await,
            Backend::File {
                store,
                writer,
                cadence,
            } => {
                store.set_all(batch).await?;
                if let FlushCadence::Synchronous = cadence {
                    write_full_snapshot(store, writer).await?;
                }
                Ok(())
            }
            #[cfg(feature = "storage-sqlite")]
            Backend::Sqlite(db) => db.set_all(batch).await,
        }
    }
}
