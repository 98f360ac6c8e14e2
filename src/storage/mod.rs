//! Storage backends for metric records
//!
//! This module provides a trait-based abstraction for storing the latest
//! value of every metric, with interchangeable backends behind one facade.
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` has exactly `set`, `get`, `get_all`
//!   and `set_all`; every backend and the facade implement it
//! - **Async**: All operations are async for compatibility with Tokio actors
//! - **Merge on write**: counters accumulate, gauges keep the latest value,
//!   the kind of a metric never changes once stored
//!
//! ## Backends
//!
//! - **In-Memory**: one map behind a reader/writer lock
//! - **File**: the in-memory backend plus JSON snapshots, restored on startup
//! - **SQLite**: upserts that merge inside the engine, with bounded retries
//!
//! ## Usage
//!
//! ```no_run
//! use telemetry_store::config::StorageConfig;
//! use telemetry_store::storage::{MetricRecord, StorageBackend, StorageFacade};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = StorageFacade::open(&StorageConfig::default()).await?;
//!     storage.set("PollCount", MetricRecord::counter("PollCount", 1)).await?;
//!     storage.close().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod classifier;
pub mod error;
pub mod facade;
pub mod memory;
pub mod retry;
pub mod schema;
pub mod snapshot;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::StorageBackend;
pub use classifier::{Classify, ErrorClass, ErrorClassifier, WriteClassifier};
pub use error::{StorageError, StorageResult, ValidationError};
pub use facade::StorageFacade;
pub use memory::MemoryBackend;
pub use retry::RetryExecutor;
pub use schema::{MetricKind, MetricRecord};
pub use snapshot::{SnapshotReader, SnapshotWriter};
