//! Storage backend trait definition
//!
//! This module defines the `StorageBackend` trait that every metric
//! store (in-memory, snapshot-backed, SQLite) implements.

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::StorageResult;
use super::schema::MetricRecord;

/// Uniform contract for metric storage
///
/// Every backend keeps exactly one record per metric id and merges
/// accepted writes into it:
///
/// - **Counters** accumulate: the stored delta is the sum of all accepted deltas
/// - **Gauges** are last-write-wins
/// - **Kinds are fixed**: once an id is stored, writes with another kind
///   are rejected with a type mismatch and change nothing
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared between
/// request handlers running on different tasks.
///
/// ## Error Handling
///
/// Methods return `StorageResult<T>`. Validation failures are reported as
/// `StorageError::Validation` and never retried; backend failures are
/// wrapped with the operation name so callers can tell them apart.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store a single metric under `id`
    ///
    /// `id` must match `record.id`.
    async fn set(&self, id: &str, record: MetricRecord) -> StorageResult<()>;

    /// Look up a metric, `None` if it was never stored
    ///
    /// The returned record is an independent copy of the stored state.
    async fn get(&self, id: &str) -> StorageResult<Option<MetricRecord>>;

    /// Copy of every stored metric keyed by id
    async fn get_all(&self) -> StorageResult<HashMap<String, MetricRecord>>;

    /// Store a batch of metrics, all or nothing
    ///
    /// The whole batch is validated before anything is applied. If any
    /// record is rejected, none of the batch is stored.
    async fn set_all(&self, batch: Vec<MetricRecord>) -> StorageResult<()>;
}
