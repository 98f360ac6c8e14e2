//! In-memory storage backend
//!
//! This backend keeps the latest record per metric id in a map guarded
//! by a single reader/writer lock. It's useful for:
//! - Tests and deployments that don't need history across restarts
//! - The file-backed deployment, where it holds the live state and the
//!   snapshot flusher persists copies of it
//!
//! ## Locking
//!
//! Writers take the lock exclusively, readers share it. Every critical
//! section is a handful of map operations; no I/O ever happens while the
//! lock is held, so request handlers only wait for each other briefly.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument, trace};

use super::backend::StorageBackend;
use super::error::{StorageResult, ValidationError};
use super::schema::MetricRecord;

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    metrics: RwLock<HashMap<String, MetricRecord>>,
}

impl MemoryBackend {
    /// Create a new, empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every stored metric
    pub async fn clear(&self) {
        let mut metrics = self.metrics.write().await;
        debug!("clearing {} metrics from memory", metrics.len());
        metrics.clear();
    }

    /// Remove a single metric, returns whether it was present
    pub async fn delete(&self, id: &str) -> bool {
        self.metrics.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.metrics.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.metrics.read().await.is_empty()
    }
}

fn check_kind(stored: &MetricRecord, incoming: &MetricRecord) -> Result<(), ValidationError> {
    if stored.kind != incoming.kind {
        return Err(ValidationError::TypeMismatch {
            id: incoming.id.clone(),
            stored: stored.kind,
            incoming: incoming.kind,
        });
    }
    Ok(())
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[instrument(skip(self, record), fields(kind = %record.kind))]
    async fn set(&self, id: &str, record: MetricRecord) -> StorageResult<()> {
        record.validate_for_key(id)?;

        let mut metrics = self.metrics.write().await;
        match metrics.entry(record.id.clone()) {
            Entry::Occupied(mut entry) => {
                check_kind(entry.get(), &record)?;
                entry.get_mut().merge(record)?;
            }
            Entry::Vacant(entry) => {
                entry.insert(record);
            }
        }

        trace!("stored metric");
        Ok(())
    }

    async fn get(&self, id: &str) -> StorageResult<Option<MetricRecord>> {
        Ok(self.metrics.read().await.get(id).cloned())
    }

    async fn get_all(&self) -> StorageResult<HashMap<String, MetricRecord>> {
        Ok(self.metrics.read().await.clone())
    }

    #[instrument(skip(self, batch), fields(count = batch.len()))]
    async fn set_all(&self, batch: Vec<MetricRecord>) -> StorageResult<()> {
        for record in &batch {
            record.validate()?;
        }

        let count = batch.len();
        let mut metrics = self.metrics.write().await;

        // Merge into copies first, the map is only touched once every record is accepted
        let mut staged: HashMap<String, MetricRecord> = HashMap::new();
        for record in batch {
            let current = staged
                .get(&record.id)
                .or_else(|| metrics.get(&record.id))
                .cloned();
            let next = match current {
                Some(mut current) => {
                    check_kind(&current, &record)?;
                    current.merge(record)?;
                    current
                }
                None => record,
            };
            staged.insert(next.id.clone(), next);
        }
        metrics.extend(staged);

        debug!("stored batch of {} metrics", count);
        Ok(())
    }
}
