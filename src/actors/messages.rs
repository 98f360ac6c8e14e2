//! Message types for actor communication
//!
//! Commands are sent to a specific actor over its mpsc channel. Every
//! command that expects an answer carries a oneshot `respond_to` sender.

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::storage::StorageResult;

/// Commands that can be sent to the SnapshotFlusher
#[derive(Debug)]
pub enum FlusherCommand {
    /// Write a full snapshot now, outside the regular schedule
    Flush {
        respond_to: oneshot::Sender<StorageResult<()>>,
    },

    /// Get flush statistics
    GetStats {
        respond_to: oneshot::Sender<FlushStats>,
    },

    /// Write a final snapshot and stop the actor
    Shutdown {
        respond_to: oneshot::Sender<StorageResult<()>>,
    },
}

/// Snapshot flush statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushStats {
    /// Number of snapshots written successfully
    pub flush_count: u64,

    /// Number of snapshot writes that failed
    pub failed_flushes: u64,

    /// When the last successful snapshot was written
    pub last_flush: Option<DateTime<Utc>>,

    /// Records contained in the last successful snapshot
    pub last_record_count: usize,
}
