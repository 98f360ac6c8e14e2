//! SnapshotFlusher - Periodically persists the in-memory store to a snapshot file
//!
//! ## Architecture
//!
//! The flusher owns no metric state. On every tick of its interval it
//! copies the full store via `get_all` (a brief shared lock) and hands the
//! copy to the `SnapshotWriter`, so file I/O never blocks request handling.
//!
//! Besides the timer it serves commands from its handle:
//! - **Flush**: write a snapshot right away
//! - **GetStats**: report flush counters
//! - **Shutdown**: write a final snapshot, then stop
//!
//! A failed scheduled flush is logged and counted; the next tick is
//! independent and may succeed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{FlushStats, FlusherCommand};
use crate::storage::{MemoryBackend, SnapshotWriter, StorageBackend, StorageError, StorageResult};

/// Background actor writing full snapshots at a fixed interval
pub struct SnapshotFlusher {
    store: Arc<MemoryBackend>,

    /// Shared with the facade so manual and scheduled writes never interleave
    writer: Arc<Mutex<SnapshotWriter>>,

    period: Duration,

    command_rx: mpsc::Receiver<FlusherCommand>,

    stats: FlushStats,
}

impl SnapshotFlusher {
    pub fn new(
        store: Arc<MemoryBackend>,
        writer: Arc<Mutex<SnapshotWriter>>,
        period: Duration,
        command_rx: mpsc::Receiver<FlusherCommand>,
    ) -> Self {
        Self {
            store,
            writer,
            period,
            command_rx,
            stats: FlushStats::default(),
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self), fields(period = ?self.period))]
    pub async fn run(mut self) {
        debug!("starting snapshot flusher");

        // First tick one period from now, not immediately
        let mut ticker = time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown_reply = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    trace!("scheduled flush triggered");
                    if let Err(e) = self.flush().await {
                        error!("scheduled snapshot flush failed: {}", e);
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(FlusherCommand::Flush { respond_to }) => {
                            debug!("manual flush requested");
                            let _ = respond_to.send(self.flush().await);
                        }
                        Some(FlusherCommand::GetStats { respond_to }) => {
                            let _ = respond_to.send(self.stats.clone());
                        }
                        Some(FlusherCommand::Shutdown { respond_to }) => {
                            debug!("received shutdown command");
                            break Some(respond_to);
                        }
                        None => {
                            warn!("command channel closed, shutting down");
                            break None;
                        }
                    }
                }
            }
        };

        // Final flush before shutdown
        let result = self.flush().await;
        match &result {
            Ok(()) => info!(
                "final snapshot written ({} metrics)",
                self.stats.last_record_count
            ),
            Err(e) => error!("final snapshot flush failed: {}", e),
        }

        if let Some(respond_to) = shutdown_reply {
            let _ = respond_to.send(result);
        }

        debug!("snapshot flusher stopped");
    }

    async fn flush(&mut self) -> StorageResult<()> {
        let metrics = self.store.get_all().await?;

        let writer = self.writer.lock().await;
        match writer.write_metrics(&metrics).await {
            Ok(()) => {
                self.stats.flush_count += 1;
                self.stats.last_flush = Some(Utc::now());
                self.stats.last_record_count = metrics.len();
                trace!(
                    "flush #{} complete ({} metrics)",
                    self.stats.flush_count,
                    metrics.len()
                );
                Ok(())
            }
            Err(e) => {
                self.stats.failed_flushes += 1;
                Err(e)
            }
        }
    }
}

/// Handle for communicating with the SnapshotFlusher
#[derive(Clone)]
pub struct FlusherHandle {
    sender: mpsc::Sender<FlusherCommand>,
}

impl FlusherHandle {
    /// Spawn a new flusher writing `store` through `writer` every `period`
    pub fn spawn(
        store: Arc<MemoryBackend>,
        writer: Arc<Mutex<SnapshotWriter>>,
        period: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = SnapshotFlusher::new(store, writer, period, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Write a snapshot now and wait for the result
    pub async fn flush(&self) -> StorageResult<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(FlusherCommand::Flush { respond_to: tx })
            .await
            .map_err(|_| StorageError::Closed)?;

        rx.await.map_err(|_| StorageError::Closed)?
    }

    /// Get flush statistics
    pub async fn get_stats(&self) -> Option<FlushStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(FlusherCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    /// Stop the flusher, waiting for its final snapshot
    pub async fn shutdown(&self) -> StorageResult<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(FlusherCommand::Shutdown { respond_to: tx })
            .await
            .map_err(|_| StorageError::Closed)?;

        rx.await.map_err(|_| StorageError::Closed)?
    }
}
