//! Background actors
//!
//! Each actor runs as an independent async task and is driven through a
//! cloneable handle that sends commands over a Tokio mpsc channel.
//!
//! ## Actor Types
//!
//! - **SnapshotFlusher**: writes the in-memory store to its snapshot file
//!   at a fixed interval, and once more on shutdown
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Request/Response**: oneshot channels carry the answer back to the caller

pub mod flusher;
pub mod messages;
