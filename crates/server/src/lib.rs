//! Subsystem root for the file transfer & synchronization layer.
//!
//! [`SyncService`] owns the chunk assembler, the notification hub handle
//! and the storage handles, and exposes the operations the CRM layer
//! calls: chunked upload intake, archive extraction, batch directory
//! uploads, remote deletion. [`SyncServer`] is the WebSocket listener
//! that subscribes clients to the event stream.

mod service;
mod ws;

pub use service::{
    ChunkSubmitState, FileStore, SubmitError, SyncConfig, SyncService,
};
pub use ws::{ServerConfig, SyncServer};

/// Errors produced by the WebSocket server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
