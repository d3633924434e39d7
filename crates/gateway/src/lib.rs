//! Authenticated HTTP client for the remote file storage host.
//!
//! Every remote file operation in the subsystem goes through
//! [`StorageGateway`]: listing, upload, download, delete, mkdir, rename.
//! The gateway enforces path containment under a configured storage root
//! and keeps transport failures distinguishable from logical outcomes so
//! callers can decide whether a retry makes sense.

mod client;

pub use client::{GatewayConfig, StorageGateway};

/// Errors produced by remote storage calls.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The host did not answer (connect failure or timeout). Retryable.
    #[error("remote storage unreachable: {0}")]
    Unreachable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The resolved path escapes the configured storage root.
    #[error("path outside storage root: {0}")]
    PathOutsideRoot(String),

    #[error("remote storage error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl GatewayError {
    /// `true` when retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unreachable(_))
    }
}
