//! Chunked upload reassembly.
//!
//! Large files arrive as ordered byte-range fragments, one request each.
//! The [`ChunkAssembler`] buffers fragments per logical upload session and
//! hands back one contiguous buffer once the last fragment lands.

mod assembler;
mod validation;

pub use assembler::{
    AssemblerConfig, ChunkAssembler, PutOutcome, checksum_bytes, verify_checksum,
};
pub use validation::clean_relative_path;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("inconsistent chunk count for session {session}: {detail}")]
    InconsistentChunkCount { session: String, detail: String },

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid path: {0}")]
    InvalidPath(String),
}
