//! Server-side zip extraction into a live directory tree.
//!
//! An uploaded archive is unpacked entry by entry into its destination
//! root. Individual entry failures are collected, never thrown: the job
//! always runs to the end and reports every failure alongside every
//! success. The source archive is deleted only after a fully clean run —
//! on any failure it is kept for manual recovery.

mod extractor;

pub use extractor::{EntryFailure, ExtractionReport, extract_archive};

/// Fatal extraction errors (the archive itself is unusable).
///
/// Per-entry problems are not errors at this level; they are collected in
/// [`ExtractionReport::errors`].
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(String),
}
