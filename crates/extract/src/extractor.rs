use std::fs::File;
use std::io;
use std::path::Path;

use filedock_transfer::clean_relative_path;
use tracing::{debug, warn};

use crate::ExtractError;

/// One entry that could not be extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    /// Entry name as stored in the archive.
    pub entry: String,
    pub reason: String,
}

/// Outcome of one extraction job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionReport {
    pub entries_total: usize,
    pub entries_completed: usize,
    /// Per-entry failures, in archive order.
    pub errors: Vec<EntryFailure>,
    /// `true` once the source archive has been removed.
    pub source_deleted: bool,
}

impl ExtractionReport {
    /// `true` when every entry landed and the source archive is gone.
    pub fn is_complete_success(&self) -> bool {
        self.errors.is_empty() && self.entries_completed == self.entries_total
    }
}

/// Extracts a zip archive into `destination_root`.
///
/// Entries are walked one at a time through the central directory; file
/// contents are streamed straight to disk, never buffered whole. Entry
/// names are validated before any path is touched — a traversal entry
/// (`../`, absolute) fails that entry only, the job continues.
///
/// The archive file is deleted only when every entry extracted cleanly.
pub fn extract_archive(
    archive_path: &Path,
    destination_root: &Path,
) -> Result<ExtractionReport, ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| ExtractError::Archive(e.to_string()))?;

    let entries_total = archive.len();
    let mut entries_completed = 0usize;
    let mut errors = Vec::new();

    for i in 0..entries_total {
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                errors.push(EntryFailure {
                    entry: format!("#{i}"),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let raw_name = entry.name().to_string();

        let relative = match clean_relative_path(&raw_name) {
            Ok(p) => p,
            Err(e) => {
                warn!(entry = %raw_name, "rejected archive entry: {e}");
                errors.push(EntryFailure {
                    entry: raw_name,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let target = destination_root.join(&relative);

        let result = if entry.is_dir() {
            // Already-existing directories are fine.
            std::fs::create_dir_all(&target)
        } else {
            write_entry(&mut entry, &target)
        };

        match result {
            Ok(()) => {
                debug!(entry = %raw_name, "extracted");
                entries_completed += 1;
            }
            Err(e) => {
                warn!(entry = %raw_name, "extraction failed: {e}");
                errors.push(EntryFailure {
                    entry: raw_name,
                    reason: e.to_string(),
                });
            }
        }
    }

    let mut source_deleted = false;
    if errors.is_empty() {
        match std::fs::remove_file(archive_path) {
            Ok(()) => source_deleted = true,
            Err(e) => {
                warn!(archive = %archive_path.display(), "could not remove source archive: {e}");
            }
        }
    } else {
        // Mixed outcome: keep the archive so the operator can retry.
        warn!(
            archive = %archive_path.display(),
            failed = errors.len(),
            extracted = entries_completed,
            "archive retained after partial extraction"
        );
    }

    Ok(ExtractionReport {
        entries_total,
        entries_completed,
        errors,
        source_deleted,
    })
}

/// Streams one file entry's decompressed bytes to `target`.
fn write_entry<R: io::Read>(entry: &mut R, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = File::create(target)?;
    io::copy(entry, &mut out)?;
    Ok(())
}
