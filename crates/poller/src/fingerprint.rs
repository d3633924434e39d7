use sha2::{Digest, Sha256};

use filedock_protocol::types::DirectoryListing;

/// Computes a stable fingerprint of one directory listing.
///
/// Covers child file names, sizes and mtimes plus child directory names,
/// each sorted before hashing so listing order never matters. Content is
/// deliberately not read: a fingerprint detects *that* something changed,
/// the listing in the event says what.
pub fn fingerprint(listing: &DirectoryListing) -> String {
    let mut files: Vec<String> = listing
        .files
        .iter()
        .map(|f| format!("{}\u{1f}{}\u{1f}{}", f.name, f.size, f.mtime))
        .collect();
    files.sort_unstable();

    let mut dirs: Vec<&str> = listing.directories.iter().map(String::as_str).collect();
    dirs.sort_unstable();

    let mut hasher = Sha256::new();
    for record in &files {
        hasher.update(record.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update([1u8]);
    for dir in &dirs {
        hasher.update(dir.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
