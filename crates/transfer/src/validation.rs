use std::path::{Component, Path, PathBuf};

use crate::TransferError;

/// Validates and normalizes a caller-supplied relative path.
///
/// Returns the path with `.` components removed, ready to be joined under a
/// trusted root. Rejects anything that could escape that root:
/// empty paths, absolute paths, `..` components, and Windows prefixes
/// (`C:`, `\\server`). This is a security boundary shared by chunk
/// destinations, archive entry names, and batch upload paths.
pub fn clean_relative_path(raw: &str) -> Result<PathBuf, TransferError> {
    if raw.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    let mut cleaned = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {raw}"
                )));
            }
            Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {raw}"
                )));
            }
            Component::Prefix(_) => {
                return Err(TransferError::InvalidPath(format!(
                    "path prefix not allowed: {raw}"
                )));
            }
        }
    }

    if cleaned.as_os_str().is_empty() {
        return Err(TransferError::InvalidPath(format!(
            "path has no usable components: {raw}"
        )));
    }

    Ok(cleaned)
}
