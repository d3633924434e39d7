use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Remote directory listings
// ---------------------------------------------------------------------------

/// One file entry in a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    /// File name (not full path).
    pub name: String,
    /// File size in bytes.
    pub size: i64,
    /// Modification time, milliseconds since the Unix epoch.
    pub mtime: i64,
}

/// Contents of one remote directory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryListing {
    pub files: Vec<RemoteEntry>,
    pub directories: Vec<String>,
}

// ---------------------------------------------------------------------------
// Batch uploads
// ---------------------------------------------------------------------------

/// One file in a directory-tree upload.
///
/// The `data` field is base64-encoded in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFileSpec {
    /// Path relative to the uploaded directory, forward slashes.
    pub relative_path: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub content_type: String,
}

/// A single per-file upload failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFailure {
    pub file: String,
    pub reason: String,
}

/// Aggregate outcome of one directory-tree upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUploadResult {
    pub directory_name: String,
    pub total_files: u32,
    pub uploaded_files: u32,
    pub errors: Vec<UploadFailure>,
    pub completed_batches: u32,
    pub total_batches: u32,
}

impl BatchUploadResult {
    /// `true` when every file uploaded without error.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.uploaded_files == self.total_files
    }
}

/// Incremental progress for an in-flight directory upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub directory_name: String,
    pub uploaded: u32,
    pub total: u32,
    pub percent: f64,
}

pub(crate) mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
