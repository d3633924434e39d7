use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::PROTOCOL_VERSION;
use crate::types::{BatchProgress, BatchUploadResult, DirectoryListing, UploadFailure};

/// A single file finished uploading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploaded {
    /// Destination path of the uploaded file.
    pub path: String,
    pub size: i64,
    pub uploaded_at: DateTime<Utc>,
}

/// A file was deleted from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDeleted {
    pub path: String,
}

/// The poller observed a remote directory change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryChanged {
    pub path: String,
    /// The new listing, so subscribers can refresh without re-listing.
    pub listing: DirectoryListing,
}

/// A directory upload (batch or archive) finished with errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUploadError {
    pub directory_name: String,
    pub message: String,
    pub errors: Vec<UploadFailure>,
}

/// Every event filedock pushes to subscribers.
///
/// Serialized adjacently tagged as `{"type": "...", "data": {...}}`. The
/// union is closed: a new event is a new variant, and every dispatch site
/// fails to compile until it handles it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    FileUploaded(FileUploaded),
    FileDeleted(FileDeleted),
    DirectoryChanged(DirectoryChanged),
    DirectoryUploadProgress(BatchProgress),
    DirectoryUploaded(BatchUploadResult),
    DirectoryUploadError(DirectoryUploadError),
}

impl Event {
    /// The wire tag for this event (the `type` field).
    pub fn kind(&self) -> &'static str {
        match self {
            Event::FileUploaded(_) => "file_uploaded",
            Event::FileDeleted(_) => "file_deleted",
            Event::DirectoryChanged(_) => "directory_changed",
            Event::DirectoryUploadProgress(_) => "directory_upload_progress",
            Event::DirectoryUploaded(_) => "directory_uploaded",
            Event::DirectoryUploadError(_) => "directory_upload_error",
        }
    }
}

/// The exact record written to each subscriber connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Schema version, see [`PROTOCOL_VERSION`].
    pub v: u32,
    #[serde(flatten)]
    pub event: Event,
}

impl From<Event> for EventEnvelope {
    fn from(event: Event) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RemoteEntry;

    #[test]
    fn event_tag_matches_kind() {
        let event = Event::FileDeleted(FileDeleted {
            path: "/projects/42/plan.pdf".into(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "file_deleted");
        assert_eq!(json["data"]["path"], "/projects/42/plan.pdf");
        assert_eq!(event.kind(), "file_deleted");
    }

    #[test]
    fn all_variants_roundtrip() {
        let events = vec![
            Event::FileUploaded(FileUploaded {
                path: "/clients/7/logo.png".into(),
                size: 2048,
                uploaded_at: Utc::now(),
            }),
            Event::FileDeleted(FileDeleted {
                path: "/clients/7/logo.png".into(),
            }),
            Event::DirectoryChanged(DirectoryChanged {
                path: "/projects/42".into(),
                listing: DirectoryListing {
                    files: vec![RemoteEntry {
                        name: "plan.pdf".into(),
                        size: 10,
                        mtime: 1,
                    }],
                    directories: vec![],
                },
            }),
            Event::DirectoryUploadProgress(BatchProgress {
                directory_name: "photos".into(),
                uploaded: 5,
                total: 20,
                percent: 25.0,
            }),
            Event::DirectoryUploaded(BatchUploadResult {
                directory_name: "photos".into(),
                total_files: 20,
                uploaded_files: 20,
                errors: vec![],
                completed_batches: 4,
                total_batches: 4,
            }),
            Event::DirectoryUploadError(DirectoryUploadError {
                directory_name: "photos".into(),
                message: "3 files failed".into(),
                errors: vec![UploadFailure {
                    file: "a.jpg".into(),
                    reason: "remote unreachable".into(),
                }],
            }),
        ];

        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let parsed: Event = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, event);
            // Each serialized form carries the tagged pair.
            assert!(json.contains("\"type\""));
            assert!(json.contains("\"data\""));
        }
    }

    #[test]
    fn kind_matches_wire_tag() {
        let events = [
            Event::FileDeleted(FileDeleted { path: "x".into() }),
            Event::DirectoryUploadProgress(BatchProgress {
                directory_name: "d".into(),
                uploaded: 0,
                total: 1,
                percent: 0.0,
            }),
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.kind());
        }
    }

    #[test]
    fn envelope_carries_schema_version() {
        let envelope: EventEnvelope = Event::FileDeleted(FileDeleted {
            path: "/tmp/x".into(),
        })
        .into();
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["v"], PROTOCOL_VERSION);
        assert_eq!(json["type"], "file_deleted");

        let parsed: EventEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let json = r#"{"v":1,"type":"disk_reformatted","data":{}}"#;
        assert!(serde_json::from_str::<EventEnvelope>(json).is_err());
    }
}
