use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use filedock_gateway::{GatewayError, StorageGateway};
use filedock_protocol::types::{BatchFileSpec, BatchProgress, BatchUploadResult, UploadFailure};
use filedock_transfer::clean_relative_path;

/// Destination for individual file uploads.
///
/// Implemented for [`StorageGateway`]; tests substitute a mock.
pub trait UploadSink: Send + Sync + 'static {
    fn upload<'a>(
        &'a self,
        path: &'a str,
        bytes: Vec<u8>,
        content_type: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), GatewayError>> + Send + 'a>>;
}

impl UploadSink for StorageGateway {
    fn upload<'a>(
        &'a self,
        path: &'a str,
        bytes: Vec<u8>,
        _content_type: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), GatewayError>> + Send + 'a>> {
        Box::pin(StorageGateway::upload(self, path, bytes))
    }
}

/// Batch upload tuning.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Files per batch; also the worker-pool bound within a batch.
    pub batch_size: usize,
    /// Keep the first path segment of each relative path.
    ///
    /// `false` strips it — the common case where the client wraps the
    /// upload in a synthetic top-level folder. This is the caller's call,
    /// never inferred from the folder name.
    pub preserve_root_segment: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            preserve_root_segment: false,
        }
    }
}

/// Uploads a directory tree through an [`UploadSink`] in bounded batches.
pub struct BatchUploader {
    sink: Arc<dyn UploadSink>,
    config: BatchConfig,
    progress_tx: mpsc::Sender<BatchProgress>,
    progress_rx: Option<mpsc::Receiver<BatchProgress>>,
}

impl BatchUploader {
    pub fn new(sink: Arc<dyn UploadSink>, config: BatchConfig) -> Self {
        let (progress_tx, progress_rx) = mpsc::channel(64);
        Self {
            sink,
            config,
            progress_tx,
            progress_rx: Some(progress_rx),
        }
    }

    /// Takes the progress receiver. Can only be called once.
    pub fn take_progress(&mut self) -> Option<mpsc::Receiver<BatchProgress>> {
        self.progress_rx.take()
    }

    /// Uploads `files` under `destination_root`, preserving each file's
    /// relative path.
    ///
    /// Batches run in input order, one after another; inside a batch the
    /// files upload concurrently. After every batch a [`BatchProgress`] is
    /// emitted. Failures never abort the run: already-uploaded files stay
    /// uploaded and every failure is reported in the result.
    pub async fn upload_directory(
        &self,
        directory_name: &str,
        files: Vec<BatchFileSpec>,
        destination_root: &str,
    ) -> BatchUploadResult {
        let batch_size = self.config.batch_size.max(1);
        let total_files = files.len() as u32;
        let total_batches = files.len().div_ceil(batch_size) as u32;

        let mut uploaded_files = 0u32;
        let mut errors: Vec<UploadFailure> = Vec::new();
        let mut completed_batches = 0u32;

        for batch in files.chunks(batch_size) {
            let mut workers: JoinSet<(String, Result<(), GatewayError>)> = JoinSet::new();

            for file in batch {
                let original = file.relative_path.clone();
                let dest = match self.destination_for(&file.relative_path, destination_root) {
                    Ok(dest) => dest,
                    Err(reason) => {
                        errors.push(UploadFailure {
                            file: original,
                            reason,
                        });
                        continue;
                    }
                };
                let sink = Arc::clone(&self.sink);
                let bytes = file.data.clone();
                let content_type = file.content_type.clone();
                workers.spawn(async move {
                    let result = sink.upload(&dest, bytes, &content_type).await;
                    (original, result)
                });
            }

            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok((_, Ok(()))) => uploaded_files += 1,
                    Ok((file, Err(e))) => {
                        warn!(file = %file, "file upload failed: {e}");
                        errors.push(UploadFailure {
                            file,
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => {
                        // A panicked worker still has to be accounted for.
                        errors.push(UploadFailure {
                            file: String::new(),
                            reason: format!("upload task failed: {e}"),
                        });
                    }
                }
            }

            completed_batches += 1;
            let percent = if total_files == 0 {
                100.0
            } else {
                f64::from(uploaded_files) / f64::from(total_files) * 100.0
            };
            let _ = self.progress_tx.try_send(BatchProgress {
                directory_name: directory_name.to_string(),
                uploaded: uploaded_files,
                total: total_files,
                percent,
            });
        }

        info!(
            directory = directory_name,
            uploaded = uploaded_files,
            failed = errors.len(),
            "directory upload finished"
        );

        BatchUploadResult {
            directory_name: directory_name.to_string(),
            total_files,
            uploaded_files,
            errors,
            completed_batches,
            total_batches,
        }
    }

    /// Resolves a file's destination path under the target directory.
    fn destination_for(
        &self,
        relative_path: &str,
        destination_root: &str,
    ) -> Result<String, String> {
        let cleaned = clean_relative_path(relative_path).map_err(|e| e.to_string())?;

        let effective: PathBuf = if self.config.preserve_root_segment {
            cleaned
        } else {
            // Drop the enclosing wrapper directory, unless the path is a
            // bare filename.
            let mut components = cleaned.components();
            let first = components.next();
            let rest: PathBuf = components.collect();
            if rest.as_os_str().is_empty() {
                first.map(|c| PathBuf::from(c.as_os_str())).unwrap_or_default()
            } else {
                rest
            }
        };

        Ok(format!(
            "{}/{}",
            destination_root.trim_end_matches('/'),
            effective.display()
        ))
    }
}
