use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use filedock_batch::{BatchConfig, BatchUploader, UploadSink};
use filedock_extract::{ExtractError, ExtractionReport, extract_archive};
use filedock_gateway::{GatewayError, StorageGateway};
use filedock_notify::EventHub;
use filedock_poller::{ChangePoller, PollerConfig, RemoteSource};
use filedock_protocol::events::{DirectoryUploadError, Event, FileDeleted, FileUploaded};
use filedock_protocol::types::{BatchFileSpec, BatchUploadResult, UploadFailure};
use filedock_transfer::{
    AssemblerConfig, ChunkAssembler, PutOutcome, TransferError, clean_relative_path,
    verify_checksum,
};

/// Remote store operations the service needs for interactive uploads.
///
/// Implemented for [`StorageGateway`]; tests substitute a mock.
pub trait FileStore: Send + Sync + 'static {
    fn upload<'a>(
        &'a self,
        path: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), GatewayError>> + Send + 'a>>;

    fn delete<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), GatewayError>> + Send + 'a>>;
}

impl FileStore for StorageGateway {
    fn upload<'a>(
        &'a self,
        path: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), GatewayError>> + Send + 'a>> {
        Box::pin(StorageGateway::upload(self, path, bytes))
    }

    fn delete<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), GatewayError>> + Send + 'a>> {
        Box::pin(StorageGateway::delete(self, path))
    }
}

/// Adapts the service's store handle to the batch uploader's sink seam.
struct StoreSink(Arc<dyn FileStore>);

impl UploadSink for StoreSink {
    fn upload<'a>(
        &'a self,
        path: &'a str,
        bytes: Vec<u8>,
        _content_type: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), GatewayError>> + Send + 'a>> {
        self.0.upload(path, bytes)
    }
}

/// Subsystem configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Local managed tree archives are extracted into.
    pub storage_root: PathBuf,
    pub assembler: AssemblerConfig,
    pub poller: PollerConfig,
    pub batch: BatchConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("/var/lib/filedock"),
            assembler: AssemblerConfig::default(),
            poller: PollerConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

/// Result of one `submit_chunk` call.
#[derive(Debug, PartialEq)]
pub enum ChunkSubmitState {
    /// More chunks outstanding for this session.
    Pending { received: u32, total: u32 },
    /// Final chunk arrived and the file reached its destination.
    Completed { size: usize },
    /// Final chunk arrived and the payload was an archive; extraction ran.
    Extracted(ExtractionReport),
}

/// Errors surfaced to the CRM layer by service operations.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

/// The subsystem root.
///
/// Owns the chunk assembler (explicitly — there is no ambient global
/// registry), the event hub handle, the remote store handle and the local
/// managed tree. One instance per process, shared by reference.
///
/// The storage tree is a shared mutable resource without locking:
/// concurrent writers to the same destination path race and the last
/// write wins. That is an accepted limitation of this layer.
pub struct SyncService {
    config: SyncConfig,
    assembler: Arc<ChunkAssembler>,
    store: Arc<dyn FileStore>,
    hub: Arc<EventHub>,
    poller: Arc<ChangePoller>,
}

impl SyncService {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn FileStore>,
        poll_source: Arc<dyn RemoteSource>,
        hub: Arc<EventHub>,
    ) -> Self {
        let assembler = Arc::new(ChunkAssembler::new(config.assembler.clone()));
        let poller = Arc::new(ChangePoller::new(
            poll_source,
            Arc::clone(&hub),
            config.poller.clone(),
        ));
        Self {
            config,
            assembler,
            store,
            hub,
            poller,
        }
    }

    /// The hub clients subscribe to.
    pub fn hub(&self) -> Arc<EventHub> {
        Arc::clone(&self.hub)
    }

    /// Accepts one chunk of a chunked upload.
    ///
    /// `checksum` is an optional SHA-256 hex digest of `bytes`; empty skips
    /// verification. When the final chunk lands the reassembled payload is
    /// delivered: zip destinations extract into the local tree, everything
    /// else uploads through the remote store.
    pub async fn submit_chunk(
        &self,
        session_id: &str,
        index: u32,
        total_chunks: u32,
        bytes: Vec<u8>,
        checksum: &str,
        destination: &str,
    ) -> Result<ChunkSubmitState, SubmitError> {
        verify_checksum(&bytes, checksum)?;

        match self
            .assembler
            .put_chunk(session_id, index, total_chunks, bytes)?
        {
            PutOutcome::Incomplete { received, total } => {
                Ok(ChunkSubmitState::Pending { received, total })
            }
            PutOutcome::Complete(data) => self.deliver(destination, data).await,
        }
    }

    /// Routes a fully reassembled upload to its destination.
    async fn deliver(
        &self,
        destination: &str,
        data: Vec<u8>,
    ) -> Result<ChunkSubmitState, SubmitError> {
        if destination.to_ascii_lowercase().ends_with(".zip") {
            let rel = clean_relative_path(destination.trim_start_matches('/'))?;
            let dir_rel = rel.parent().map(|p| p.to_path_buf()).unwrap_or_default();
            let dest_dir = self.config.storage_root.join(&dir_rel);
            tokio::fs::create_dir_all(&dest_dir).await?;

            // The archive lands at its own destination path, then unpacks
            // next to itself. Extraction deletes it on a clean run.
            let archive_path = self.config.storage_root.join(&rel);
            tokio::fs::write(&archive_path, &data).await?;

            let report = self
                .run_extraction(archive_path, dest_dir, dir_rel.display().to_string())
                .await?;
            return Ok(ChunkSubmitState::Extracted(report));
        }

        let size = data.len();
        self.store.upload(destination, data).await?;
        self.hub.broadcast(&Event::FileUploaded(FileUploaded {
            path: destination.to_string(),
            size: size as i64,
            uploaded_at: Utc::now(),
        }));
        info!(path = destination, size, "file uploaded");
        Ok(ChunkSubmitState::Completed { size })
    }

    /// Extracts an uploaded archive buffer into `destination_root`.
    ///
    /// The buffer is staged to disk first; the staged archive survives any
    /// partial failure so the operator can retry.
    pub async fn submit_archive(
        &self,
        bytes: Vec<u8>,
        destination_root: &str,
    ) -> Result<ExtractionReport, SubmitError> {
        let rel = clean_relative_path(destination_root.trim_start_matches('/'))?;
        let dest_dir = self.config.storage_root.join(&rel);
        tokio::fs::create_dir_all(&dest_dir).await?;

        let staging = dest_dir.join(format!(".incoming-{}.zip", Uuid::new_v4()));
        tokio::fs::write(&staging, &bytes).await?;

        self.run_extraction(staging, dest_dir, rel.display().to_string())
            .await
    }

    async fn run_extraction(
        &self,
        archive_path: PathBuf,
        dest_dir: PathBuf,
        directory_name: String,
    ) -> Result<ExtractionReport, SubmitError> {
        // Zip decompression is blocking work; keep it off the runtime.
        let report = tokio::task::spawn_blocking(move || extract_archive(&archive_path, &dest_dir))
            .await
            .map_err(|e| SubmitError::Task(e.to_string()))??;

        if report.is_complete_success() {
            self.hub
                .broadcast(&Event::DirectoryUploaded(BatchUploadResult {
                    directory_name: directory_name.clone(),
                    total_files: report.entries_total as u32,
                    uploaded_files: report.entries_completed as u32,
                    errors: vec![],
                    completed_batches: 1,
                    total_batches: 1,
                }));
            info!(
                directory = %directory_name,
                entries = report.entries_completed,
                "archive extracted"
            );
        } else {
            warn!(
                directory = %directory_name,
                failed = report.errors.len(),
                "archive extraction had failures"
            );
            self.hub
                .broadcast(&Event::DirectoryUploadError(DirectoryUploadError {
                    directory_name,
                    message: format!(
                        "{} of {} entries failed to extract",
                        report.errors.len(),
                        report.entries_total
                    ),
                    errors: report
                        .errors
                        .iter()
                        .map(|f| UploadFailure {
                            file: f.entry.clone(),
                            reason: f.reason.clone(),
                        })
                        .collect(),
                }));
        }

        Ok(report)
    }

    /// Uploads a directory tree to the remote store in bounded batches.
    ///
    /// Progress is broadcast as `directory_upload_progress` after every
    /// batch, then `directory_uploaded` or `directory_upload_error` closes
    /// the sequence. Per-file failures are in the returned result, never
    /// thrown, and already-uploaded files are not rolled back.
    pub async fn submit_batch(
        &self,
        directory_name: &str,
        files: Vec<BatchFileSpec>,
        destination_root: &str,
        preserve_root_segment: bool,
    ) -> BatchUploadResult {
        let sink: Arc<dyn UploadSink> = Arc::new(StoreSink(Arc::clone(&self.store)));
        let mut uploader = BatchUploader::new(
            sink,
            BatchConfig {
                batch_size: self.config.batch.batch_size,
                preserve_root_segment,
            },
        );

        let mut progress_rx = uploader.take_progress().expect("fresh uploader");
        let hub = Arc::clone(&self.hub);
        let forward = tokio::spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                hub.broadcast(&Event::DirectoryUploadProgress(progress));
            }
        });

        let result = uploader
            .upload_directory(directory_name, files, destination_root)
            .await;

        // Close the progress channel and flush pending broadcasts so the
        // completion event always follows the last progress event.
        drop(uploader);
        let _ = forward.await;

        if result.is_success() {
            self.hub.broadcast(&Event::DirectoryUploaded(result.clone()));
        } else {
            self.hub
                .broadcast(&Event::DirectoryUploadError(DirectoryUploadError {
                    directory_name: result.directory_name.clone(),
                    message: format!(
                        "{} of {} files failed to upload",
                        result.errors.len(),
                        result.total_files
                    ),
                    errors: result.errors.clone(),
                }));
        }

        result
    }

    /// Deletes a remote file and notifies subscribers.
    pub async fn delete_remote(&self, path: &str) -> Result<(), SubmitError> {
        self.store.delete(path).await?;
        self.hub.broadcast(&Event::FileDeleted(FileDeleted {
            path: path.to_string(),
        }));
        info!(path, "file deleted");
        Ok(())
    }

    /// Starts the background poller and session sweeper.
    ///
    /// Both run until `cancel` fires; the returned handles complete after
    /// shutdown.
    pub fn spawn_background(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let sweeper = self
            .assembler
            .spawn_sweeper(self.config.assembler.sweep_interval, cancel.clone());

        let poller = Arc::clone(&self.poller);
        let poller_handle = tokio::spawn(async move { poller.run(cancel).await });

        vec![sweeper, poller_handle]
    }
}
