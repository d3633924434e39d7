//! Directory-tree uploads in bounded batches.
//!
//! A directory upload of many files is split into fixed-size batches;
//! batches run sequentially, files within a batch upload in parallel.
//! Per-file failures are collected into the final result — uploads are
//! not transactional and nothing is rolled back.

mod uploader;

pub use uploader::{BatchConfig, BatchUploader, UploadSink};
