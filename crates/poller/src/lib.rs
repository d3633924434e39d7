//! Periodic remote-directory change detection.
//!
//! On a fixed interval the poller lists a bounded set of remote roots,
//! fingerprints each directory, and broadcasts `directory_changed` when a
//! fingerprint moves. Snapshots live in memory only and are rebuilt from
//! the remote source of truth on restart.

mod fingerprint;
mod poller;

pub use fingerprint::fingerprint;
pub use poller::{ChangePoller, PollerConfig, RemoteSource};
