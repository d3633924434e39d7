use std::time::Duration;

use filedock_protocol::constants::GATEWAY_REQUEST_TIMEOUT;
use filedock_protocol::types::DirectoryListing;
use filedock_transfer::clean_relative_path;
use serde::Serialize;
use tracing::debug;

use crate::GatewayError;

/// Remote storage host configuration.
///
/// The credential is supplied once at process start and reused for every
/// request as a bearer token.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the storage host, e.g. `https://files.internal:9000`.
    pub base_url: String,
    /// Fixed API credential.
    pub credential: String,
    /// Storage root every resolved path must stay under.
    pub remote_root: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9000".into(),
            credential: String::new(),
            remote_root: "/storage".into(),
            timeout: GATEWAY_REQUEST_TIMEOUT,
        }
    }
}

/// HTTP client wrapping all calls to the remote file host.
///
/// # Remote API
///
/// ```text
/// GET    {base}/files?path=<p>           -> DirectoryListing JSON
/// GET    {base}/files/content?path=<p>   -> raw bytes
/// PUT    {base}/files/content?path=<p>   <- raw bytes
/// DELETE {base}/files?path=<p>
/// POST   {base}/directories?path=<p>
/// POST   {base}/files/rename             <- {"from": .., "to": ..}
/// ```
pub struct StorageGateway {
    client: reqwest::Client,
    base_url: String,
    credential: String,
    /// Normalized root, always without a trailing slash.
    remote_root: String,
}

#[derive(Serialize)]
struct RenameBody<'a> {
    from: &'a str,
    to: &'a str,
}

impl StorageGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credential: config.credential,
            remote_root: config.remote_root.trim_end_matches('/').to_string(),
        })
    }

    /// Resolves a caller-supplied path under the storage root.
    ///
    /// This is a security boundary, not an optimization: the path is
    /// normalized component-by-component (rejecting `..`, absolute escapes
    /// and prefixes), joined under the root, and the joined result is
    /// re-validated by prefix comparison against the normalized root.
    pub fn resolve(&self, path: &str) -> Result<String, GatewayError> {
        let cleaned = clean_relative_path(path.trim_start_matches('/'))
            .map_err(|e| GatewayError::PathOutsideRoot(e.to_string()))?;

        let joined = format!("{}/{}", self.remote_root, cleaned.display());
        let prefix = format!("{}/", self.remote_root);
        if !joined.starts_with(&prefix) {
            return Err(GatewayError::PathOutsideRoot(path.to_string()));
        }
        Ok(joined)
    }

    /// Lists one remote directory.
    pub async fn list(&self, path: &str) -> Result<DirectoryListing, GatewayError> {
        let remote = self.resolve(path)?;
        let resp = self
            .request(reqwest::Method::GET, "/files")
            .query(&[("path", remote.as_str())])
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(map_status(status.as_u16(), &remote));
        }
        let listing = resp
            .json::<DirectoryListing>()
            .await
            .map_err(|e| GatewayError::Transport(format!("invalid listing body: {e}")))?;
        debug!(path = %remote, files = listing.files.len(), dirs = listing.directories.len(), "listed remote directory");
        Ok(listing)
    }

    /// Uploads `bytes` to a remote path, overwriting any existing file.
    pub async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<(), GatewayError> {
        let remote = self.resolve(path)?;
        let resp = self
            .request(reqwest::Method::PUT, "/files/content")
            .query(&[("path", remote.as_str())])
            .body(bytes)
            .send()
            .await
            .map_err(transport_error)?;
        self.expect_success(resp, &remote).await
    }

    /// Downloads a remote file.
    pub async fn download(&self, path: &str) -> Result<Vec<u8>, GatewayError> {
        let remote = self.resolve(path)?;
        let resp = self
            .request(reqwest::Method::GET, "/files/content")
            .query(&[("path", remote.as_str())])
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(map_status(status.as_u16(), &remote));
        }
        let bytes = resp.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }

    /// Deletes a remote file.
    pub async fn delete(&self, path: &str) -> Result<(), GatewayError> {
        let remote = self.resolve(path)?;
        let resp = self
            .request(reqwest::Method::DELETE, "/files")
            .query(&[("path", remote.as_str())])
            .send()
            .await
            .map_err(transport_error)?;
        self.expect_success(resp, &remote).await
    }

    /// Creates a remote directory. Returns `AlreadyExists` if present.
    pub async fn mkdir(&self, path: &str) -> Result<(), GatewayError> {
        let remote = self.resolve(path)?;
        let resp = self
            .request(reqwest::Method::POST, "/directories")
            .query(&[("path", remote.as_str())])
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status.as_u16() == 409 {
            return Err(GatewayError::AlreadyExists(remote));
        }
        Err(map_status(status.as_u16(), &remote))
    }

    /// Renames a remote file or directory.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), GatewayError> {
        let from = self.resolve(old_path)?;
        let to = self.resolve(new_path)?;
        let resp = self
            .request(reqwest::Method::POST, "/files/rename")
            .json(&RenameBody {
                from: &from,
                to: &to,
            })
            .send()
            .await
            .map_err(transport_error)?;
        self.expect_success(resp, &from).await
    }

    fn request(&self, method: reqwest::Method, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{endpoint}", self.base_url);
        self.client
            .request(method, url)
            .bearer_auth(&self.credential)
    }

    async fn expect_success(
        &self,
        resp: reqwest::Response,
        remote: &str,
    ) -> Result<(), GatewayError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        Err(map_status(status.as_u16(), remote))
    }
}

/// Classifies a reqwest failure: hosts that never answered are retryable.
fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() || e.is_connect() {
        GatewayError::Unreachable(e.to_string())
    } else {
        GatewayError::Transport(e.to_string())
    }
}

fn map_status(status: u16, remote: &str) -> GatewayError {
    match status {
        404 => GatewayError::NotFound(remote.to_string()),
        409 => GatewayError::Conflict(remote.to_string()),
        s => GatewayError::Remote {
            status: s,
            message: remote.to_string(),
        },
    }
}
