//! Source media download over HTTP.
//!
//! The fetcher streams the response body to a `.part` file inside the
//! job's scratch directory and atomically renames it into place once the
//! transfer completes, so an interrupted download never leaves a partial
//! file where the transcoder would pick it up. A stale `.part` from an
//! earlier attempt is removed before restarting.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::move_file;

/// Extension appended to in-flight downloads.
const PART_EXTENSION: &str = "part";

/// HTTP client for fetching source media.
#[derive(Debug, Clone)]
pub struct FetchClient {
    http: reqwest::Client,
    /// Hosts accepted as sources. Empty means any http(s) host.
    allowed_hosts: Vec<String>,
}

impl FetchClient {
    /// Create a new fetch client.
    ///
    /// `allowed_hosts` restricts sources to the given domains (matching the
    /// host exactly or as a parent domain); an empty list accepts any
    /// http(s) URL.
    pub fn new(allowed_hosts: Vec<String>) -> MediaResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| MediaError::network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            allowed_hosts,
        })
    }

    /// Validate a source reference before any network activity.
    ///
    /// Rejects malformed URLs, non-http(s) schemes, and hosts outside the
    /// allow-list. These are terminal failures; no retry will fix them.
    pub fn validate_source(&self, source: &str) -> MediaResult<Url> {
        let url = Url::parse(source)
            .map_err(|e| MediaError::invalid_source(format!("malformed URL {source:?}: {e}")))?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(MediaError::invalid_source(format!(
                    "unsupported scheme {other:?}"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| MediaError::invalid_source("URL has no host"))?;

        if !self.allowed_hosts.is_empty() && !self.host_allowed(host) {
            return Err(MediaError::invalid_source(format!(
                "unsupported host {host:?}"
            )));
        }

        Ok(url)
    }

    fn host_allowed(&self, host: &str) -> bool {
        self.allowed_hosts
            .iter()
            .any(|allowed| host == allowed || host.ends_with(&format!(".{allowed}")))
    }

    /// Download `source` to `dest`, returning the bytes written.
    ///
    /// Cancellation is observed between chunks; a cancelled or failed
    /// transfer removes its `.part` file and leaves `dest` untouched.
    pub async fn fetch(
        &self,
        source: &str,
        dest: &Path,
        mut cancel: watch::Receiver<bool>,
    ) -> MediaResult<u64> {
        let url = self.validate_source(source)?;
        let part_path = part_path(dest);

        // Stale partial from a previous attempt; restart from scratch.
        if part_path.exists() {
            debug!("Removing stale partial download: {}", part_path.display());
            tokio::fs::remove_file(&part_path).await?;
        }

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| MediaError::network(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &url));
        }

        let content_length = response.content_length();

        let mut file = tokio::fs::File::create(&part_path).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let mut cancel_open = true;

        loop {
            if cancel_open && *cancel.borrow() {
                drop(file);
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(MediaError::Cancelled);
            }

            tokio::select! {
                res = cancel.changed(), if cancel_open => {
                    if res.is_err() {
                        // Cancel sender dropped; keep streaming.
                        cancel_open = false;
                    }
                }
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            file.write_all(&bytes).await?;
                            written += bytes.len() as u64;
                        }
                        Some(Err(e)) => {
                            drop(file);
                            let _ = tokio::fs::remove_file(&part_path).await;
                            return Err(MediaError::network(format!(
                                "transfer from {url} interrupted: {e}"
                            )));
                        }
                        None => break,
                    }
                }
            }
        }

        file.flush().await?;
        drop(file);

        if let Some(expected) = content_length {
            if written != expected {
                warn!(
                    url = %url,
                    expected,
                    written,
                    "Transfer ended short of content-length"
                );
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(MediaError::network(format!(
                    "incomplete transfer: got {written} of {expected} bytes"
                )));
            }
        }

        move_file(&part_path, dest).await?;

        info!(
            url = %url,
            dest = %dest.display(),
            size_kb = written / 1024,
            "Fetched source media"
        );

        Ok(written)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(PART_EXTENSION);
    dest.with_file_name(name)
}

/// Map an HTTP error status to the retryable/terminal split.
///
/// Server-side and throttling statuses are transient; everything else in
/// the 4xx range means the source itself is bad.
fn classify_status(status: StatusCode, url: &Url) -> MediaError {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        MediaError::network(format!("{url} returned {status}"))
    } else {
        MediaError::invalid_source(format!("{url} returned {status}"))
    }
}
