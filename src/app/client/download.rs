//! File download operations with streaming, integrity checks and atomic writes
//!
//! Bodies are streamed chunk by chunk into a temporary sibling of the target and
//! renamed into place only after the byte count has been checked against the
//! response's `Content-Length`. Whatever happens, no partial file is left behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::Response;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, warn};

use super::classifier::ErrorClassifier;
use super::http::HttpHandler;
use crate::app::paths;
use crate::constants::files;
use crate::errors::{DownloadError, DownloadResult};

/// Result of a successful download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub bytes: u64,
}

/// File download operations handler
pub struct DownloadHandler<'a> {
    http_handler: &'a HttpHandler,
    max_attempts: u32,
    timeout: std::time::Duration,
    download_root: Option<&'a Path>,
}

impl<'a> DownloadHandler<'a> {
    pub fn new(
        http_handler: &'a HttpHandler,
        max_attempts: u32,
        timeout: std::time::Duration,
        download_root: Option<&'a Path>,
    ) -> Self {
        Self {
            http_handler,
            max_attempts,
            timeout,
            download_root,
        }
    }

    /// Downloads `url` to `destination`
    ///
    /// Each download attempt runs a full request retry loop; a failed attempt
    /// (transport, integrity, I/O) is retried up to `max_attempts` times unless the
    /// error is fatal. Existing files at `destination` are replaced.
    ///
    /// # Errors
    ///
    /// Returns the fatal error, or the last error once attempts are exhausted.
    pub async fn download_file(
        &self,
        destination: &Path,
        url: &str,
        extra: &[Arc<dyn ErrorClassifier>],
    ) -> DownloadResult<DownloadedFile> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp_path = temp_path_for(destination);

        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            let result = self.download_attempt(url, &temp_path, extra).await;
            match result {
                Ok(bytes) => {
                    if let Err(source) = tokio::fs::rename(&temp_path, destination).await {
                        remove_if_exists(&temp_path).await;
                        error!(
                            "Could not move {} into place: {}",
                            destination.display(),
                            source
                        );
                        return Err(DownloadError::AtomicOperationFailed {
                            temp_path,
                            final_path: destination.to_path_buf(),
                            source,
                        });
                    }
                    self.refresh_ancestors(destination).await;
                    info!("Downloaded {} ({} bytes)", destination.display(), bytes);
                    return Ok(DownloadedFile {
                        path: destination.to_path_buf(),
                        bytes,
                    });
                }
                Err(e) => {
                    remove_if_exists(&temp_path).await;

                    if e.is_fatal() {
                        warn!("Download of {} failed fatally: {}", url, e);
                        return Err(e);
                    }

                    if attempt < self.max_attempts {
                        let delay = self.http_handler.backoff(attempt);
                        warn!(
                            "Download failed (attempt {}/{}): {}. Retrying in {}ms",
                            attempt,
                            self.max_attempts,
                            e,
                            delay.as_millis()
                        );
                        self.http_handler.sleep(delay).await?;
                    } else {
                        error!(
                            "Download of {} failed after {} attempts: {}",
                            url, self.max_attempts, e
                        );
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DownloadError::ConfigurationError("max_download_retries must be at least 1".to_string())
        }))
    }

    /// One attempt: request, stream to the temp file, check the size
    async fn download_attempt(
        &self,
        url: &str,
        temp_path: &Path,
        extra: &[Arc<dyn ErrorClassifier>],
    ) -> DownloadResult<u64> {
        let timeout = self.timeout;
        let response = self
            .http_handler
            .send(extra, |client| {
                client
                    .get(url)
                    .timeout(timeout)
                    .build()
                    .map_err(|e| DownloadError::InvalidUrl {
                        url: url.to_string(),
                        error: e.to_string(),
                    })
            })
            .await?;

        let expected = declared_length(&response);
        let written = stream_to_file(response, temp_path).await?;

        if written == 0 {
            return Err(DownloadError::EmptyDownload {
                path: temp_path.to_path_buf(),
            });
        }
        if let Some(expected) = expected {
            if expected != written {
                return Err(DownloadError::IncompleteDownload {
                    received: written,
                    expected,
                });
            }
        }

        debug!("Wrote {} bytes to {}", written, temp_path.display());
        Ok(written)
    }

    async fn refresh_ancestors(&self, destination: &Path) {
        let Some(root) = self.download_root else {
            return;
        };
        let file = destination.to_path_buf();
        let root = root.to_path_buf();
        if let Err(e) =
            tokio::task::spawn_blocking(move || paths::refresh_ancestor_times(&file, &root)).await
        {
            debug!("Directory time refresh task failed: {}", e);
        }
    }
}

/// `Content-Length` as declared by the server
fn declared_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

/// Streams the response body to `path`, returning bytes written
async fn stream_to_file(response: Response, path: &Path) -> DownloadResult<u64> {
    let file = File::create(path).await?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        writer.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }

    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    Ok(bytes_written)
}

/// Temporary sibling path, e.g. `image.png` -> `image.png.part`
///
/// The name is shortened first when the suffix would push it past the component
/// limit.
pub fn temp_path_for(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let budget = files::MAX_COMPONENT_BYTES - files::TEMP_FILE_SUFFIX.len();
    let stem = paths::truncate_component(&name, budget);
    destination.with_file_name(format!("{}{}", stem, files::TEMP_FILE_SUFFIX))
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial file {}: {}", path.display(), e),
    }
}
