//! HTTP downloads
//!
//! Thin wrapper over `reqwest` for fetching text and files, used for the
//! dashboard's connectivity test and for pulling address lists.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub const USER_AGENT: &str = concat!("Dropship/", env!("CARGO_PKG_VERSION"));

pub const TEXT_TIMEOUT: Duration = Duration::from_secs(30);

pub const FILE_TIMEOUT: Duration = Duration::from_secs(300);

const MAX_REDIRECTS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Server responded with {0}")]
    Status(reqwest::StatusCode),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn client(timeout: Duration) -> Result<reqwest::Client, HttpError> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()?)
}

async fn get(url: &str, timeout: Duration) -> Result<reqwest::Response, HttpError> {
    debug!("GET {url}");
    let response = client(timeout)?.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        warn!("GET {url} returned {status}");
        return Err(HttpError::Status(status));
    }
    Ok(response)
}

/// Downloads a URL as text.
///
/// # Errors
///
/// Returns `Err` on connection failure, timeout, or a non-2xx status.
pub async fn download_text(url: &str) -> Result<String, HttpError> {
    let body = get(url, TEXT_TIMEOUT).await?.text().await?;
    debug!("GET {url}: {} bytes", body.len());
    Ok(body)
}

/// Path of the in-progress file next to `destination`
fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// Downloads a URL into `destination`.
///
/// The body is streamed into `<destination>.part` and renamed into place once
/// complete; on failure the partial file is removed and `destination` is left
/// untouched. `progress(downloaded, total)` is called after each chunk when
/// the server announced a content length.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// Returns `Err` on connection failure, timeout, non-2xx status, or a
/// filesystem error.
pub async fn download_file<F>(
    url: &str,
    destination: &Path,
    mut progress: Option<F>,
) -> Result<u64, HttpError>
where
    F: FnMut(u64, u64) + Send,
{
    let partial = partial_path(destination);

    let result = async {
        let mut response = get(url, FILE_TIMEOUT).await?;
        let total = response.content_length().unwrap_or(0);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut downloaded: u64 = 0;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            if total > 0
                && let Some(callback) = progress.as_mut()
            {
                callback(downloaded, total);
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&partial, destination).await?;
        Ok::<u64, HttpError>(downloaded)
    }
    .await;

    match result {
        Ok(bytes) => {
            info!("Downloaded {url} to {} ({bytes} bytes)", destination.display());
            Ok(bytes)
        }
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await
                && cleanup.kind() != std::io::ErrorKind::NotFound
            {
                warn!("Failed to remove {}: {cleanup}", partial.display());
            }
            Err(e)
        }
    }
}
