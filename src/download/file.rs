use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::DownloadError;
use crate::retry::{self, RetryAction, RetryConfig};

/// Called after every chunk with the bytes written so far and the declared
/// length, if the server sent one.
pub type ChunkCallback<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Stream `url` into `temp_path`, retrying transient failures.
///
/// Each attempt truncates the temp file and starts from scratch. The caller
/// owns the temp file afterwards: it commits or aborts it. Exhausting retries
/// returns the last attempt's error unchanged.
pub async fn download_to(
    client: &Client,
    url: &str,
    temp_path: &Path,
    photo_id: &str,
    timeout: Duration,
    retry_config: &RetryConfig,
    on_chunk: ChunkCallback<'_>,
) -> Result<u64, DownloadError> {
    retry::retry_with_backoff(
        retry_config,
        |e: &DownloadError| {
            if e.is_retryable(retry_config) {
                tracing::warn!(photo_id, error = %e, "Retrying download");
                RetryAction::Retry
            } else {
                RetryAction::Abort
            }
        },
        || attempt_download(client, url, temp_path, photo_id, timeout, retry_config, on_chunk),
    )
    .await
}

/// Single download attempt.
async fn attempt_download(
    client: &Client,
    url: &str,
    temp_path: &Path,
    photo_id: &str,
    timeout: Duration,
    retry_config: &RetryConfig,
    on_chunk: ChunkCallback<'_>,
) -> Result<u64, DownloadError> {
    let http = |source, bytes_written| DownloadError::Http {
        source,
        photo_id: photo_id.to_string(),
        bytes_written,
    };
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| http(e, 0))?;

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if !response.status().is_success() {
        return Err(DownloadError::HttpStatus {
            status,
            photo_id: photo_id.to_string(),
        });
    }
    if retry_config.classify_response(status, content_type.as_deref(), true) == RetryAction::Retry {
        return Err(DownloadError::UnexpectedContent {
            content_type: content_type.unwrap_or_default(),
            photo_id: photo_id.to_string(),
        });
    }

    let content_length = response.content_length();
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(temp_path)
        .await?;

    let mut bytes_written: u64 = 0;
    on_chunk(0, content_length);
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            tracing::warn!(
                photo_id,
                status,
                ?content_length,
                bytes_written,
                "Body decode error: {e}"
            );
            http(e, bytes_written)
        })?;
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
        on_chunk(bytes_written, content_length);
    }
    file.flush().await?;
    drop(file);

    Ok(bytes_written)
}

/// Remove a temp file if present.
pub async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
