use thiserror::Error;

use crate::identity::IdentityError;
use crate::retry::RetryConfig;

/// Typed download errors enabling retry classification.
///
/// `is_retryable()` separates transient failures (server errors, rate limits,
/// HTML error pages served with a success status, dropped connections) from
/// permanent ones (missing files, disk failures, bad proxy settings) so the
/// retry loop can abort early.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error {status} downloading photo {photo_id}")]
    HttpStatus { status: u16, photo_id: String },

    #[error("CDN served {content_type} instead of image data for photo {photo_id}")]
    UnexpectedContent {
        content_type: String,
        photo_id: String,
    },

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),

    #[error("HTTP error downloading photo {photo_id} (bytes_so_far={bytes_written}): {source}")]
    Http {
        source: reqwest::Error,
        photo_id: String,
        bytes_written: u64,
    },

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl DownloadError {
    /// Whether this error is transient and worth retrying under `policy`.
    pub fn is_retryable(&self, policy: &RetryConfig) -> bool {
        match self {
            DownloadError::HttpStatus { status, .. } => policy.is_transient_status(*status),
            DownloadError::UnexpectedContent { .. } => true,
            DownloadError::Http { source, .. } => !source.is_builder(),
            DownloadError::Disk(_) => false,
            DownloadError::Identity(_) => false,
        }
    }
}
