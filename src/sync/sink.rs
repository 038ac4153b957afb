//! The receiving end of "this photo needs fetching".

use async_trait::async_trait;

use super::SyncOptions;
use crate::state::PhotoRecord;

/// Receives photos the sync decided to fetch.
///
/// `submit` may only queue the photo. Both calls return how many photos
/// failed among the work that call finished, so a batch of N photos that
/// runs inside one call can report anywhere from 0 to N failures.
#[async_trait]
pub trait PhotoSink: Send + Sync {
    async fn submit(&self, photo: PhotoRecord, options: &SyncOptions) -> u64;

    /// Finish anything queued.
    async fn flush(&self) -> u64 {
        0
    }
}

/// Sink for index-only runs: records are written, files are not.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndexOnlySink;

#[async_trait]
impl PhotoSink for IndexOnlySink {
    async fn submit(&self, photo: PhotoRecord, _options: &SyncOptions) -> u64 {
        tracing::debug!(photo_id = %photo.id, "Index only, not fetching");
        0
    }
}
