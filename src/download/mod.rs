//! Download pipeline: fetches the photos a sync hands it into local storage.
//!
//! Two throughput modes share the same per-photo steps. Unit mode (batch
//! size 1) fetches inside `submit`. Batched mode queues photos and, once the
//! queue reaches the batch size, streams them concurrently with
//! `buffer_unordered` and waits for the whole batch. One failed file never
//! stops its siblings.

pub mod error;
pub mod file;
pub mod progress;
pub mod storage;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::fs::FileTimes;

use crate::identity::{ClientCache, ClientProfile, IdentityPool, SelectionMode};
use crate::retry::RetryConfig;
use crate::state::{IndexDb, LockRelease, PhotoRecord};
use crate::sync::{PhotoSink, SyncOptions};

pub use error::DownloadError;
pub use progress::{BarObserver, ProgressEvent, ProgressObserver};
pub use storage::{FileHandle, FsStorage, StorageProvider};

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// 1 means unit mode.
    pub batch_size: usize,
    pub retry: RetryConfig,
    /// Per-request timeout, covering the whole body.
    pub timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Counters over the pipeline's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    pub downloaded: u64,
    pub failed: u64,
    pub already_present: u64,
}

pub struct DownloadPipeline {
    db: Arc<dyn IndexDb>,
    storage: Arc<dyn StorageProvider>,
    identities: Arc<IdentityPool>,
    clients: Arc<ClientCache>,
    config: DownloadConfig,
    observer: Option<Arc<dyn ProgressObserver>>,
    queue: tokio::sync::Mutex<Vec<(PhotoRecord, SelectionMode)>>,
    next_job_id: AtomicU64,
    downloaded: AtomicU64,
    failed: AtomicU64,
    already_present: AtomicU64,
}

impl DownloadPipeline {
    pub fn new(
        db: Arc<dyn IndexDb>,
        storage: Arc<dyn StorageProvider>,
        identities: Arc<IdentityPool>,
        clients: Arc<ClientCache>,
        config: DownloadConfig,
    ) -> Self {
        Self {
            db,
            storage,
            identities,
            clients,
            config,
            observer: None,
            queue: tokio::sync::Mutex::new(Vec::new()),
            next_job_id: AtomicU64::new(1),
            downloaded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            already_present: AtomicU64::new(0),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }

    pub fn stats(&self) -> DownloadStats {
        DownloadStats {
            downloaded: self.downloaded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            already_present: self.already_present.load(Ordering::Relaxed),
        }
    }

    /// Emit a log line without tearing the progress bars.
    fn log(&self, f: impl FnOnce()) {
        match &self.observer {
            Some(observer) => {
                let mut f = Some(f);
                observer.suspend(&mut || {
                    if let Some(f) = f.take() {
                        f()
                    }
                });
            }
            None => f(),
        }
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(observer) = &self.observer {
            observer.on_progress(&event);
        }
    }

    /// Run a batch concurrently. Returns how many of its photos failed.
    async fn run_batch(&self, jobs: Vec<(PhotoRecord, SelectionMode)>) -> u64 {
        if jobs.is_empty() {
            return 0;
        }
        tracing::debug!(count = jobs.len(), "Starting download batch");
        stream::iter(jobs)
            .map(|(photo, mode)| self.fetch(photo, mode))
            .buffer_unordered(self.batch_size())
            .fold(0, |failed, ok| async move { failed + u64::from(!ok) })
            .await
    }

    /// Fetch one photo. `false` means the file is not on disk.
    async fn fetch(&self, photo: PhotoRecord, mode: SelectionMode) -> bool {
        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);

        if self.storage.exists(&photo).await {
            let path = self.storage.final_path(&photo);
            tracing::debug!(photo_id = %photo.id, path = %path.display(), "Already on disk");
            if let Err(e) = self.db.record_local_file(&photo.id, &path).await {
                self.log(|| tracing::warn!(photo_id = %photo.id, error = %e, "Failed to record existing file"));
            }
            self.already_present.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        // Locked photos are filtered before they reach us, so contention
        // here means two writers raced on the same record.
        if let Err(e) = self.db.try_lock_photo(&photo.id).await {
            self.log(|| tracing::error!(photo_id = %photo.id, error = %e, "Cannot lock photo for download"));
            self.failed.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let result = self.download_locked(&photo, mode, job_id).await;
        let (release, ok) = match &result {
            Ok(path) => (
                LockRelease::Downloaded {
                    local_path: path.clone(),
                },
                true,
            ),
            Err(e) => (LockRelease::Failed { error: e.to_string() }, false),
        };

        if let Err(e) = &result {
            self.log(|| tracing::error!(photo_id = %photo.id, error = %e, "Download failed"));
            self.emit(ProgressEvent {
                job_id,
                photo_id: photo.id.clone(),
                bytes_downloaded: 0,
                bytes_total: -1,
                completed: false,
                error: Some(e.to_string()),
            });
        }

        if let Err(e) = self.db.release_photo_lock(&photo.id, &release).await {
            self.log(|| tracing::error!(photo_id = %photo.id, error = %e, "Failed to release photo lock"));
            self.failed.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if ok {
            self.downloaded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// The part of a fetch that runs under the photo's write lock.
    async fn download_locked(
        &self,
        photo: &PhotoRecord,
        mode: SelectionMode,
        job_id: u64,
    ) -> Result<PathBuf, DownloadError> {
        let handle = self.storage.open_for_write(photo).await?;
        let result = self.stream_to(photo, &handle, mode, job_id).await;
        if let Err(e) = result {
            if let Err(abort_err) = self.storage.abort(&handle).await {
                tracing::warn!(
                    path = %handle.temp_path.display(),
                    error = %abort_err,
                    "Failed to remove partial file"
                );
            }
            return Err(e);
        }

        if let Some(when) = photo.date_taken.or(photo.date_uploaded) {
            let path = handle.final_path.clone();
            let ts = when.timestamp();
            match tokio::task::spawn_blocking(move || set_file_mtime(&path, ts)).await {
                Ok(Err(e)) => tracing::warn!(photo_id = %photo.id, error = %e, "Could not set mtime"),
                Err(e) => tracing::warn!(photo_id = %photo.id, error = %e, "mtime task failed"),
                Ok(Ok(())) => {}
            }
        }
        Ok(handle.final_path)
    }

    async fn stream_to(
        &self,
        photo: &PhotoRecord,
        handle: &FileHandle,
        mode: SelectionMode,
        job_id: u64,
    ) -> Result<(), DownloadError> {
        let identity = self.identities.select(ClientProfile::Cdn, mode);
        let client = self.clients.get(&identity.http)?;

        let on_chunk = |done: u64, total: Option<u64>| {
            self.emit(ProgressEvent {
                job_id,
                photo_id: photo.id.clone(),
                bytes_downloaded: done,
                bytes_total: total.and_then(|t| i64::try_from(t).ok()).unwrap_or(-1),
                completed: false,
                error: None,
            });
        };
        let bytes = file::download_to(
            &client,
            &photo.url,
            &handle.temp_path,
            &photo.id,
            self.config.timeout,
            &self.config.retry,
            &on_chunk,
        )
        .await?;
        self.storage.commit(handle).await?;

        tracing::debug!(
            photo_id = %photo.id,
            size = %photo.size,
            bytes,
            path = %handle.final_path.display(),
            "Downloaded"
        );
        self.emit(ProgressEvent {
            job_id,
            photo_id: photo.id.clone(),
            bytes_downloaded: bytes,
            bytes_total: i64::try_from(bytes).unwrap_or(-1),
            completed: true,
            error: None,
        });
        Ok(())
    }
}

#[async_trait]
impl PhotoSink for DownloadPipeline {
    async fn submit(&self, photo: PhotoRecord, options: &SyncOptions) -> u64 {
        let mode = if options.switch_identities {
            SelectionMode::Randomized
        } else {
            SelectionMode::Pinned
        };
        if self.batch_size() == 1 {
            return u64::from(!self.fetch(photo, mode).await);
        }

        let batch = {
            let mut queue = self.queue.lock().await;
            queue.push((photo, mode));
            if queue.len() < self.batch_size() {
                return 0;
            }
            std::mem::take(&mut *queue)
        };
        self.run_batch(batch).await
    }

    async fn flush(&self) -> u64 {
        let batch = std::mem::take(&mut *self.queue.lock().await);
        self.run_batch(batch).await
    }
}

/// Set the modification and access times of a file to the given Unix
/// timestamp. Uses `std::fs::File::set_times`.
fn set_file_mtime(path: &Path, timestamp: i64) -> std::io::Result<()> {
    let time = if timestamp >= 0 {
        UNIX_EPOCH + Duration::from_secs(timestamp as u64)
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(timestamp.unsigned_abs()))
            .unwrap_or(SystemTime::UNIX_EPOCH)
    };
    let times = FileTimes::new().set_modified(time).set_accessed(time);
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_times(times)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ApiKey;
    use crate::model::SizeVariant;
    use crate::state::{SqliteIndexDb, UserRecord};
    use chrono::TimeZone;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressObserver for RecordingObserver {
        fn on_progress(&self, event: &ProgressEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    struct Fixture {
        server: MockServer,
        dir: tempfile::TempDir,
        db: Arc<SqliteIndexDb>,
    }

    impl Fixture {
        async fn new() -> Self {
            Self {
                server: MockServer::start().await,
                dir: tempfile::tempdir().unwrap(),
                db: Arc::new(SqliteIndexDb::open_in_memory().unwrap()),
            }
        }

        fn pipeline(&self, batch_size: usize) -> DownloadPipeline {
            let pool = IdentityPool::new(
                vec!["test-key".parse::<ApiKey>().unwrap()],
                vec![],
                vec![],
                SelectionMode::Pinned,
            )
            .unwrap();
            DownloadPipeline::new(
                self.db.clone(),
                Arc::new(FsStorage::new(self.dir.path())),
                Arc::new(pool),
                Arc::new(ClientCache::new(Duration::from_secs(5))),
                DownloadConfig {
                    batch_size,
                    retry: RetryConfig {
                        max_retries: 1,
                        base_delay: Duration::from_millis(1),
                        max_delay: Duration::from_millis(2),
                        ..RetryConfig::default()
                    },
                    timeout: Duration::from_secs(5),
                },
            )
        }

        /// Index a photo whose CDN file is `/{id}_abc_o.jpg` on the mock server.
        async fn photo(&self, id: &str) -> PhotoRecord {
            self.db
                .upsert_user(&UserRecord::new("owner@N01".into(), "Owner".into(), None))
                .await
                .unwrap();
            let mut photo = PhotoRecord::new(
                id.into(),
                "owner@N01".into(),
                SizeVariant::Original,
                format!("{}/{id}_abc_o.jpg", self.server.uri()),
            );
            photo.date_taken = Some(chrono::Utc.timestamp_opt(1_500_000_000, 0).unwrap());
            self.db.save_photo(&photo).await.unwrap();
            photo
        }

        async fn serve(&self, id: &str, body: &'static [u8]) {
            Mock::given(method("GET"))
                .and(path(format!("/{id}_abc_o.jpg")))
                .respond_with(
                    ResponseTemplate::new(200)
                        .insert_header("content-type", "image/jpeg")
                        .set_body_bytes(body),
                )
                .mount(&self.server)
                .await;
        }

        async fn missing(&self, id: &str) {
            Mock::given(method("GET"))
                .and(path(format!("/{id}_abc_o.jpg")))
                .respond_with(ResponseTemplate::new(404))
                .mount(&self.server)
                .await;
        }

        fn file(&self, id: &str) -> PathBuf {
            self.dir.path().join("owner@N01").join(format!("{id}_abc_o.jpg"))
        }

        async fn request_count(&self) -> usize {
            self.server.received_requests().await.unwrap_or_default().len()
        }
    }

    #[tokio::test]
    async fn test_unit_mode_downloads_and_records_path() {
        let fx = Fixture::new().await;
        fx.serve("1", b"jpeg-bytes").await;
        let observer = Arc::new(RecordingObserver::default());
        let pipeline = fx.pipeline(1).with_observer(observer.clone());
        let photo = fx.photo("1").await;

        assert_eq!(pipeline.submit(photo, &SyncOptions::default()).await, 0);

        assert_eq!(std::fs::read(fx.file("1")).unwrap(), b"jpeg-bytes");
        let stored = fx.db.get_photo("1").await.unwrap().unwrap();
        assert!(stored.is_on_disk());
        assert_eq!(stored.local_path, Some(fx.file("1")));
        assert!(stored.status.write_locked_at.is_none());

        let mtime = std::fs::metadata(fx.file("1")).unwrap().modified().unwrap();
        assert_eq!(mtime, UNIX_EPOCH + Duration::from_secs(1_500_000_000));

        let events = observer.events.lock().unwrap();
        assert!(events.iter().all(|e| e.job_id == events[0].job_id));
        let last = events.last().unwrap();
        assert!(last.completed);
        assert_eq!(last.bytes_downloaded, 10);
        assert_eq!(pipeline.stats().downloaded, 1);
    }

    #[tokio::test]
    async fn test_existing_file_is_not_fetched() {
        let fx = Fixture::new().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&fx.server)
            .await;
        let pipeline = fx.pipeline(1);
        let photo = fx.photo("2").await;
        std::fs::create_dir_all(fx.file("2").parent().unwrap()).unwrap();
        std::fs::write(fx.file("2"), b"already here").unwrap();

        assert_eq!(pipeline.submit(photo, &SyncOptions::default()).await, 0);

        assert_eq!(pipeline.stats().already_present, 1);
        let stored = fx.db.get_photo("2").await.unwrap().unwrap();
        assert_eq!(stored.local_path, Some(fx.file("2")));
    }

    #[tokio::test]
    async fn test_failed_download_leaves_no_file_and_records_error() {
        let fx = Fixture::new().await;
        fx.missing("3").await;
        let observer = Arc::new(RecordingObserver::default());
        let pipeline = fx.pipeline(1).with_observer(observer.clone());
        let photo = fx.photo("3").await;

        assert_eq!(pipeline.submit(photo, &SyncOptions::default()).await, 1);

        assert!(!fx.file("3").exists());
        assert!(!fx.file("3").with_file_name("3_abc_o.jpg.part").exists());
        let stored = fx.db.get_photo("3").await.unwrap().unwrap();
        assert!(!stored.filesystem_in_sync);
        assert_eq!(stored.download_attempts, 1);
        assert!(stored.last_error.unwrap().contains("404"));
        assert!(stored.status.write_locked_at.is_none());
        assert!(observer.events.lock().unwrap().last().unwrap().error.is_some());
    }

    #[tokio::test]
    async fn test_locked_photo_is_not_fetched() {
        let fx = Fixture::new().await;
        fx.serve("4", b"x").await;
        let pipeline = fx.pipeline(1);
        let photo = fx.photo("4").await;
        fx.db.try_lock_photo("4").await.unwrap();

        assert_eq!(pipeline.submit(photo, &SyncOptions::default()).await, 1);

        assert_eq!(fx.request_count().await, 0);
        assert!(!fx.file("4").exists());
        assert_eq!(pipeline.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_batch_waits_until_full_and_isolates_failures() {
        let fx = Fixture::new().await;
        fx.serve("a", b"aaaa").await;
        fx.missing("b").await;
        fx.serve("c", b"cccc").await;
        let pipeline = fx.pipeline(3);
        let options = SyncOptions::default();

        assert_eq!(pipeline.submit(fx.photo("a").await, &options).await, 0);
        assert_eq!(pipeline.submit(fx.photo("b").await, &options).await, 0);
        assert_eq!(fx.request_count().await, 0);

        assert_eq!(pipeline.submit(fx.photo("c").await, &options).await, 1);

        assert!(fx.file("a").exists());
        assert!(!fx.file("b").exists());
        assert!(fx.file("c").exists());
        assert_eq!(
            pipeline.stats(),
            DownloadStats {
                downloaded: 2,
                failed: 1,
                already_present: 0
            }
        );
    }

    #[tokio::test]
    async fn test_flush_drains_partial_batch() {
        let fx = Fixture::new().await;
        fx.serve("d", b"dd").await;
        let pipeline = fx.pipeline(8);
        let options = SyncOptions {
            switch_identities: true,
            ..SyncOptions::default()
        };

        assert_eq!(pipeline.submit(fx.photo("d").await, &options).await, 0);
        assert!(!fx.file("d").exists());

        assert_eq!(pipeline.flush().await, 0);
        assert!(fx.file("d").exists());
        // Nothing left to drain.
        assert_eq!(pipeline.flush().await, 0);
        assert_eq!(fx.request_count().await, 1);
    }

    #[tokio::test]
    async fn test_batch_counts_every_failed_file() {
        let fx = Fixture::new().await;
        fx.missing("e").await;
        fx.serve("f", b"ff").await;
        fx.missing("g").await;
        fx.missing("h").await;
        let pipeline = fx.pipeline(3);
        let options = SyncOptions::default();

        pipeline.submit(fx.photo("e").await, &options).await;
        pipeline.submit(fx.photo("f").await, &options).await;
        assert_eq!(pipeline.submit(fx.photo("g").await, &options).await, 2);

        pipeline.submit(fx.photo("h").await, &options).await;
        assert_eq!(pipeline.flush().await, 1);
        assert_eq!(pipeline.stats().failed, 3);
        assert_eq!(fx.db.get_failed_photos().await.unwrap().len(), 3);
    }

    #[test]
    fn test_set_file_mtime_before_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("old.jpg");
        std::fs::write(&p, b"x").unwrap();
        set_file_mtime(&p, -86_400).unwrap();
        let mtime = std::fs::metadata(&p).unwrap().modified().unwrap();
        assert_eq!(mtime, UNIX_EPOCH - Duration::from_secs(86_400));
    }
}
