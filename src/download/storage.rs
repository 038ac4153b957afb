//! Where downloaded files live on disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::file::remove_if_exists;
use crate::model::size::cdn_filename;
use crate::state::PhotoRecord;

/// A temp sink for one download and the path it becomes on commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub temp_path: PathBuf,
    pub final_path: PathBuf,
}

/// Storage backend for downloaded photos.
///
/// `commit` must be atomic: a reader sees either no file at `final_path` or
/// the complete one.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    fn final_path(&self, photo: &PhotoRecord) -> PathBuf;

    async fn exists(&self, photo: &PhotoRecord) -> bool;

    async fn open_for_write(&self, photo: &PhotoRecord) -> std::io::Result<FileHandle>;

    async fn commit(&self, handle: &FileHandle) -> std::io::Result<()>;

    /// Drop whatever was written to the temp sink.
    async fn abort(&self, handle: &FileHandle) -> std::io::Result<()>;
}

/// Plain directory tree: `{root}/{owner_id}/{cdn_filename}`.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl StorageProvider for FsStorage {
    fn final_path(&self, photo: &PhotoRecord) -> PathBuf {
        let filename = cdn_filename(&photo.url)
            .map(|f| clean_filename(&f))
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| format!("{}_{}.jpg", clean_filename(&photo.id), photo.size.suffix()));
        self.root.join(clean_filename(&photo.owner_id)).join(filename)
    }

    async fn exists(&self, photo: &PhotoRecord) -> bool {
        tokio::fs::try_exists(self.final_path(photo))
            .await
            .unwrap_or(false)
    }

    async fn open_for_write(&self, photo: &PhotoRecord) -> std::io::Result<FileHandle> {
        let final_path = self.final_path(photo);
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp_path = part_path(&final_path);
        // Leftovers from a crashed run.
        remove_if_exists(&temp_path).await?;
        tokio::fs::File::create(&temp_path).await?;
        Ok(FileHandle {
            temp_path,
            final_path,
        })
    }

    async fn commit(&self, handle: &FileHandle) -> std::io::Result<()> {
        tokio::fs::rename(&handle.temp_path, &handle.final_path).await
    }

    async fn abort(&self, handle: &FileHandle) -> std::io::Result<()> {
        remove_if_exists(&handle.temp_path).await
    }
}

/// Temp path next to the final file so the commit stays on one filesystem.
fn part_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    final_path.with_file_name(name)
}

/// Strip characters that are invalid in filenames on common filesystems.
///
/// Owner ids contain `@`, which is fine; path separators and the Windows
/// reserved set are not.
pub fn clean_filename(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SizeVariant;

    fn photo(url: &str) -> PhotoRecord {
        PhotoRecord::new("51234".into(), "130608600@N05".into(), SizeVariant::Original, url.into())
    }

    #[test]
    fn test_clean_filename_strips_separators() {
        assert_eq!(clean_filename("a/b\\c:d*e?f\"g<h>i|j"), "abcdefghij");
        assert_eq!(clean_filename("12345@N02"), "12345@N02");
        assert_eq!(clean_filename(".."), "");
    }

    #[test]
    fn test_final_path_uses_owner_and_cdn_filename() {
        let storage = FsStorage::new("/library");
        let p = storage.final_path(&photo(
            "https://live.staticflickr.com/65535/51234_abcdef_o.jpg",
        ));
        assert_eq!(p, PathBuf::from("/library/130608600@N05/51234_abcdef_o.jpg"));
    }

    #[test]
    fn test_final_path_falls_back_without_filename() {
        let storage = FsStorage::new("/library");
        let p = storage.final_path(&photo("https://live.staticflickr.com/"));
        assert_eq!(p, PathBuf::from("/library/130608600@N05/51234_o.jpg"));
    }

    #[test]
    fn test_part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/x/y/photo.jpg")),
            PathBuf::from("/x/y/photo.jpg.part")
        );
    }

    #[tokio::test]
    async fn test_commit_renames_temp_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let p = photo("https://cdn.example/1/51234_ab_o.jpg");
        assert!(!storage.exists(&p).await);

        let handle = storage.open_for_write(&p).await.unwrap();
        assert!(handle.temp_path.exists());
        std::fs::write(&handle.temp_path, b"data").unwrap();
        storage.commit(&handle).await.unwrap();

        assert!(storage.exists(&p).await);
        assert!(!handle.temp_path.exists());
        assert_eq!(std::fs::read(&handle.final_path).unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_abort_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let p = photo("https://cdn.example/1/51234_ab_o.jpg");

        let handle = storage.open_for_write(&p).await.unwrap();
        std::fs::write(&handle.temp_path, b"half").unwrap();
        storage.abort(&handle).await.unwrap();
        storage.abort(&handle).await.unwrap();

        assert!(!handle.temp_path.exists());
        assert!(!storage.exists(&p).await);
    }

    #[tokio::test]
    async fn test_open_discards_stale_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let p = photo("https://cdn.example/1/51234_ab_o.jpg");
        let stale = part_path(&storage.final_path(&p));
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, b"stale bytes").unwrap();

        let handle = storage.open_for_write(&p).await.unwrap();
        assert_eq!(std::fs::read(&handle.temp_path).unwrap().len(), 0);
    }
}
