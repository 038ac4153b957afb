//! Records stored in the local index.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::model::{CollectionKind, SizeVariant};

/// A remote user, keyed by canonical id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub display_name: String,
    /// Screen alias, if the user has one. Never compared against `id`.
    pub alias: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(id: String, display_name: String, alias: Option<String>) -> Self {
        Self {
            id,
            display_name,
            alias,
            created_at: Utc::now(),
        }
    }
}

/// The status bundle shared by photos and collections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusFlags {
    pub blacklisted: bool,
    pub deleted: bool,
    /// Present means locked. Age says nothing about staleness.
    pub write_locked_at: Option<DateTime<Utc>>,
}

/// What a sync may do with a known record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Syncable,
    Blacklisted,
    Deleted,
    WriteLocked,
}

impl StatusFlags {
    /// Blacklisting wins over deletion, deletion over a lock.
    pub fn state(&self) -> RecordState {
        if self.blacklisted {
            RecordState::Blacklisted
        } else if self.deleted {
            RecordState::Deleted
        } else if self.write_locked_at.is_some() {
            RecordState::WriteLocked
        } else {
            RecordState::Syncable
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhotoRecord {
    pub id: String,
    pub owner_id: String,
    /// Best size variant known so far. Never decreases.
    pub size: SizeVariant,
    /// CDN URL for `size`.
    pub url: String,
    pub local_path: Option<PathBuf>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub date_taken: Option<DateTime<Utc>>,
    pub date_uploaded: Option<DateTime<Utc>>,
    pub date_last_updated: Option<DateTime<Utc>>,
    pub date_last_retrieved: Option<DateTime<Utc>>,
    pub views_local: u64,
    pub views_remote: u64,
    pub faves_remote: u64,
    pub status: StatusFlags,
    pub filesystem_in_sync: bool,
    pub download_attempts: u32,
    pub last_error: Option<String>,
}

impl PhotoRecord {
    /// A minimal record for a photo seen for the first time.
    pub fn new(id: String, owner_id: String, size: SizeVariant, url: String) -> Self {
        Self {
            id,
            owner_id,
            size,
            url,
            local_path: None,
            title: None,
            description: None,
            date_taken: None,
            date_uploaded: None,
            date_last_updated: None,
            date_last_retrieved: None,
            views_local: 0,
            views_remote: 0,
            faves_remote: 0,
            status: StatusFlags::default(),
            filesystem_in_sync: false,
            download_attempts: 0,
            last_error: None,
        }
    }

    /// Whether the index believes the file is on disk.
    pub fn is_on_disk(&self) -> bool {
        self.filesystem_in_sync && self.local_path.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRecord {
    pub kind: CollectionKind,
    pub id: String,
    pub owner_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub item_count: Option<u64>,
    pub date_created: Option<DateTime<Utc>>,
    /// Remote last-modified time as of the last metadata refresh.
    pub date_last_updated: Option<DateTime<Utc>>,
    pub date_last_retrieved: Option<DateTime<Utc>>,
    /// `None` means never fully synced, or the last item sync failed.
    pub date_sync_completed: Option<DateTime<Utc>>,
    pub status: StatusFlags,
}

impl CollectionRecord {
    pub fn new(kind: CollectionKind, id: String, owner_id: Option<String>) -> Self {
        Self {
            kind,
            id,
            owner_id,
            title: None,
            description: None,
            item_count: None,
            date_created: None,
            date_last_updated: None,
            date_last_retrieved: None,
            date_sync_completed: None,
            status: StatusFlags::default(),
        }
    }
}

/// How a photo lock is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockRelease {
    /// The file is committed at `local_path`.
    Downloaded { local_path: PathBuf },
    /// The download failed; the error is kept for `status --failed`.
    Failed { error: String },
}

/// Which table a locked record lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockedKind {
    Photo,
    Collection(CollectionKind),
}

/// A record currently holding a write lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedRecord {
    pub kind: LockedKind,
    pub id: String,
    pub locked_at: DateTime<Utc>,
}

impl std::fmt::Display for LockedRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            LockedKind::Photo => write!(f, "photo {}", self.id)?,
            LockedKind::Collection(kind) => write!(f, "{kind} {}", self.id)?,
        }
        write!(f, " (locked {})", self.locked_at.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

/// Statistics for a single sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRunStats {
    /// Inputs the run got to, whether or not they resolved.
    pub collections_seen: u64,
    pub collections_synced: u64,
    pub collections_failed: u64,
    /// Photos handed to the sink.
    pub photos_queued: u64,
    pub photos_downloaded: u64,
    pub photos_failed: u64,
    /// Whether the run was cut short by a shutdown signal.
    pub interrupted: bool,
}

/// Summary of the current index contents.
#[derive(Debug, Clone)]
pub struct IndexSummary {
    pub users: u64,
    pub photos: u64,
    pub photos_on_disk: u64,
    pub photos_failed: u64,
    pub collections: u64,
    pub collections_completed: u64,
    pub locked: u64,
    pub last_sync_started: Option<DateTime<Utc>>,
    pub last_sync_completed: Option<DateTime<Utc>>,
    /// Counters of the most recent run, once it finished.
    pub last_run: Option<SyncRunStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_precedence() {
        let mut flags = StatusFlags::default();
        assert_eq!(flags.state(), RecordState::Syncable);

        flags.write_locked_at = Some(Utc::now());
        assert_eq!(flags.state(), RecordState::WriteLocked);

        flags.deleted = true;
        assert_eq!(flags.state(), RecordState::Deleted);

        flags.blacklisted = true;
        assert_eq!(flags.state(), RecordState::Blacklisted);
    }

    #[test]
    fn test_new_photo_is_not_on_disk() {
        let p = PhotoRecord::new("1".into(), "u".into(), SizeVariant::Large, "https://x/1.jpg".into());
        assert!(!p.is_on_disk());
        assert_eq!(p.status.state(), RecordState::Syncable);
    }

    #[test]
    fn test_on_disk_requires_path_and_flag() {
        let mut p = PhotoRecord::new("1".into(), "u".into(), SizeVariant::Large, "u".into());
        p.filesystem_in_sync = true;
        assert!(!p.is_on_disk());
        p.local_path = Some(PathBuf::from("/tmp/1.jpg"));
        assert!(p.is_on_disk());
    }

    #[test]
    fn test_locked_record_display() {
        let r = LockedRecord {
            kind: LockedKind::Collection(CollectionKind::Album),
            id: "7215".into(),
            locked_at: DateTime::from_timestamp(0, 0).unwrap(),
        };
        assert_eq!(r.to_string(), "album 7215 (locked 1970-01-01 00:00:00 UTC)");
    }
}
