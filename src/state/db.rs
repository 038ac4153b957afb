//! Local index trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::StateError;
use super::schema;
use super::types::{
    CollectionRecord, IndexSummary, LockRelease, LockedKind, LockedRecord, PhotoRecord,
    StatusFlags, SyncRunStats, UserRecord,
};
use crate::model::{CollectionKind, SizeVariant};

/// Trait for local index operations.
///
/// This trait is object-safe and can be used with `Arc<dyn IndexDb>` for
/// shared access across async tasks. Write locks are application-level flags
/// (`write_locked_at`) that survive crashes; metadata upserts leave locked
/// rows untouched.
#[async_trait]
pub trait IndexDb: Send + Sync {
    // ── Users ──

    async fn get_user(&self, id: &str) -> Result<Option<UserRecord>, StateError>;

    async fn find_user_by_alias(&self, alias: &str) -> Result<Option<UserRecord>, StateError>;

    /// Insert a user or refresh their display name and alias.
    ///
    /// An alias held by a different user is taken away from them first,
    /// since aliases can be reassigned upstream.
    async fn upsert_user(&self, user: &UserRecord) -> Result<(), StateError>;

    // ── Collections ──

    async fn get_collection(
        &self,
        kind: CollectionKind,
        id: &str,
    ) -> Result<Option<CollectionRecord>, StateError>;

    /// Insert a collection or refresh its metadata.
    ///
    /// Status flags, the lock and `date_sync_completed` are never written here.
    async fn save_collection_metadata(&self, record: &CollectionRecord) -> Result<(), StateError>;

    /// Take the collection's write lock, failing with `AlreadyLocked` if held.
    async fn try_lock_collection(
        &self,
        kind: CollectionKind,
        id: &str,
    ) -> Result<DateTime<Utc>, StateError>;

    /// Release the collection lock and record the item-sync outcome.
    ///
    /// `completed` of `None` explicitly clears any earlier completion mark.
    async fn release_collection_lock(
        &self,
        kind: CollectionKind,
        id: &str,
        completed: Option<DateTime<Utc>>,
    ) -> Result<(), StateError>;

    /// Add a photo to a collection. Returns true if the link is new.
    async fn link_photo(
        &self,
        kind: CollectionKind,
        collection_id: &str,
        photo_id: &str,
    ) -> Result<bool, StateError>;

    async fn collection_photo_ids(
        &self,
        kind: CollectionKind,
        collection_id: &str,
    ) -> Result<Vec<String>, StateError>;

    // ── Photos ──

    async fn get_photo(&self, id: &str) -> Result<Option<PhotoRecord>, StateError>;

    /// Insert a photo or refresh its metadata, size and URL.
    ///
    /// The local path, failure bookkeeping and status flags are owned by the
    /// download pipeline and the operator and are not written. The disk flag
    /// can only be cleared here, never set: a record that moved to another
    /// file is not on disk until the pipeline commits it. A locked row is
    /// left as is.
    async fn save_photo(&self, record: &PhotoRecord) -> Result<(), StateError>;

    /// Take the photo's write lock, failing with `AlreadyLocked` if held.
    async fn try_lock_photo(&self, id: &str) -> Result<DateTime<Utc>, StateError>;

    async fn release_photo_lock(&self, id: &str, outcome: &LockRelease) -> Result<(), StateError>;

    /// Record that the photo's file was found in place without downloading.
    async fn record_local_file(&self, id: &str, local_path: &Path) -> Result<(), StateError>;

    // ── Administration ──

    /// Set the operator-controlled flags of a photo. Returns false if unknown.
    async fn set_photo_flags(
        &self,
        id: &str,
        blacklisted: bool,
        deleted: bool,
    ) -> Result<bool, StateError>;

    /// Set the operator-controlled flags of a collection. Returns false if unknown.
    async fn set_collection_flags(
        &self,
        kind: CollectionKind,
        id: &str,
        blacklisted: bool,
        deleted: bool,
    ) -> Result<bool, StateError>;

    async fn list_locked(&self) -> Result<Vec<LockedRecord>, StateError>;

    /// Clear every write lock. Returns the number of records unlocked.
    async fn unlock_all(&self) -> Result<u64, StateError>;

    /// Photos whose last download attempt failed and that are not on disk.
    async fn get_failed_photos(&self) -> Result<Vec<PhotoRecord>, StateError>;

    async fn get_summary(&self) -> Result<IndexSummary, StateError>;

    async fn start_sync_run(&self) -> Result<i64, StateError>;

    async fn complete_sync_run(&self, run_id: i64, stats: &SyncRunStats) -> Result<(), StateError>;
}

/// SQLite implementation of the local index.
pub struct SqliteIndexDb {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    /// Path to the database file (for error messages).
    path: PathBuf,
}

impl std::fmt::Debug for SqliteIndexDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteIndexDb")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

const PHOTO_COLUMNS: &str = "id, owner_id, size, url, local_path, title, description, \
    date_taken, date_uploaded, date_last_updated, date_last_retrieved, views_local, \
    views_remote, faves_remote, blacklisted, deleted, write_locked_at, filesystem_in_sync, \
    download_attempts, last_error";

const COLLECTION_COLUMNS: &str = "kind, id, owner_id, title, description, item_count, \
    date_created, date_last_updated, date_last_retrieved, date_sync_completed, blacklisted, \
    deleted, write_locked_at";

impl SqliteIndexDb {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            if let Some(parent) = path_clone.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| StateError::Open {
                        path: path_clone.clone(),
                        source: rusqlite::Error::ToSqlConversionFailure(Box::new(e)),
                    })?;
                }
            }
            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            // Several sync processes may share one index
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;
            conn.busy_timeout(std::time::Duration::from_secs(10))
                .map_err(StateError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StateError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))
    }
}

#[async_trait]
impl IndexDb for SqliteIndexDb {
    async fn get_user(&self, id: &str) -> Result<Option<UserRecord>, StateError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, display_name, alias, created_at FROM users WHERE id = ?1",
            [id],
            row_to_user,
        )
        .optional()
        .map_err(StateError::query)
    }

    async fn find_user_by_alias(&self, alias: &str) -> Result<Option<UserRecord>, StateError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, display_name, alias, created_at FROM users WHERE alias = ?1",
            [alias],
            row_to_user,
        )
        .optional()
        .map_err(StateError::query)
    }

    async fn upsert_user(&self, user: &UserRecord) -> Result<(), StateError> {
        let conn = self.conn()?;
        conn.execute("BEGIN TRANSACTION", [])
            .map_err(StateError::query)?;

        let result = (|| {
            if let Some(alias) = &user.alias {
                conn.execute(
                    "UPDATE users SET alias = NULL WHERE alias = ?1 AND id != ?2",
                    rusqlite::params![alias, &user.id],
                )?;
            }
            conn.execute(
                r#"
                INSERT INTO users (id, display_name, alias, created_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(id) DO UPDATE SET
                    display_name = excluded.display_name,
                    alias = COALESCE(excluded.alias, users.alias)
                "#,
                rusqlite::params![
                    &user.id,
                    &user.display_name,
                    &user.alias,
                    user.created_at.timestamp()
                ],
            )?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.execute("COMMIT", []).map_err(StateError::query)?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(StateError::query(e))
            }
        }
    }

    async fn get_collection(
        &self,
        kind: CollectionKind,
        id: &str,
    ) -> Result<Option<CollectionRecord>, StateError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {COLLECTION_COLUMNS} FROM collections WHERE kind = ?1 AND id = ?2"),
            [kind.as_str(), id],
            row_to_collection,
        )
        .optional()
        .map_err(StateError::query)
    }

    async fn save_collection_metadata(&self, record: &CollectionRecord) -> Result<(), StateError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO collections (kind, id, owner_id, title, description, item_count,
                date_created, date_last_updated, date_last_retrieved)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(kind, id) DO UPDATE SET
                owner_id = COALESCE(excluded.owner_id, collections.owner_id),
                title = excluded.title,
                description = excluded.description,
                item_count = excluded.item_count,
                date_created = COALESCE(collections.date_created, excluded.date_created),
                date_last_updated = excluded.date_last_updated,
                date_last_retrieved = excluded.date_last_retrieved
            WHERE collections.write_locked_at IS NULL
            "#,
            rusqlite::params![
                record.kind.as_str(),
                &record.id,
                &record.owner_id,
                &record.title,
                &record.description,
                record.item_count.map(|n| n as i64),
                ts(record.date_created),
                ts(record.date_last_updated),
                ts(record.date_last_retrieved),
            ],
        )
        .map_err(StateError::query)?;
        Ok(())
    }

    async fn try_lock_collection(
        &self,
        kind: CollectionKind,
        id: &str,
    ) -> Result<DateTime<Utc>, StateError> {
        let now = Utc::now();
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "UPDATE collections SET write_locked_at = ?1 \
                 WHERE kind = ?2 AND id = ?3 AND write_locked_at IS NULL",
                rusqlite::params![now.timestamp(), kind.as_str(), id],
            )
            .map_err(StateError::query)?;
        if rows == 1 {
            return Ok(now);
        }

        let existing: Option<Option<i64>> = conn
            .query_row(
                "SELECT write_locked_at FROM collections WHERE kind = ?1 AND id = ?2",
                [kind.as_str(), id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StateError::query)?;
        let record = format!("{kind} {id}");
        match existing {
            Some(locked_at) => Err(StateError::AlreadyLocked {
                record,
                locked_at: from_ts(locked_at),
            }),
            None => Err(StateError::NotFound(record)),
        }
    }

    async fn release_collection_lock(
        &self,
        kind: CollectionKind,
        id: &str,
        completed: Option<DateTime<Utc>>,
    ) -> Result<(), StateError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE collections SET write_locked_at = NULL, date_sync_completed = ?1 \
             WHERE kind = ?2 AND id = ?3",
            rusqlite::params![ts(completed), kind.as_str(), id],
        )
        .map_err(StateError::query)?;
        Ok(())
    }

    async fn link_photo(
        &self,
        kind: CollectionKind,
        collection_id: &str,
        photo_id: &str,
    ) -> Result<bool, StateError> {
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "INSERT OR IGNORE INTO collection_photos (kind, collection_id, photo_id) \
                 VALUES (?1, ?2, ?3)",
                [kind.as_str(), collection_id, photo_id],
            )
            .map_err(StateError::query)?;
        Ok(rows == 1)
    }

    async fn collection_photo_ids(
        &self,
        kind: CollectionKind,
        collection_id: &str,
    ) -> Result<Vec<String>, StateError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT photo_id FROM collection_photos \
                 WHERE kind = ?1 AND collection_id = ?2 ORDER BY rowid",
            )
            .map_err(StateError::query)?;
        let ids = stmt
            .query_map([kind.as_str(), collection_id], |row| row.get(0))
            .map_err(StateError::query)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(StateError::query)?;
        Ok(ids)
    }

    async fn get_photo(&self, id: &str) -> Result<Option<PhotoRecord>, StateError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE id = ?1"),
            [id],
            row_to_photo,
        )
        .optional()
        .map_err(StateError::query)
    }

    async fn save_photo(&self, record: &PhotoRecord) -> Result<(), StateError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO photos (id, owner_id, size, url, title, description, date_taken,
                date_uploaded, date_last_updated, date_last_retrieved, views_remote, faves_remote,
                filesystem_in_sync)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0)
            ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                size = excluded.size,
                url = excluded.url,
                title = excluded.title,
                description = excluded.description,
                date_taken = excluded.date_taken,
                date_uploaded = excluded.date_uploaded,
                date_last_updated = excluded.date_last_updated,
                date_last_retrieved = excluded.date_last_retrieved,
                views_remote = excluded.views_remote,
                faves_remote = excluded.faves_remote,
                filesystem_in_sync = photos.filesystem_in_sync AND ?13
            WHERE photos.write_locked_at IS NULL
            "#,
            rusqlite::params![
                &record.id,
                &record.owner_id,
                record.size.suffix(),
                &record.url,
                &record.title,
                &record.description,
                ts(record.date_taken),
                ts(record.date_uploaded),
                ts(record.date_last_updated),
                ts(record.date_last_retrieved),
                record.views_remote as i64,
                record.faves_remote as i64,
                record.filesystem_in_sync,
            ],
        )
        .map_err(StateError::query)?;
        Ok(())
    }

    async fn try_lock_photo(&self, id: &str) -> Result<DateTime<Utc>, StateError> {
        let now = Utc::now();
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "UPDATE photos SET write_locked_at = ?1 WHERE id = ?2 AND write_locked_at IS NULL",
                rusqlite::params![now.timestamp(), id],
            )
            .map_err(StateError::query)?;
        if rows == 1 {
            return Ok(now);
        }

        let existing: Option<Option<i64>> = conn
            .query_row(
                "SELECT write_locked_at FROM photos WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StateError::query)?;
        let record = format!("photo {id}");
        match existing {
            Some(locked_at) => Err(StateError::AlreadyLocked {
                record,
                locked_at: from_ts(locked_at),
            }),
            None => Err(StateError::NotFound(record)),
        }
    }

    async fn release_photo_lock(&self, id: &str, outcome: &LockRelease) -> Result<(), StateError> {
        let conn = self.conn()?;
        match outcome {
            LockRelease::Downloaded { local_path } => conn.execute(
                "UPDATE photos SET write_locked_at = NULL, local_path = ?1, \
                 filesystem_in_sync = 1, last_error = NULL WHERE id = ?2",
                rusqlite::params![local_path.to_string_lossy(), id],
            ),
            LockRelease::Failed { error } => conn.execute(
                "UPDATE photos SET write_locked_at = NULL, filesystem_in_sync = 0, \
                 download_attempts = download_attempts + 1, last_error = ?1 WHERE id = ?2",
                rusqlite::params![error, id],
            ),
        }
        .map_err(StateError::query)?;
        Ok(())
    }

    async fn record_local_file(&self, id: &str, local_path: &Path) -> Result<(), StateError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE photos SET local_path = ?1, filesystem_in_sync = 1 \
             WHERE id = ?2 AND write_locked_at IS NULL",
            rusqlite::params![local_path.to_string_lossy(), id],
        )
        .map_err(StateError::query)?;
        Ok(())
    }

    async fn set_photo_flags(
        &self,
        id: &str,
        blacklisted: bool,
        deleted: bool,
    ) -> Result<bool, StateError> {
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "UPDATE photos SET blacklisted = ?1, deleted = ?2 WHERE id = ?3",
                rusqlite::params![blacklisted, deleted, id],
            )
            .map_err(StateError::query)?;
        Ok(rows == 1)
    }

    async fn set_collection_flags(
        &self,
        kind: CollectionKind,
        id: &str,
        blacklisted: bool,
        deleted: bool,
    ) -> Result<bool, StateError> {
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "UPDATE collections SET blacklisted = ?1, deleted = ?2 WHERE kind = ?3 AND id = ?4",
                rusqlite::params![blacklisted, deleted, kind.as_str(), id],
            )
            .map_err(StateError::query)?;
        Ok(rows == 1)
    }

    async fn list_locked(&self) -> Result<Vec<LockedRecord>, StateError> {
        let conn = self.conn()?;
        let mut locked = Vec::new();

        let mut stmt = conn
            .prepare("SELECT id, write_locked_at FROM photos WHERE write_locked_at IS NOT NULL")
            .map_err(StateError::query)?;
        let photos = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(StateError::query)?;
        for row in photos {
            let (id, at) = row.map_err(StateError::query)?;
            locked.push(LockedRecord {
                kind: LockedKind::Photo,
                id,
                locked_at: from_ts(Some(at)).unwrap_or(DateTime::UNIX_EPOCH),
            });
        }

        let mut stmt = conn
            .prepare(
                "SELECT kind, id, write_locked_at FROM collections \
                 WHERE write_locked_at IS NOT NULL",
            )
            .map_err(StateError::query)?;
        let collections = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(StateError::query)?;
        for row in collections {
            let (kind, id, at) = row.map_err(StateError::query)?;
            let Some(kind) = CollectionKind::from_str(&kind) else {
                tracing::warn!(kind = %kind, id = %id, "Skipping locked collection of unknown kind");
                continue;
            };
            locked.push(LockedRecord {
                kind: LockedKind::Collection(kind),
                id,
                locked_at: from_ts(Some(at)).unwrap_or(DateTime::UNIX_EPOCH),
            });
        }

        Ok(locked)
    }

    async fn unlock_all(&self) -> Result<u64, StateError> {
        let conn = self.conn()?;
        conn.execute("BEGIN TRANSACTION", [])
            .map_err(StateError::query)?;

        let result = (|| {
            let photos = conn.execute(
                "UPDATE photos SET write_locked_at = NULL WHERE write_locked_at IS NOT NULL",
                [],
            )?;
            let collections = conn.execute(
                "UPDATE collections SET write_locked_at = NULL WHERE write_locked_at IS NOT NULL",
                [],
            )?;
            Ok(photos + collections)
        })();

        match result {
            Ok(n) => {
                conn.execute("COMMIT", []).map_err(StateError::query)?;
                Ok(n as u64)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(StateError::query(e))
            }
        }
    }

    async fn get_failed_photos(&self) -> Result<Vec<PhotoRecord>, StateError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PHOTO_COLUMNS} FROM photos \
                 WHERE last_error IS NOT NULL AND filesystem_in_sync = 0 ORDER BY id"
            ))
            .map_err(StateError::query)?;
        let records = stmt
            .query_map([], row_to_photo)
            .map_err(StateError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::query)?;
        Ok(records)
    }

    async fn get_summary(&self) -> Result<IndexSummary, StateError> {
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<u64, StateError> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(StateError::query)
        };

        let users = count("SELECT COUNT(*) FROM users")?;
        let photos = count("SELECT COUNT(*) FROM photos")?;
        let photos_on_disk = count(
            "SELECT COUNT(*) FROM photos WHERE filesystem_in_sync = 1 AND local_path IS NOT NULL",
        )?;
        let photos_failed = count(
            "SELECT COUNT(*) FROM photos WHERE last_error IS NOT NULL AND filesystem_in_sync = 0",
        )?;
        let collections = count("SELECT COUNT(*) FROM collections")?;
        let collections_completed =
            count("SELECT COUNT(*) FROM collections WHERE date_sync_completed IS NOT NULL")?;
        let locked = count("SELECT COUNT(*) FROM photos WHERE write_locked_at IS NOT NULL")?
            + count("SELECT COUNT(*) FROM collections WHERE write_locked_at IS NOT NULL")?;

        let last_sync: Option<(Option<i64>, Option<i64>, SyncRunStats)> = conn
            .query_row(
                "SELECT started_at, completed_at, collections_seen, collections_synced, \
                 collections_failed, photos_queued, photos_downloaded, photos_failed, \
                 interrupted FROM sync_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    let counter = |i: usize| row.get::<_, Option<i64>>(i).map(|n| n.unwrap_or(0) as u64);
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        SyncRunStats {
                            collections_seen: counter(2)?,
                            collections_synced: counter(3)?,
                            collections_failed: counter(4)?,
                            photos_queued: counter(5)?,
                            photos_downloaded: counter(6)?,
                            photos_failed: counter(7)?,
                            interrupted: row.get::<_, Option<bool>>(8)?.unwrap_or(false),
                        },
                    ))
                },
            )
            .optional()
            .map_err(StateError::query)?;
        let (last_sync_started, last_sync_completed, last_run) = match last_sync {
            Some((started, completed, stats)) => {
                let completed = from_ts(completed);
                (from_ts(started), completed, completed.map(|_| stats))
            }
            None => (None, None, None),
        };

        Ok(IndexSummary {
            users,
            photos,
            photos_on_disk,
            photos_failed,
            collections,
            collections_completed,
            locked,
            last_sync_started,
            last_sync_completed,
            last_run,
        })
    }

    async fn start_sync_run(&self) -> Result<i64, StateError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_runs (started_at) VALUES (?1)",
            [Utc::now().timestamp()],
        )
        .map_err(StateError::query)?;
        Ok(conn.last_insert_rowid())
    }

    async fn complete_sync_run(&self, run_id: i64, stats: &SyncRunStats) -> Result<(), StateError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sync_runs SET completed_at = ?1, collections_seen = ?2, \
             collections_synced = ?3, collections_failed = ?4, photos_queued = ?5, \
             photos_downloaded = ?6, photos_failed = ?7, interrupted = ?8 WHERE id = ?9",
            rusqlite::params![
                Utc::now().timestamp(),
                stats.collections_seen as i64,
                stats.collections_synced as i64,
                stats.collections_failed as i64,
                stats.photos_queued as i64,
                stats.photos_downloaded as i64,
                stats.photos_failed as i64,
                stats.interrupted,
                run_id
            ],
        )
        .map_err(StateError::query)?;
        Ok(())
    }
}

fn ts(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(|d| d.timestamp())
}

fn from_ts(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|t| Utc.timestamp_opt(t, 0).single())
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        display_name: row.get(1)?,
        alias: row.get(2)?,
        created_at: from_ts(row.get(3)?).unwrap_or(DateTime::UNIX_EPOCH),
    })
}

fn row_to_photo(row: &rusqlite::Row<'_>) -> rusqlite::Result<PhotoRecord> {
    let size: String = row.get(2)?;
    let local_path: Option<String> = row.get(4)?;
    Ok(PhotoRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        // Unknown sizes read as the smallest so any real variant upgrades them.
        size: SizeVariant::from_suffix(&size).unwrap_or(SizeVariant::Square),
        url: row.get(3)?,
        local_path: local_path.map(PathBuf::from),
        title: row.get(5)?,
        description: row.get(6)?,
        date_taken: from_ts(row.get(7)?),
        date_uploaded: from_ts(row.get(8)?),
        date_last_updated: from_ts(row.get(9)?),
        date_last_retrieved: from_ts(row.get(10)?),
        views_local: row.get::<_, i64>(11)? as u64,
        views_remote: row.get::<_, i64>(12)? as u64,
        faves_remote: row.get::<_, i64>(13)? as u64,
        status: StatusFlags {
            blacklisted: row.get(14)?,
            deleted: row.get(15)?,
            write_locked_at: from_ts(row.get(16)?),
        },
        filesystem_in_sync: row.get(17)?,
        download_attempts: row.get::<_, i64>(18)? as u32,
        last_error: row.get(19)?,
    })
}

fn row_to_collection(row: &rusqlite::Row<'_>) -> rusqlite::Result<CollectionRecord> {
    let kind: String = row.get(0)?;
    let kind = CollectionKind::from_str(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown collection kind '{kind}'").into(),
        )
    })?;
    Ok(CollectionRecord {
        kind,
        id: row.get(1)?,
        owner_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        item_count: row.get::<_, Option<i64>>(5)?.map(|n| n as u64),
        date_created: from_ts(row.get(6)?),
        date_last_updated: from_ts(row.get(7)?),
        date_last_retrieved: from_ts(row.get(8)?),
        date_sync_completed: from_ts(row.get(9)?),
        status: StatusFlags {
            blacklisted: row.get(10)?,
            deleted: row.get(11)?,
            write_locked_at: from_ts(row.get(12)?),
        },
    })
}
