//! Database schema definitions and migrations.

use rusqlite::Connection;

use super::error::StateError;

/// Current schema version. Increment when making schema changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Schema DDL for version 1.
///
/// Timestamps are unix seconds. `write_locked_at` non-null means locked;
/// nothing ever expires a lock on its own.
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    display_name TEXT NOT NULL,
    alias TEXT UNIQUE,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS photos (
    id TEXT PRIMARY KEY NOT NULL,
    owner_id TEXT NOT NULL REFERENCES users(id),
    size TEXT NOT NULL,
    url TEXT NOT NULL,
    local_path TEXT,
    title TEXT,
    description TEXT,
    date_taken INTEGER,
    date_uploaded INTEGER,
    date_last_updated INTEGER,
    date_last_retrieved INTEGER,
    views_local INTEGER NOT NULL DEFAULT 0,
    views_remote INTEGER NOT NULL DEFAULT 0,
    faves_remote INTEGER NOT NULL DEFAULT 0,
    blacklisted INTEGER NOT NULL DEFAULT 0,
    deleted INTEGER NOT NULL DEFAULT 0,
    write_locked_at INTEGER,
    filesystem_in_sync INTEGER NOT NULL DEFAULT 0,
    download_attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_photos_owner ON photos(owner_id);
CREATE INDEX IF NOT EXISTS idx_photos_locked ON photos(write_locked_at);

CREATE TABLE IF NOT EXISTS collections (
    kind TEXT NOT NULL,
    id TEXT NOT NULL,
    owner_id TEXT REFERENCES users(id),
    title TEXT,
    description TEXT,
    item_count INTEGER,
    date_created INTEGER,
    date_last_updated INTEGER,
    date_last_retrieved INTEGER,
    date_sync_completed INTEGER,
    blacklisted INTEGER NOT NULL DEFAULT 0,
    deleted INTEGER NOT NULL DEFAULT 0,
    write_locked_at INTEGER,
    PRIMARY KEY (kind, id)
);

CREATE INDEX IF NOT EXISTS idx_collections_locked ON collections(write_locked_at);

CREATE TABLE IF NOT EXISTS collection_photos (
    kind TEXT NOT NULL,
    collection_id TEXT NOT NULL,
    photo_id TEXT NOT NULL REFERENCES photos(id),
    PRIMARY KEY (kind, collection_id, photo_id),
    FOREIGN KEY (kind, collection_id) REFERENCES collections(kind, id)
);

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    collections_seen INTEGER DEFAULT 0,
    collections_synced INTEGER DEFAULT 0,
    collections_failed INTEGER DEFAULT 0,
    photos_queued INTEGER DEFAULT 0,
    photos_downloaded INTEGER DEFAULT 0,
    photos_failed INTEGER DEFAULT 0,
    interrupted INTEGER DEFAULT 0
);
"#;

/// Get the current schema version from the database.
pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, StateError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version in the database.
fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StateError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Initialize or migrate the database schema.
///
/// This function is idempotent and safe to call on both new and existing databases.
pub(crate) fn migrate(conn: &Connection) -> Result<(), StateError> {
    let current_version = get_schema_version(conn)?;

    if current_version > SCHEMA_VERSION {
        return Err(StateError::UnsupportedSchemaVersion {
            found: current_version,
            expected: SCHEMA_VERSION,
        });
    }

    if current_version == 0 {
        conn.execute_batch(SCHEMA_V1)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        tracing::debug!("Initialized index schema at version {}", SCHEMA_VERSION);
    }

    Ok(())
}
