//! Error types for the local index.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during local index operations.
#[derive(Error, Debug)]
pub enum StateError {
    /// Failed to open or create the database file.
    #[error("Failed to open database at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// Failed to run a database migration.
    #[error("Database migration failed: {0}")]
    Migration(#[from] rusqlite::Error),

    /// A query failed.
    #[error("Database query failed: {0}")]
    Query(String),

    /// Failed to spawn a blocking task.
    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    /// The database schema version is newer than supported.
    #[error("Database schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },

    /// A write lock could not be taken because another holder has it.
    #[error("{record} is already write-locked (since {locked_at:?}); run `photomirror unlock` if no other process is running")]
    AlreadyLocked {
        record: String,
        locked_at: Option<chrono::DateTime<chrono::Utc>>,
    },

    /// The record to lock does not exist.
    #[error("{0} is not in the index")]
    NotFound(String),
}

impl StateError {
    /// Create a Query error from a rusqlite error.
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }
}
