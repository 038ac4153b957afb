//! Local index of users, photos and collections.
//!
//! The index is the only state shared between concurrent sync processes.
//! Every photo and collection row carries a `write_locked_at` flag; taking it
//! is a single conditional update, and nothing but the `unlock` command ever
//! clears a lock left behind by a crashed process.

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{IndexDb, SqliteIndexDb};
pub use error::StateError;
pub use types::{
    CollectionRecord, IndexSummary, LockRelease, LockedKind, LockedRecord, PhotoRecord,
    RecordState, StatusFlags, SyncRunStats, UserRecord,
};
