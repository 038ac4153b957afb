//! Collection sync: decide per collection whether to list items, reconcile
//! each listed item against the local index, and hand photos that need
//! fetching to a [`PhotoSink`].

pub mod decision;
pub mod engine;
pub mod error;
pub mod owner;
pub mod sink;
pub mod strategy;

pub use engine::{ItemTally, SkipReason, SyncEngine, SyncOutcome};
pub use error::SyncError;
pub use sink::{IndexOnlySink, PhotoSink};

/// Flags for one sync run, passed explicitly into every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Skip item listing for collections that completed before.
    pub ignore_completed: bool,
    /// Re-list collections and compare CDN file names regardless of
    /// remote timestamps.
    pub distrust_timestamps: bool,
    /// When off, every listed photo is fetched again.
    pub trust_photo_records: bool,
    /// Draw a fresh CDN identity per file instead of pinning one.
    pub switch_identities: bool,
    /// Update the index only; never fetch files.
    pub index_only: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            ignore_completed: false,
            distrust_timestamps: false,
            trust_photo_records: true,
            switch_identities: false,
            index_only: false,
        }
    }
}
