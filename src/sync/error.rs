//! Error types for collection syncs.

use thiserror::Error;

use crate::model::{CollectionKind, CollectionRef};
use crate::remote::{ApiError, SourceError};
use crate::state::StateError;

/// Errors that end a collection sync.
///
/// Per-item failures never show up here: they are counted in the outcome and
/// only withhold the completion mark.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Neither the local index nor the remote directory knows the owner.
    #[error("Cannot resolve owner '{owner}' of {collection}")]
    OwnerResolution { owner: String, collection: String },

    /// No group holds the alias a pool URL named.
    #[error("Cannot resolve group '{group}'")]
    GroupResolution { group: String },

    /// A listed photo carries no owner and its collection cannot vouch for one.
    #[error("Photo {0} has no owner")]
    MissingOwner(String),

    /// Only albums and galleries can be enumerated per owner.
    #[error("{0} collections cannot be listed by owner")]
    NotListable(CollectionKind),

    /// A shutdown signal arrived mid-sync.
    #[error("Interrupted")]
    Interrupted,

    /// The collection metadata endpoint returned nothing usable.
    #[error("No metadata returned for {0}")]
    MissingMetadata(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl SyncError {
    pub fn owner_resolution(owner: &str, collection: &CollectionRef) -> Self {
        Self::OwnerResolution {
            owner: owner.to_string(),
            collection: collection.to_string(),
        }
    }
}
