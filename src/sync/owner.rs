//! Turning owner aliases into canonical ids, and making sure every owner
//! referenced by the index has a user row.

use std::sync::Arc;

use super::error::SyncError;
use crate::model::OwnerRef;
use crate::remote::{UserDirectory, UserIdentity};
use crate::state::{IndexDb, UserRecord};

pub struct OwnerResolver {
    db: Arc<dyn IndexDb>,
    users: Arc<dyn UserDirectory>,
}

impl OwnerResolver {
    pub fn new(db: Arc<dyn IndexDb>, users: Arc<dyn UserDirectory>) -> Self {
        Self { db, users }
    }

    /// Canonical id for `owner`, or `None` if nobody holds that alias.
    ///
    /// An alias is looked up as an alias, locally first and then remotely;
    /// it is never tried as a canonical id.
    pub async fn resolve(&self, owner: &OwnerRef) -> Result<Option<String>, SyncError> {
        let alias = match owner {
            OwnerRef::Canonical(id) => return Ok(Some(id.clone())),
            OwnerRef::Alias(alias) => alias,
        };

        if let Some(user) = self.db.find_user_by_alias(alias).await? {
            tracing::debug!(alias = %alias, canonical_id = %user.id, "Alias known locally");
            return Ok(Some(user.id));
        }

        match self.users.lookup_by_alias(alias).await? {
            Some(identity) => {
                let id = identity.canonical_id.clone();
                self.store(identity).await?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Group id for a pool's `group`, or `None` if no group has that alias.
    pub async fn resolve_group(&self, group: &OwnerRef) -> Result<Option<String>, SyncError> {
        match group {
            OwnerRef::Canonical(id) => Ok(Some(id.clone())),
            OwnerRef::Alias(alias) => Ok(self.users.lookup_group(alias).await?),
        }
    }

    /// Make sure a user row exists for `canonical_id`.
    ///
    /// `display_name` comes with some listings; when it is missing the
    /// remote directory is asked.
    pub async fn ensure_user(
        &self,
        canonical_id: &str,
        display_name: Option<String>,
    ) -> Result<(), SyncError> {
        if self.db.get_user(canonical_id).await?.is_some() {
            return Ok(());
        }

        let identity = match display_name {
            Some(display_name) => UserIdentity {
                canonical_id: canonical_id.to_string(),
                display_name,
                alias: None,
            },
            None => self
                .users
                .lookup_by_id(canonical_id)
                .await?
                .unwrap_or_else(|| UserIdentity {
                    canonical_id: canonical_id.to_string(),
                    display_name: canonical_id.to_string(),
                    alias: None,
                }),
        };
        self.store(identity).await
    }

    async fn store(&self, identity: UserIdentity) -> Result<(), SyncError> {
        tracing::debug!(
            canonical_id = %identity.canonical_id,
            alias = ?identity.alias,
            "Recording user"
        );
        self.db
            .upsert_user(&UserRecord::new(
                identity.canonical_id,
                identity.display_name,
                identity.alias,
            ))
            .await?;
        Ok(())
    }
}
