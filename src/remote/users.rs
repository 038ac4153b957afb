//! User and group resolution against the remote directory.

use std::sync::Arc;

use async_trait::async_trait;

use super::api::{params, ApiError, RemoteApi};
use super::record::{RemoteRecord, USER_FIELDS};

/// Vendor error code for "not found" on every lookup method.
const NOT_FOUND: i64 = 1;

const PROFILE_URL_BASE: &str = "https://www.flickr.com/photos";
const GROUP_URL_BASE: &str = "https://www.flickr.com/groups";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub canonical_id: String,
    pub display_name: String,
    pub alias: Option<String>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look up a user by their screen alias. `Ok(None)` when no such user.
    async fn lookup_by_alias(&self, alias: &str) -> Result<Option<UserIdentity>, ApiError>;

    /// Look up a user by canonical id. `Ok(None)` when no such user.
    async fn lookup_by_id(&self, canonical_id: &str) -> Result<Option<UserIdentity>, ApiError>;

    /// Group id behind a group's URL alias. `Ok(None)` when no such group.
    async fn lookup_group(&self, alias: &str) -> Result<Option<String>, ApiError>;
}

/// [`UserDirectory`] backed by the remote API.
pub struct ApiUserDirectory {
    api: Arc<dyn RemoteApi>,
}

impl ApiUserDirectory {
    pub fn new(api: Arc<dyn RemoteApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl UserDirectory for ApiUserDirectory {
    async fn lookup_by_alias(&self, alias: &str) -> Result<Option<UserIdentity>, ApiError> {
        let url = format!("{PROFILE_URL_BASE}/{alias}/");
        let body = match self.api.call("urls.lookupUser", &params([("url", url.as_str())])).await {
            Ok(body) => body,
            Err(e) if e.vendor_code() == Some(NOT_FOUND) => return Ok(None),
            Err(e) => return Err(e),
        };
        let Some(canonical_id) = body
            .get("user")
            .cloned()
            .and_then(|u| RemoteRecord::from_value(u, USER_FIELDS))
            .and_then(|u| u.text("user_id"))
        else {
            return Err(ApiError::Decode {
                method: "urls.lookupUser".into(),
                reason: "missing user.id".into(),
            });
        };

        tracing::debug!(alias, canonical_id = %canonical_id, "Resolved alias");

        // The lookup only returns the id; the full record carries the
        // display name and the alias the user actually holds.
        match self.lookup_by_id(&canonical_id).await? {
            Some(identity) => Ok(Some(identity)),
            None => Ok(Some(UserIdentity {
                display_name: canonical_id.clone(),
                canonical_id,
                alias: None,
            })),
        }
    }

    async fn lookup_by_id(&self, canonical_id: &str) -> Result<Option<UserIdentity>, ApiError> {
        let body = match self
            .api
            .call("people.getInfo", &params([("user_id", canonical_id)]))
            .await
        {
            Ok(body) => body,
            Err(e) if e.vendor_code() == Some(NOT_FOUND) => return Ok(None),
            Err(e) => return Err(e),
        };
        let person = body
            .get("person")
            .cloned()
            .and_then(|p| RemoteRecord::from_value(p, USER_FIELDS))
            .ok_or_else(|| ApiError::Decode {
                method: "people.getInfo".into(),
                reason: "missing person".into(),
            })?;
        Ok(Some(identity_from_person(&person, canonical_id)))
    }

    async fn lookup_group(&self, alias: &str) -> Result<Option<String>, ApiError> {
        let url = format!("{GROUP_URL_BASE}/{alias}/");
        let body = match self.api.call("urls.lookupGroup", &params([("url", url.as_str())])).await {
            Ok(body) => body,
            Err(e) if e.vendor_code() == Some(NOT_FOUND) => return Ok(None),
            Err(e) => return Err(e),
        };
        let group_id = body
            .pointer("/group/id")
            .and_then(|id| id.as_str())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::Decode {
                method: "urls.lookupGroup".into(),
                reason: "missing group.id".into(),
            })?;
        tracing::debug!(alias, group_id, "Resolved group alias");
        Ok(Some(group_id.to_string()))
    }
}

fn identity_from_person(person: &RemoteRecord, fallback_id: &str) -> UserIdentity {
    let canonical_id = person
        .text("id")
        .or_else(|| person.text("user_id"))
        .unwrap_or_else(|| fallback_id.to_string());
    let display_name = person
        .text("username")
        .or_else(|| person.text("real_name"))
        .unwrap_or_else(|| canonical_id.clone());
    UserIdentity {
        canonical_id,
        display_name,
        alias: person.text("alias"),
    }
}
