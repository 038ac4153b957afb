//! Per-kind endpoints: where a collection's metadata comes from and how its
//! items are listed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::error::SyncError;
use crate::model::{CollectionKind, SizeVariant};
use crate::remote::api::params;
use crate::remote::record::{COLLECTION_FIELDS, PHOTO_FIELDS, SUMMARY_FIELDS, USER_FIELDS};
use crate::remote::{Listing, Pagination, RemoteApi, RemoteRecord};

/// Extras requested on every item listing besides the size URLs.
const ITEM_EXTRAS: &str = "description,date_upload,date_taken,last_update,owner_name,views,count_faves";

/// Collection metadata as reported by the remote side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Owner as reported remotely. Absent for pools.
    pub owner_id: Option<String>,
    pub item_count: Option<u64>,
    pub date_created: Option<DateTime<Utc>>,
    pub date_updated: Option<DateTime<Utc>>,
}

/// The canonical address of a collection once its owner is resolved.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub id: &'a str,
    pub owner_id: Option<&'a str>,
}

/// One strategy per collection kind, sharing the sync algorithm in
/// [`super::engine`].
#[async_trait]
pub trait CollectionStrategy: Send + Sync {
    fn kind(&self) -> CollectionKind;

    /// Method, parameters and response container of the metadata call.
    fn metadata_call(&self, target: Target<'_>) -> (&'static str, Vec<(String, String)>, &'static str);

    /// The paged item listing for this collection.
    fn listing(&self, target: Target<'_>) -> Listing;

    /// Read metadata out of the container object.
    fn parse_metadata(&self, container: Value) -> Option<CollectionMetadata> {
        let record = RemoteRecord::from_value(container, COLLECTION_FIELDS)?;
        Some(CollectionMetadata {
            title: record.title(),
            description: record.description(),
            owner_id: record.owner(),
            item_count: record.item_count(),
            date_created: record.date_created(),
            date_updated: record.date_updated(),
        })
    }

    async fn fetch_metadata(
        &self,
        api: &dyn RemoteApi,
        target: Target<'_>,
    ) -> Result<CollectionMetadata, SyncError> {
        let (method, params, container) = self.metadata_call(target);
        let mut body = api.call(method, &params).await?;
        body.get_mut(container)
            .map(Value::take)
            .and_then(|c| self.parse_metadata(c))
            .ok_or_else(|| SyncError::MissingMetadata(format!("{} {}", self.kind(), target.id)))
    }
}

/// Look up the strategy for a kind.
pub fn strategy_for(kind: CollectionKind) -> &'static dyn CollectionStrategy {
    match kind {
        CollectionKind::Photostream => &PhotostreamStrategy,
        CollectionKind::Album => &AlbumStrategy,
        CollectionKind::Gallery => &GalleryStrategy,
        CollectionKind::Favorites => &FavoritesStrategy,
        CollectionKind::Pool => &PoolStrategy,
    }
}

fn item_listing(method: &'static str, container: &'static str, mut params: Vec<(String, String)>) -> Listing {
    params.push((
        "extras".into(),
        format!("{ITEM_EXTRAS},{}", SizeVariant::extras()),
    ));
    Listing {
        method,
        params,
        container,
        item_key: "photo",
        pagination: Pagination::Paged,
        fields: PHOTO_FIELDS,
    }
}

/// Photostreams and favorites have no metadata of their own; the owner's
/// person record stands in.
fn person_metadata(container: Value) -> Option<CollectionMetadata> {
    let person = RemoteRecord::from_value(container, USER_FIELDS)?;
    Some(CollectionMetadata {
        title: person.text("username").or_else(|| person.text("real_name")),
        description: None,
        owner_id: person.text("id"),
        item_count: person
            .int("photo_count")
            .and_then(|n| u64::try_from(n).ok()),
        date_created: person.date("first_upload"),
        date_updated: None,
    })
}

pub struct PhotostreamStrategy;

impl CollectionStrategy for PhotostreamStrategy {
    fn kind(&self) -> CollectionKind {
        CollectionKind::Photostream
    }

    fn metadata_call(&self, target: Target<'_>) -> (&'static str, Vec<(String, String)>, &'static str) {
        ("people.getInfo", params([("user_id", target.id)]), "person")
    }

    fn listing(&self, target: Target<'_>) -> Listing {
        item_listing("people.getPhotos", "photos", params([("user_id", target.id)]))
    }

    fn parse_metadata(&self, container: Value) -> Option<CollectionMetadata> {
        person_metadata(container)
    }
}

pub struct FavoritesStrategy;

impl CollectionStrategy for FavoritesStrategy {
    fn kind(&self) -> CollectionKind {
        CollectionKind::Favorites
    }

    fn metadata_call(&self, target: Target<'_>) -> (&'static str, Vec<(String, String)>, &'static str) {
        ("people.getInfo", params([("user_id", target.id)]), "person")
    }

    fn listing(&self, target: Target<'_>) -> Listing {
        item_listing("favorites.getList", "photos", params([("user_id", target.id)]))
    }

    fn parse_metadata(&self, container: Value) -> Option<CollectionMetadata> {
        // The person's upload count says nothing about their favorites.
        person_metadata(container).map(|m| CollectionMetadata {
            item_count: None,
            date_created: None,
            ..m
        })
    }
}

pub struct AlbumStrategy;

impl CollectionStrategy for AlbumStrategy {
    fn kind(&self) -> CollectionKind {
        CollectionKind::Album
    }

    fn metadata_call(&self, target: Target<'_>) -> (&'static str, Vec<(String, String)>, &'static str) {
        let mut p = params([("photoset_id", target.id)]);
        if let Some(owner) = target.owner_id {
            p.push(("user_id".into(), owner.into()));
        }
        ("photosets.getInfo", p, "photoset")
    }

    fn listing(&self, target: Target<'_>) -> Listing {
        let mut p = params([("photoset_id", target.id)]);
        if let Some(owner) = target.owner_id {
            p.push(("user_id".into(), owner.into()));
        }
        item_listing("photosets.getPhotos", "photoset", p)
    }
}

pub struct GalleryStrategy;

impl CollectionStrategy for GalleryStrategy {
    fn kind(&self) -> CollectionKind {
        CollectionKind::Gallery
    }

    fn metadata_call(&self, target: Target<'_>) -> (&'static str, Vec<(String, String)>, &'static str) {
        ("galleries.getInfo", params([("gallery_id", target.id)]), "gallery")
    }

    fn listing(&self, target: Target<'_>) -> Listing {
        item_listing("galleries.getPhotos", "photos", params([("gallery_id", target.id)]))
    }
}

pub struct PoolStrategy;

impl CollectionStrategy for PoolStrategy {
    fn kind(&self) -> CollectionKind {
        CollectionKind::Pool
    }

    fn metadata_call(&self, target: Target<'_>) -> (&'static str, Vec<(String, String)>, &'static str) {
        ("groups.getInfo", params([("group_id", target.id)]), "group")
    }

    fn listing(&self, target: Target<'_>) -> Listing {
        item_listing("groups.pools.getPhotos", "photos", params([("group_id", target.id)]))
    }

    fn parse_metadata(&self, container: Value) -> Option<CollectionMetadata> {
        let record = RemoteRecord::from_value(container, COLLECTION_FIELDS)?;
        Some(CollectionMetadata {
            title: record.title(),
            description: record.description(),
            owner_id: None,
            item_count: record.item_count(),
            date_created: None,
            date_updated: None,
        })
    }
}

/// Listing of every collection of `kind` an owner has.
///
/// Album lists are page-numbered; gallery lists use continuation tokens.
/// Other kinds have exactly one collection per owner and no such list.
pub fn owner_collections_listing(kind: CollectionKind, owner_id: &str) -> Option<Listing> {
    match kind {
        CollectionKind::Album => Some(Listing {
            method: "photosets.getList",
            params: params([("user_id", owner_id)]),
            container: "photosets",
            item_key: "photoset",
            pagination: Pagination::Paged,
            fields: SUMMARY_FIELDS,
        }),
        CollectionKind::Gallery => Some(Listing {
            method: "galleries.getList",
            params: params([("user_id", owner_id)]),
            container: "galleries",
            item_key: "gallery",
            pagination: Pagination::Continuation,
            fields: SUMMARY_FIELDS,
        }),
        CollectionKind::Photostream | CollectionKind::Favorites | CollectionKind::Pool => None,
    }
}
