//! Paged listings over the remote API.
//!
//! Two pagination protocols exist upstream. Item listings inside a collection
//! use `page`/`per_page` and declare a total page count. Lists of collections
//! (an owner's galleries) use an echoed continuation token that starts at
//! `"0"` and ends at `"-1"`; those endpoints reject `page`.

use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;
use thiserror::Error;

use super::api::{ApiError, RemoteApi};
use super::record::{FieldSpec, RemoteRecord};

const FIRST_TOKEN: &str = "0";
const END_TOKEN: &str = "-1";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{method}: {reason}")]
    InvalidParameterCombination { method: String, reason: String },

    #[error("{method} response has no '{field}'")]
    UnexpectedResponseShape { method: String, field: String },

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    Paged,
    Continuation,
}

impl Pagination {
    /// Parameters the source sets itself for this protocol.
    fn owned_params(&self) -> &'static [&'static str] {
        match self {
            Self::Paged => &["page", "per_page"],
            Self::Continuation => &["continuation", "per_page"],
        }
    }

    /// Parameters that belong to the other protocol.
    fn foreign_params(&self) -> &'static [&'static str] {
        match self {
            Self::Paged => &["continuation"],
            Self::Continuation => &["page"],
        }
    }
}

/// Describes one listing endpoint: which method, where the items sit in the
/// response, and which pagination protocol it speaks.
#[derive(Debug, Clone)]
pub struct Listing {
    pub method: &'static str,
    pub params: Vec<(String, String)>,
    /// Top-level response key holding the page (`photos`, `photoset`, ...).
    pub container: &'static str,
    /// Key inside the container holding the item array.
    pub item_key: &'static str,
    pub pagination: Pagination,
    pub fields: &'static [FieldSpec],
}

#[derive(Debug)]
pub struct Page {
    pub items: Vec<RemoteRecord>,
    pub total_pages: u32,
}

#[derive(Debug)]
pub struct TokenPage {
    pub items: Vec<RemoteRecord>,
    /// `None` once the end sentinel came back.
    pub next: Option<String>,
}

pub struct CollectionSource {
    api: Arc<dyn RemoteApi>,
    per_page: u32,
}

impl CollectionSource {
    pub fn new(api: Arc<dyn RemoteApi>, per_page: u32) -> Self {
        Self {
            api,
            per_page: per_page.max(1),
        }
    }

    pub fn api(&self) -> &Arc<dyn RemoteApi> {
        &self.api
    }

    /// Fetch one page (1-based) of a page-numbered listing.
    pub async fn list_page(&self, listing: &Listing, page: u32) -> Result<Page, SourceError> {
        check_params(listing, Pagination::Paged)?;

        let mut params = listing.params.clone();
        params.push(("page".into(), page.to_string()));
        params.push(("per_page".into(), self.per_page.to_string()));

        let body = self.api.call(listing.method, &params).await?;
        let container = container_of(listing, &body)?;
        let total_pages = container
            .get("pages")
            .and_then(as_u32)
            .ok_or_else(|| shape_error(listing, "pages"))?;

        tracing::debug!(
            method = listing.method,
            page,
            total_pages,
            "Fetched listing page"
        );

        Ok(Page {
            items: items_of(listing, container),
            total_pages,
        })
    }

    /// Fetch one page of a continuation-token listing.
    pub async fn list_token_page(
        &self,
        listing: &Listing,
        token: &str,
    ) -> Result<TokenPage, SourceError> {
        check_params(listing, Pagination::Continuation)?;

        let mut params = listing.params.clone();
        params.push(("continuation".into(), token.to_string()));
        params.push(("per_page".into(), self.per_page.to_string()));

        let body = self.api.call(listing.method, &params).await?;
        let container = container_of(listing, &body)?;
        let next = container
            .get("continuation")
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| shape_error(listing, "continuation"))?;

        Ok(TokenPage {
            items: items_of(listing, container),
            next: (next != END_TOKEN).then_some(next),
        })
    }

    /// Lazily walk every item of a listing, fetching pages on demand.
    ///
    /// Each call starts again at the first page. The stream ends after the
    /// first error; items already yielded stay yielded.
    pub fn iterate<'a>(
        &'a self,
        listing: &'a Listing,
    ) -> BoxStream<'a, Result<RemoteRecord, SourceError>> {
        let pages = match listing.pagination {
            Pagination::Paged => stream::try_unfold(Some(1u32), move |state| async move {
                let Some(page) = state else {
                    return Ok(None);
                };
                let fetched = self.list_page(listing, page).await?;
                let next = (page < fetched.total_pages).then_some(page + 1);
                Ok::<_, SourceError>(Some((fetched.items, next)))
            })
            .boxed(),
            Pagination::Continuation => stream::try_unfold(
                Some(FIRST_TOKEN.to_string()),
                move |state| async move {
                    let Some(token) = state else {
                        return Ok(None);
                    };
                    let fetched = self.list_token_page(listing, &token).await?;
                    Ok::<_, SourceError>(Some((fetched.items, fetched.next)))
                },
            )
            .boxed(),
        };

        pages
            .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }
}

fn check_params(listing: &Listing, used_as: Pagination) -> Result<(), SourceError> {
    let invalid = |reason: String| SourceError::InvalidParameterCombination {
        method: listing.method.to_string(),
        reason,
    };
    if listing.pagination != used_as {
        return Err(invalid(format!(
            "listing declares {:?} pagination but was fetched as {:?}",
            listing.pagination, used_as
        )));
    }
    for (key, _) in &listing.params {
        if used_as.owned_params().contains(&key.as_str()) {
            return Err(invalid(format!("'{key}' is set by the pager")));
        }
        if used_as.foreign_params().contains(&key.as_str()) {
            return Err(invalid(format!(
                "'{key}' cannot be combined with {used_as:?} pagination"
            )));
        }
    }
    Ok(())
}

fn container_of<'b>(listing: &Listing, body: &'b Value) -> Result<&'b Value, SourceError> {
    body.get(listing.container)
        .filter(|c| c.is_object())
        .ok_or_else(|| shape_error(listing, listing.container))
}

fn items_of(listing: &Listing, container: &Value) -> Vec<RemoteRecord> {
    container
        .get(listing.item_key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| RemoteRecord::from_value(item.clone(), listing.fields))
                .collect()
        })
        .unwrap_or_default()
}

fn shape_error(listing: &Listing, field: &str) -> SourceError {
    SourceError::UnexpectedResponseShape {
        method: listing.method.to_string(),
        field: field.to_string(),
    }
}

fn as_u32(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::record::{PHOTO_FIELDS, SUMMARY_FIELDS};
    use crate::testutil::ScriptedApi;
    use serde_json::json;

    fn photo_listing() -> Listing {
        Listing {
            method: "photosets.getPhotos",
            params: vec![("photoset_id".into(), "7215".into())],
            container: "photoset",
            item_key: "photo",
            pagination: Pagination::Paged,
            fields: PHOTO_FIELDS,
        }
    }

    fn gallery_list() -> Listing {
        Listing {
            method: "galleries.getList",
            params: vec![("user_id".into(), "1@N01".into())],
            container: "galleries",
            item_key: "gallery",
            pagination: Pagination::Continuation,
            fields: SUMMARY_FIELDS,
        }
    }

    fn page(n: u32, pages: u32, ids: &[&str]) -> Value {
        let photos: Vec<Value> = ids.iter().map(|id| json!({"id": id})).collect();
        json!({"stat": "ok", "photoset": {"page": n, "pages": pages, "photo": photos}})
    }

    async fn collect_ids(
        source: &CollectionSource,
        listing: &Listing,
    ) -> (Vec<String>, Option<SourceError>) {
        let mut stream = source.iterate(listing);
        let mut ids = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(r) => ids.push(r.id().unwrap()),
                Err(e) => return (ids, Some(e)),
            }
        }
        (ids, None)
    }

    #[tokio::test]
    async fn test_paged_iteration_walks_all_pages_in_order() {
        let api = Arc::new(
            ScriptedApi::new()
                .reply_when("photosets.getPhotos", ("page", "1"), page(1, 2, &["a", "b"]))
                .reply_when("photosets.getPhotos", ("page", "2"), page(2, 2, &["c"])),
        );
        let source = CollectionSource::new(api.clone(), 2);
        let (ids, err) = collect_ids(&source, &photo_listing()).await;
        assert!(err.is_none());
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(api.call_count("photosets.getPhotos"), 2);
        assert_eq!(api.param_of("photosets.getPhotos", "per_page").as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_iteration_restarts_from_first_page() {
        let api = Arc::new(
            ScriptedApi::new().reply_when("photosets.getPhotos", ("page", "1"), page(1, 1, &["a"])),
        );
        let source = CollectionSource::new(api.clone(), 10);
        let listing = photo_listing();
        collect_ids(&source, &listing).await;
        collect_ids(&source, &listing).await;
        assert_eq!(api.call_count("photosets.getPhotos"), 2);
    }

    #[tokio::test]
    async fn test_empty_collection_yields_nothing() {
        let api = Arc::new(ScriptedApi::new().reply(
            "photosets.getPhotos",
            json!({"stat": "ok", "photoset": {"page": 1, "pages": 0, "photo": []}}),
        ));
        let source = CollectionSource::new(api, 10);
        let (ids, err) = collect_ids(&source, &photo_listing()).await;
        assert!(ids.is_empty());
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn test_missing_page_count_aborts_but_keeps_yielded_items() {
        let api = Arc::new(
            ScriptedApi::new()
                .reply_when("photosets.getPhotos", ("page", "1"), page(1, 3, &["a"]))
                .reply_when(
                    "photosets.getPhotos",
                    ("page", "2"),
                    json!({"stat": "ok", "photoset": {"photo": [{"id": "b"}]}}),
                ),
        );
        let source = CollectionSource::new(api.clone(), 1);
        let (ids, err) = collect_ids(&source, &photo_listing()).await;
        assert_eq!(ids, vec!["a"]);
        assert!(matches!(
            err,
            Some(SourceError::UnexpectedResponseShape { ref field, .. }) if field == "pages"
        ));
        // page 3 never requested
        assert_eq!(api.call_count("photosets.getPhotos"), 2);
    }

    #[tokio::test]
    async fn test_continuation_follows_tokens_until_sentinel() {
        let api = Arc::new(
            ScriptedApi::new()
                .reply_when(
                    "galleries.getList",
                    ("continuation", "0"),
                    json!({"stat": "ok", "galleries": {"continuation": "abc", "gallery": [{"id": "g1"}]}}),
                )
                .reply_when(
                    "galleries.getList",
                    ("continuation", "abc"),
                    json!({"stat": "ok", "galleries": {"continuation": -1, "gallery": [{"id": "g2"}]}}),
                ),
        );
        let source = CollectionSource::new(api.clone(), 50);
        let (ids, err) = collect_ids(&source, &gallery_list()).await;
        assert!(err.is_none());
        assert_eq!(ids, vec!["g1", "g2"]);
        assert_eq!(api.param_of("galleries.getList", "page"), None);
    }

    #[tokio::test]
    async fn test_mixing_pagination_styles_fails_before_any_call() {
        let api = Arc::new(ScriptedApi::new());
        let source = CollectionSource::new(api.clone(), 10);

        let mut listing = gallery_list();
        listing.params.push(("page".into(), "2".into()));
        let err = source.list_token_page(&listing, "0").await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidParameterCombination { .. }));

        let err = source.list_page(&gallery_list(), 1).await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidParameterCombination { .. }));

        let mut listing = photo_listing();
        listing.params.push(("continuation".into(), "0".into()));
        let err = source.list_page(&listing, 1).await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidParameterCombination { .. }));

        assert_eq!(api.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_container_is_unexpected_shape() {
        let api = Arc::new(ScriptedApi::new().reply("photosets.getPhotos", json!({"stat": "ok"})));
        let source = CollectionSource::new(api, 10);
        let err = source.list_page(&photo_listing(), 1).await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::UnexpectedResponseShape { ref field, .. } if field == "photoset"
        ));
    }

    #[tokio::test]
    async fn test_api_errors_pass_through() {
        let api = Arc::new(ScriptedApi::new().fail("photosets.getPhotos", 1, "Photoset not found"));
        let source = CollectionSource::new(api, 10);
        let err = source.list_page(&photo_listing(), 1).await.unwrap_err();
        assert!(matches!(err, SourceError::Api(ApiError::Vendor { code: 1, .. })));
    }
}
