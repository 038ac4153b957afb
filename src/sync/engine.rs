//! The collection sync state machine.
//!
//! `sync_collection` walks one collection through: load and classify the
//! local record, resolve the owner, refresh metadata, decide whether to list
//! items, then reconcile every listed item under the collection's write lock.
//! Item-level failures are isolated; any of them, or an aborted listing,
//! leaves the collection without a completion mark.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use super::decision::{self, CollectionDecision, DownloadDecision};
use super::error::SyncError;
use super::owner::OwnerResolver;
use super::sink::{IndexOnlySink, PhotoSink};
use super::strategy::{owner_collections_listing, strategy_for, Target};
use super::SyncOptions;
use crate::model::size::same_cdn_file;
use crate::model::{CollectionKind, CollectionRef, OwnerRef, SizeVariant};
use crate::remote::{CollectionSource, Listing, RemoteApi, RemoteRecord, UserDirectory};
use crate::state::{CollectionRecord, IndexDb, PhotoRecord, RecordState, StateError};

/// Why a collection sync did nothing. All of these count as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Blacklisted,
    Deleted,
    /// Completed earlier and `ignore_completed` was set.
    Completed,
    /// Remote timestamp unchanged since the last completed sync.
    Unchanged,
}

/// Per-item counters for one collection sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemTally {
    pub listed: u64,
    pub new: u64,
    /// Photos handed to the sink.
    pub submitted: u64,
    /// Locked photos, sink failures and items that could not be reconciled.
    pub failed: u64,
    /// Blacklisted, deleted, or unusable items.
    pub skipped: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    /// Every item reconciled; the collection is marked complete.
    Completed(ItemTally),
    /// The listing finished but some items failed.
    Incomplete(ItemTally),
    /// The listing stopped early.
    Aborted { tally: ItemTally, reason: String },
    /// The collection is write-locked by another run or a crashed one.
    Locked,
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Skipped(_) | Self::Completed(_))
    }

    pub fn tally(&self) -> Option<&ItemTally> {
        match self {
            Self::Completed(t) | Self::Incomplete(t) | Self::Aborted { tally: t, .. } => Some(t),
            Self::Skipped(_) | Self::Locked => None,
        }
    }
}

enum ItemResult {
    Unusable,
    Ignored,
    Locked,
    Indexed { new: bool },
    /// `failed` counts every photo the sink finished unsuccessfully during
    /// this submission, which in batched mode may include earlier items.
    Submitted { new: bool, failed: u64 },
}

impl ItemTally {
    fn record(&mut self, result: ItemResult) {
        match result {
            ItemResult::Unusable | ItemResult::Ignored => self.skipped += 1,
            ItemResult::Locked => self.failed += 1,
            ItemResult::Indexed { new } => self.new += u64::from(new),
            ItemResult::Submitted { new, failed } => {
                self.new += u64::from(new);
                self.submitted += 1;
                self.failed += failed;
            }
        }
    }
}

pub struct SyncEngine {
    db: Arc<dyn IndexDb>,
    source: CollectionSource,
    owners: OwnerResolver,
    shutdown: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        db: Arc<dyn IndexDb>,
        api: Arc<dyn RemoteApi>,
        users: Arc<dyn UserDirectory>,
        per_page: u32,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            owners: OwnerResolver::new(db.clone(), users),
            source: CollectionSource::new(api, per_page),
            db,
            shutdown,
        }
    }

    /// Sync one collection, handing photos that need fetching to `sink`.
    ///
    /// Resolution, metadata and index errors come back as `Err`; everything
    /// past the point where the item listing starts is reported through the
    /// outcome.
    pub async fn sync_collection(
        &self,
        target: &CollectionRef,
        sink: &dyn PhotoSink,
        options: &SyncOptions,
    ) -> Result<SyncOutcome, SyncError> {
        let kind = target.kind();
        let strategy = strategy_for(kind);
        let mut target = target.clone();
        tracing::info!(collection = %target, "Syncing");

        let mut local = self.load(&target).await?;
        if let Some(outcome) = classify(local.as_ref(), &target) {
            return Ok(outcome);
        }

        if let Some(OwnerRef::Alias(alias)) = target.owner().cloned() {
            let known_owner = local.as_ref().and_then(|r| r.owner_id.clone());
            let canonical = match known_owner {
                Some(id) => id,
                None => self
                    .owners
                    .resolve(&OwnerRef::Alias(alias.clone()))
                    .await?
                    .ok_or_else(|| SyncError::owner_resolution(&alias, &target))?,
            };
            tracing::debug!(alias = %alias, canonical_id = %canonical, "Resolved owner");
            target.set_canonical_owner(canonical);

            // Owner-keyed collections only get an id now.
            if local.is_none() {
                local = self.load(&target).await?;
                if let Some(outcome) = classify(local.as_ref(), &target) {
                    return Ok(outcome);
                }
            }
        }

        if let Some(OwnerRef::Alias(alias)) = target.group().cloned() {
            let group_id = self
                .owners
                .resolve_group(&OwnerRef::Alias(alias.clone()))
                .await?
                .ok_or_else(|| SyncError::GroupResolution {
                    group: alias.clone(),
                })?;
            tracing::debug!(alias = %alias, group_id = %group_id, "Resolved group");
            target.set_canonical_group(group_id);

            local = self.load(&target).await?;
            if let Some(outcome) = classify(local.as_ref(), &target) {
                return Ok(outcome);
            }
        }

        let owner_id = target
            .owner()
            .and_then(OwnerRef::canonical_id)
            .map(str::to_string);
        if let Some(owner_id) = &owner_id {
            self.owners.ensure_user(owner_id, None).await?;
        }
        let collection_id = match target.collection_id() {
            Some(id) => id.to_string(),
            None => {
                let owner = target.owner().map(OwnerRef::as_str).unwrap_or_default();
                return Err(SyncError::owner_resolution(owner, &target));
            }
        };
        let address = Target {
            id: &collection_id,
            owner_id: owner_id.as_deref(),
        };

        // Metadata is refreshed whether or not the items are.
        let metadata = strategy
            .fetch_metadata(self.source.api().as_ref(), address)
            .await?;
        if owner_id.is_none() {
            if let Some(metadata_owner) = &metadata.owner_id {
                self.owners.ensure_user(metadata_owner, None).await?;
            }
        }
        let previous_updated = local.as_ref().and_then(|r| r.date_last_updated);
        let previous_completed = local.as_ref().and_then(|r| r.date_sync_completed);

        let mut record = local
            .unwrap_or_else(|| CollectionRecord::new(kind, collection_id.clone(), None));
        record.owner_id = owner_id.clone().or(metadata.owner_id.clone());
        record.title = metadata.title.clone();
        record.description = metadata.description.clone();
        record.item_count = metadata.item_count;
        record.date_created = record.date_created.or(metadata.date_created);
        record.date_last_updated = metadata.date_updated;
        record.date_last_retrieved = Some(Utc::now());
        self.db.save_collection_metadata(&record).await?;

        let decision = decision::collection_decision(
            options,
            previous_completed,
            previous_updated,
            metadata.date_updated,
        );
        if !decision.should_sync() {
            tracing::info!(collection = %target, ?decision, "Items up to date, skipping");
            return Ok(SyncOutcome::Skipped(match decision {
                CollectionDecision::SkipCompleted => SkipReason::Completed,
                _ => SkipReason::Unchanged,
            }));
        }
        tracing::debug!(collection = %target, ?decision, "Listing items");

        match self.db.try_lock_collection(kind, &collection_id).await {
            Ok(_) => {}
            Err(StateError::AlreadyLocked { record, locked_at }) => {
                tracing::warn!(
                    collection = %target,
                    ?locked_at,
                    "{record} was locked by another run; not syncing"
                );
                return Ok(SyncOutcome::Locked);
            }
            Err(e) => return Err(e.into()),
        }

        let sink: &dyn PhotoSink = if options.index_only {
            &IndexOnlySink
        } else {
            sink
        };
        let listing = strategy.listing(address);
        let mut tally = ItemTally::default();
        let listed = self
            .sync_items(&record, &listing, sink, options, &mut tally)
            .await;
        // Queued photos still belong to this collection, even after an abort.
        tally.failed += sink.flush().await;

        let outcome = match listed {
            Err(e) => {
                tracing::error!(collection = %target, error = %e, "Item sync aborted");
                SyncOutcome::Aborted {
                    tally,
                    reason: e.to_string(),
                }
            }
            Ok(()) if tally.failed > 0 => SyncOutcome::Incomplete(tally),
            Ok(()) => SyncOutcome::Completed(tally),
        };

        let completed = matches!(outcome, SyncOutcome::Completed(_)).then(Utc::now);
        self.db
            .release_collection_lock(kind, &collection_id, completed)
            .await?;

        match &outcome {
            SyncOutcome::Completed(t) => tracing::info!(
                collection = %target,
                listed = t.listed,
                new = t.new,
                submitted = t.submitted,
                "Sync complete"
            ),
            SyncOutcome::Incomplete(t) => tracing::warn!(
                collection = %target,
                failed = t.failed,
                "Sync finished with failures; collection left incomplete"
            ),
            _ => {}
        }
        Ok(outcome)
    }

    /// Every collection of `kind` that `owner` has, for bulk syncs.
    pub async fn list_owner_collections(
        &self,
        owner: &OwnerRef,
        kind: CollectionKind,
    ) -> Result<Vec<CollectionRef>, SyncError> {
        let owner_id = self.owners.resolve(owner).await?.ok_or_else(|| {
            SyncError::OwnerResolution {
                owner: owner.as_str().to_string(),
                collection: format!("{kind} list"),
            }
        })?;
        self.owners.ensure_user(&owner_id, None).await?;
        let canonical = || OwnerRef::Canonical(owner_id.clone());

        let Some(listing) = owner_collections_listing(kind, &owner_id) else {
            return match kind {
                CollectionKind::Photostream => Ok(vec![CollectionRef::Photostream {
                    owner: canonical(),
                }]),
                CollectionKind::Favorites => Ok(vec![CollectionRef::Favorites {
                    owner: canonical(),
                }]),
                _ => Err(SyncError::NotListable(kind)),
            };
        };

        let mut refs = Vec::new();
        let mut summaries = self.source.iterate(&listing);
        while let Some(summary) = summaries.next().await {
            let Some(id) = summary?.id() else {
                tracing::warn!(kind = %kind, "Collection summary without id, skipping");
                continue;
            };
            refs.push(match kind {
                CollectionKind::Gallery => CollectionRef::Gallery {
                    owner: canonical(),
                    id,
                },
                _ => CollectionRef::Album {
                    owner: canonical(),
                    id,
                },
            });
        }
        tracing::info!(owner = %owner_id, kind = %kind, count = refs.len(), "Listed collections");
        Ok(refs)
    }

    async fn load(&self, target: &CollectionRef) -> Result<Option<CollectionRecord>, SyncError> {
        match target.collection_id() {
            Some(id) => Ok(self.db.get_collection(target.kind(), id).await?),
            None => Ok(None),
        }
    }

    async fn sync_items(
        &self,
        collection: &CollectionRecord,
        listing: &Listing,
        sink: &dyn PhotoSink,
        options: &SyncOptions,
        tally: &mut ItemTally,
    ) -> Result<(), SyncError> {
        let mut items = self.source.iterate(listing);
        while let Some(item) = items.next().await {
            if self.shutdown.is_cancelled() {
                return Err(SyncError::Interrupted);
            }
            let item = item?;
            tally.listed += 1;
            match self.reconcile_item(collection, &item, sink, options).await {
                Ok(result) => tally.record(result),
                Err(e) => {
                    tracing::error!(photo_id = ?item.id(), error = %e, "Failed to reconcile item");
                    tally.failed += 1;
                }
            }
        }
        Ok(())
    }

    async fn reconcile_item(
        &self,
        collection: &CollectionRecord,
        item: &RemoteRecord,
        sink: &dyn PhotoSink,
        options: &SyncOptions,
    ) -> Result<ItemResult, SyncError> {
        let Some(photo_id) = item.id() else {
            tracing::warn!(?item, "Listed item has no id, skipping");
            return Ok(ItemResult::Unusable);
        };
        let Some((size, url)) = item.largest_variant() else {
            tracing::warn!(photo_id = %photo_id, "No usable size URL, skipping");
            return Ok(ItemResult::Unusable);
        };

        let existing = self.db.get_photo(&photo_id).await?;
        if let Some(photo) = &existing {
            match photo.status.state() {
                RecordState::Blacklisted | RecordState::Deleted => {
                    tracing::debug!(photo_id = %photo_id, state = ?photo.status.state(), "Skipping");
                    return Ok(ItemResult::Ignored);
                }
                RecordState::WriteLocked => {
                    tracing::warn!(
                        photo_id = %photo_id,
                        locked_at = ?photo.status.write_locked_at,
                        "Photo is write-locked; run `photomirror unlock` if no other process is running"
                    );
                    return Ok(ItemResult::Locked);
                }
                RecordState::Syncable => {}
            }
        }

        let decision =
            decision::download_decision(options, existing.as_ref(), size, &url, item.last_updated());
        let is_new = existing.is_none();
        let mut photo = match existing {
            Some(photo) => photo,
            None => {
                let owner_id = self.photo_owner(collection, item, &photo_id).await?;
                PhotoRecord::new(photo_id.clone(), owner_id, size, url.clone())
            }
        };
        if decision == DownloadDecision::Smaller {
            tracing::warn!(
                photo_id = %photo_id,
                stored = %photo.size,
                offered = %size,
                "Remote offers a smaller size than stored; keeping stored file"
            );
        }
        merge_remote(&mut photo, item, size, url, Utc::now());

        self.db.save_photo(&photo).await?;
        self.db
            .link_photo(collection.kind, &collection.id, &photo.id)
            .await?;

        if !decision.needs_download() {
            return Ok(ItemResult::Indexed { new: is_new });
        }
        tracing::debug!(photo_id = %photo_id, ?decision, size = %photo.size, "Needs fetching");
        let failed = sink.submit(photo, options).await;
        Ok(ItemResult::Submitted { new: is_new, failed })
    }

    /// Owner of a photo seen for the first time.
    async fn photo_owner(
        &self,
        collection: &CollectionRecord,
        item: &RemoteRecord,
        photo_id: &str,
    ) -> Result<String, SyncError> {
        if collection.kind.owner_owns_photos() {
            if let Some(owner) = &collection.owner_id {
                return Ok(owner.clone());
            }
        }
        let owner = item
            .owner()
            .ok_or_else(|| SyncError::MissingOwner(photo_id.to_string()))?;
        self.owners.ensure_user(&owner, item.owner_name()).await?;
        Ok(owner)
    }
}

/// `Some` when the local record's status ends the sync before it starts.
fn classify(local: Option<&CollectionRecord>, target: &CollectionRef) -> Option<SyncOutcome> {
    let record = local?;
    match record.status.state() {
        RecordState::Syncable => None,
        RecordState::Blacklisted => {
            tracing::info!(collection = %target, "Blacklisted, skipping");
            Some(SyncOutcome::Skipped(SkipReason::Blacklisted))
        }
        RecordState::Deleted => {
            tracing::info!(collection = %target, "Deleted upstream, skipping");
            Some(SyncOutcome::Skipped(SkipReason::Deleted))
        }
        RecordState::WriteLocked => {
            tracing::warn!(
                collection = %target,
                locked_at = ?record.status.write_locked_at,
                "Collection is write-locked; run `photomirror unlock` if no other process is running"
            );
            Some(SyncOutcome::Locked)
        }
    }
}

/// Copy remote metadata onto a photo record.
///
/// Descriptive fields follow the remote only when it changed since the last
/// retrieval or the local value is missing. Creation dates are set once.
/// Counters always follow. The size never goes down, and adopting a
/// different file clears the disk flag until the sink commits it.
fn merge_remote(
    photo: &mut PhotoRecord,
    item: &RemoteRecord,
    size: SizeVariant,
    url: String,
    now: DateTime<Utc>,
) {
    let remote_updated = item.last_updated();
    let remote_newer = match (remote_updated, photo.date_last_updated) {
        (Some(remote), Some(local)) => remote > local,
        (Some(_), None) => true,
        (None, _) => false,
    };

    if photo.title.is_none() || remote_newer {
        if let Some(title) = item.title() {
            photo.title = Some(title);
        }
    }
    if photo.description.is_none() || remote_newer {
        if let Some(description) = item.description() {
            photo.description = Some(description);
        }
    }
    if photo.date_taken.is_none() {
        photo.date_taken = item.date_taken();
    }
    if photo.date_uploaded.is_none() {
        photo.date_uploaded = item.date_uploaded();
    }
    if let Some(views) = item.views() {
        photo.views_remote = views;
    }
    if let Some(faves) = item.faves() {
        photo.faves_remote = faves;
    }
    if remote_newer {
        photo.date_last_updated = remote_updated;
    }
    photo.date_last_retrieved = Some(now);

    if size >= photo.size {
        if size != photo.size || !same_cdn_file(&url, &photo.url) {
            photo.filesystem_in_sync = false;
        }
        photo.size = size;
        photo.url = url;
    }
}
