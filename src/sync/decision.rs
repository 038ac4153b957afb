//! The two sync predicates: whether a collection's items are listed at all,
//! and whether a listed photo has to be fetched.
//!
//! Both are pure functions of the local snapshot taken before any metadata
//! was written back, the remote values, and the run options.

use chrono::{DateTime, Utc};

use super::SyncOptions;
use crate::model::size::same_cdn_file;
use crate::model::SizeVariant;
use crate::state::PhotoRecord;

/// Why a collection's items are, or are not, listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionDecision {
    /// `ignore_completed` and the collection finished before.
    SkipCompleted,
    /// Remote timestamp is not newer than the one seen last time.
    SkipUnchanged,
    NeverCompleted,
    Distrusted,
    RemoteNewer,
}

impl CollectionDecision {
    pub fn should_sync(&self) -> bool {
        !matches!(self, Self::SkipCompleted | Self::SkipUnchanged)
    }
}

/// First match wins: ignore-completed, never-completed, distrust, timestamps.
pub fn collection_decision(
    options: &SyncOptions,
    previous_completed: Option<DateTime<Utc>>,
    previous_updated: Option<DateTime<Utc>>,
    remote_updated: Option<DateTime<Utc>>,
) -> CollectionDecision {
    if options.ignore_completed && previous_completed.is_some() {
        return CollectionDecision::SkipCompleted;
    }
    if previous_completed.is_none() {
        return CollectionDecision::NeverCompleted;
    }
    if options.distrust_timestamps {
        return CollectionDecision::Distrusted;
    }
    match (remote_updated, previous_updated) {
        (Some(remote), Some(local)) if remote > local => CollectionDecision::RemoteNewer,
        (_, None) => CollectionDecision::RemoteNewer,
        _ => CollectionDecision::SkipUnchanged,
    }
}

/// Why a photo is, or is not, handed to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadDecision {
    New,
    /// The index says the file is not on disk.
    Missing,
    /// `trust_photo_records` is off.
    Untrusted,
    Larger,
    /// Same size, but the CDN serves a different file name.
    Replaced,
    /// Same size, remote modified since the last retrieval.
    Updated,
    /// Remote offers a smaller variant than the one stored.
    Smaller,
    Keep,
}

impl DownloadDecision {
    pub fn needs_download(&self) -> bool {
        matches!(
            self,
            Self::New | Self::Missing | Self::Untrusted | Self::Larger | Self::Replaced | Self::Updated
        )
    }
}

/// Decide whether a photo needs fetching.
///
/// `local` is the record as it was before this sync touched it; `None` for a
/// photo seen for the first time.
pub fn download_decision(
    options: &SyncOptions,
    local: Option<&PhotoRecord>,
    remote_size: SizeVariant,
    remote_url: &str,
    remote_updated: Option<DateTime<Utc>>,
) -> DownloadDecision {
    let Some(local) = local else {
        return DownloadDecision::New;
    };
    if !local.is_on_disk() {
        return DownloadDecision::Missing;
    }
    if !options.trust_photo_records {
        return DownloadDecision::Untrusted;
    }
    if remote_size > local.size {
        return DownloadDecision::Larger;
    }
    if remote_size < local.size {
        return DownloadDecision::Smaller;
    }
    if options.distrust_timestamps {
        // Hostnames rotate between CDN edges; only the file name identifies the file.
        return if same_cdn_file(remote_url, &local.url) {
            DownloadDecision::Keep
        } else {
            DownloadDecision::Replaced
        };
    }
    match (remote_updated, local.date_last_updated) {
        (Some(remote), Some(stored)) if remote > stored => DownloadDecision::Updated,
        _ => DownloadDecision::Keep,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(secs, 0).single()
    }

    fn on_disk(size: SizeVariant, url: &str, updated: i64) -> PhotoRecord {
        let mut p = PhotoRecord::new("1".into(), "o".into(), size, url.into());
        p.local_path = Some(PathBuf::from("/m/o/1.jpg"));
        p.filesystem_in_sync = true;
        p.date_last_updated = at(updated);
        p
    }

    #[test]
    fn test_ignore_completed_wins_over_everything() {
        let options = SyncOptions {
            ignore_completed: true,
            distrust_timestamps: true,
            ..SyncOptions::default()
        };
        assert_eq!(
            collection_decision(&options, at(10), at(1), at(100)),
            CollectionDecision::SkipCompleted
        );
    }

    #[test]
    fn test_ignore_completed_does_not_skip_unfinished() {
        let options = SyncOptions {
            ignore_completed: true,
            ..SyncOptions::default()
        };
        assert_eq!(
            collection_decision(&options, None, at(1), at(1)),
            CollectionDecision::NeverCompleted
        );
    }

    #[test]
    fn test_distrust_syncs_unchanged_collection() {
        let options = SyncOptions {
            distrust_timestamps: true,
            ..SyncOptions::default()
        };
        let d = collection_decision(&options, at(10), at(5), at(5));
        assert_eq!(d, CollectionDecision::Distrusted);
        assert!(d.should_sync());
    }

    #[test]
    fn test_timestamps_decide_by_default() {
        let options = SyncOptions::default();
        assert_eq!(
            collection_decision(&options, at(10), at(5), at(6)),
            CollectionDecision::RemoteNewer
        );
        assert_eq!(
            collection_decision(&options, at(10), at(5), at(5)),
            CollectionDecision::SkipUnchanged
        );
        assert_eq!(
            collection_decision(&options, at(10), at(5), None),
            CollectionDecision::SkipUnchanged
        );
        assert_eq!(
            collection_decision(&options, at(10), None, None),
            CollectionDecision::RemoteNewer
        );
    }

    #[test]
    fn test_new_and_missing_photos_download() {
        let options = SyncOptions::default();
        assert_eq!(
            download_decision(&options, None, SizeVariant::Small, "https://c/1_a_s.jpg", None),
            DownloadDecision::New
        );

        let mut local = on_disk(SizeVariant::Large, "https://c/1_a_b.jpg", 5);
        local.filesystem_in_sync = false;
        assert_eq!(
            download_decision(&options, Some(&local), SizeVariant::Large, "https://c/1_a_b.jpg", at(5)),
            DownloadDecision::Missing
        );
    }

    #[test]
    fn test_untrusted_records_always_download() {
        let options = SyncOptions {
            trust_photo_records: false,
            ..SyncOptions::default()
        };
        let local = on_disk(SizeVariant::Original, "https://c/1_a_o.jpg", 5);
        assert_eq!(
            download_decision(&options, Some(&local), SizeVariant::Original, "https://c/1_a_o.jpg", at(5)),
            DownloadDecision::Untrusted
        );
    }

    #[test]
    fn test_size_comparison() {
        let options = SyncOptions::default();
        let local = on_disk(SizeVariant::Large, "https://c/1_a_b.jpg", 5);

        let larger = download_decision(&options, Some(&local), SizeVariant::Original, "https://c/1_a_o.jpg", at(5));
        assert_eq!(larger, DownloadDecision::Larger);

        let smaller = download_decision(&options, Some(&local), SizeVariant::Medium, "https://c/1_a.jpg", at(9));
        assert_eq!(smaller, DownloadDecision::Smaller);
        assert!(!smaller.needs_download());
    }

    #[test]
    fn test_distrust_compares_cdn_filenames_not_hosts() {
        let options = SyncOptions {
            distrust_timestamps: true,
            ..SyncOptions::default()
        };
        let local = on_disk(SizeVariant::Large, "https://live.staticflickr.com/65535/1_a_b.jpg", 5);

        let other_host = download_decision(
            &options,
            Some(&local),
            SizeVariant::Large,
            "https://farm1.staticflickr.com/65535/1_a_b.jpg",
            at(5),
        );
        assert_eq!(other_host, DownloadDecision::Keep);

        let replaced = download_decision(
            &options,
            Some(&local),
            SizeVariant::Large,
            "https://live.staticflickr.com/65535/1_z_b.jpg",
            at(5),
        );
        assert_eq!(replaced, DownloadDecision::Replaced);
    }

    #[test]
    fn test_distrust_treats_unparseable_urls_as_different_files() {
        let options = SyncOptions {
            distrust_timestamps: true,
            ..SyncOptions::default()
        };
        let local = on_disk(SizeVariant::Large, "not a url", 5);
        assert_eq!(
            download_decision(&options, Some(&local), SizeVariant::Large, "also not a url", at(5)),
            DownloadDecision::Replaced
        );
        assert_eq!(
            download_decision(&options, Some(&local), SizeVariant::Large, "not a url", at(5)),
            DownloadDecision::Keep
        );
    }

    #[test]
    fn test_distrust_ignores_newer_timestamp_when_filename_matches() {
        let options = SyncOptions {
            distrust_timestamps: true,
            ..SyncOptions::default()
        };
        let local = on_disk(SizeVariant::Large, "https://c/1_a_b.jpg", 5);
        assert_eq!(
            download_decision(&options, Some(&local), SizeVariant::Large, "https://c/1_a_b.jpg", at(50)),
            DownloadDecision::Keep
        );
    }

    #[test]
    fn test_newer_remote_timestamp_downloads_at_same_size() {
        let options = SyncOptions::default();
        let local = on_disk(SizeVariant::Large, "https://c/1_a_b.jpg", 5);
        assert_eq!(
            download_decision(&options, Some(&local), SizeVariant::Large, "https://c/1_a_b.jpg", at(6)),
            DownloadDecision::Updated
        );
        assert_eq!(
            download_decision(&options, Some(&local), SizeVariant::Large, "https://c/1_a_b.jpg", at(5)),
            DownloadDecision::Keep
        );
        assert_eq!(
            download_decision(&options, Some(&local), SizeVariant::Large, "https://c/1_a_b.jpg", None),
            DownloadDecision::Keep
        );
    }
}
