//! Size variants published by the CDN, ordered smallest to largest.

use std::fmt;

/// A CDN size variant. The derived `Ord` follows declaration order, so
/// `Square < Thumbnail < ... < Original`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SizeVariant {
    Square,
    Thumbnail,
    Small,
    Medium,
    Large,
    Large1600,
    Large2048,
    Original,
}

impl SizeVariant {
    /// All variants, smallest first.
    pub const ASCENDING: [SizeVariant; 8] = [
        Self::Square,
        Self::Thumbnail,
        Self::Small,
        Self::Medium,
        Self::Large,
        Self::Large1600,
        Self::Large2048,
        Self::Original,
    ];

    /// Short suffix used both in listing field names and in the index.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Square => "sq",
            Self::Thumbnail => "t",
            Self::Small => "s",
            Self::Medium => "m",
            Self::Large => "l",
            Self::Large1600 => "h",
            Self::Large2048 => "k",
            Self::Original => "o",
        }
    }

    /// Name of the listing field carrying this variant's URL.
    pub fn url_field(&self) -> &'static str {
        match self {
            Self::Square => "url_sq",
            Self::Thumbnail => "url_t",
            Self::Small => "url_s",
            Self::Medium => "url_m",
            Self::Large => "url_l",
            Self::Large1600 => "url_h",
            Self::Large2048 => "url_k",
            Self::Original => "url_o",
        }
    }

    pub fn from_suffix(s: &str) -> Option<Self> {
        Self::ASCENDING.into_iter().find(|v| v.suffix() == s)
    }

    /// Comma-separated `extras` value requesting every URL field.
    pub fn extras() -> String {
        Self::ASCENDING
            .iter()
            .map(|v| v.url_field())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for SizeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// The file-name component a CDN URL ends with.
///
/// Two URLs for the same size with different file names mean the file was
/// replaced upstream, regardless of what the timestamps claim.
pub fn cdn_filename(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}

/// Whether two CDN URLs name the same file, ignoring the edge host.
///
/// When either side has no file name the raw URLs are compared instead.
pub fn same_cdn_file(a: &str, b: &str) -> bool {
    match (cdn_filename(a), cdn_filename(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_follows_pixel_size() {
        assert!(SizeVariant::Square < SizeVariant::Thumbnail);
        assert!(SizeVariant::Medium < SizeVariant::Large);
        assert!(SizeVariant::Large2048 < SizeVariant::Original);
        let mut shuffled = vec![
            SizeVariant::Original,
            SizeVariant::Small,
            SizeVariant::Large1600,
            SizeVariant::Square,
        ];
        shuffled.sort();
        assert_eq!(
            shuffled,
            vec![
                SizeVariant::Square,
                SizeVariant::Small,
                SizeVariant::Large1600,
                SizeVariant::Original
            ]
        );
    }

    #[test]
    fn test_suffix_lookup() {
        for v in SizeVariant::ASCENDING {
            assert_eq!(SizeVariant::from_suffix(v.suffix()), Some(v));
        }
        assert_eq!(SizeVariant::from_suffix("x"), None);
    }

    #[test]
    fn test_extras_lists_all_url_fields() {
        let extras = SizeVariant::extras();
        assert!(extras.starts_with("url_sq,url_t"));
        assert!(extras.ends_with("url_o"));
    }

    #[test]
    fn test_cdn_filename_takes_last_segment() {
        assert_eq!(
            cdn_filename("https://live.staticflickr.com/65535/5100_abcd_o.jpg").as_deref(),
            Some("5100_abcd_o.jpg")
        );
        assert_eq!(
            cdn_filename("https://cdn.example.com/a/b/c.png?x=1").as_deref(),
            Some("c.png")
        );
        assert_eq!(cdn_filename("not a url"), None);
    }

    #[test]
    fn test_same_cdn_file_ignores_host_but_not_unparseable_urls() {
        assert!(same_cdn_file(
            "https://live.staticflickr.com/65535/1_a_b.jpg",
            "https://farm2.staticflickr.com/65535/1_a_b.jpg"
        ));
        assert!(!same_cdn_file(
            "https://live.staticflickr.com/65535/1_a_b.jpg",
            "https://live.staticflickr.com/65535/1_z_b.jpg"
        ));
        assert!(!same_cdn_file("garbage one", "garbage two"));
        assert!(same_cdn_file("garbage one", "garbage one"));
        assert!(!same_cdn_file("garbage", "https://live.staticflickr.com/65535/1_a_b.jpg"));
    }
}
