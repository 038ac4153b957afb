//! Turns user input (a web URL, or a bare id plus kind and owner) into a
//! [`CollectionRef`].
//!
//! URL shapes understood:
//!
//! | path                                           | result                    |
//! |------------------------------------------------|---------------------------|
//! | `/photos/{owner}`                              | photostream               |
//! | `/photos/{owner}/albums/{id}` (or `sets`)      | album                     |
//! | `/photos/{owner}/galleries/{id}`               | gallery                   |
//! | `/photos/{owner}/favorites`                    | favorites                 |
//! | `/groups/{group}/pool`                         | pool                      |
//! | `/photos/{owner}/{photo}/in/{context}`         | the context's collection  |
//! | `/photos/{owner}/albums` (no id)               | ambiguous                 |
//!
//! Anything else, including a single photo page without context, is
//! unrecognized.

use thiserror::Error;

use super::collection::{CollectionKind, CollectionRef, OwnerRef};

const ACCEPTED_HOSTS: &[&str] = &[
    "flickr.com",
    "www.flickr.com",
    "m.flickr.com",
    "secure.flickr.com",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Unrecognized collection URL: {0}")]
    UnrecognizedUrl(String),

    #[error("'{input}' lists every {kind} of an owner; pick a single {kind}")]
    AmbiguousCollection { input: String, kind: CollectionKind },

    #[error("A {kind} reference needs {part}")]
    MissingPart {
        kind: CollectionKind,
        part: &'static str,
    },
}

/// One row per path segment that names a collection under `/photos/{owner}/`.
struct Route {
    kind: CollectionKind,
    /// Segment following the owner in a direct collection URL.
    segment: &'static str,
    /// Prefix of the `in/{context}` segment on a photo page.
    context: &'static str,
    /// Whether the route needs an id after `segment`.
    takes_id: bool,
    /// Whether the context segment carries its own owner (`gallery-{owner}-{id}`).
    context_owner: bool,
}

const ROUTES: &[Route] = &[
    Route {
        kind: CollectionKind::Album,
        segment: "albums",
        context: "album-",
        takes_id: true,
        context_owner: false,
    },
    Route {
        kind: CollectionKind::Album,
        segment: "sets",
        context: "set-",
        takes_id: true,
        context_owner: false,
    },
    Route {
        kind: CollectionKind::Gallery,
        segment: "galleries",
        context: "gallery-",
        takes_id: true,
        context_owner: true,
    },
    Route {
        kind: CollectionKind::Favorites,
        segment: "favorites",
        context: "faves-",
        takes_id: false,
        context_owner: true,
    },
];

const PHOTOSTREAM_CONTEXT: &str = "photostream";
const POOL_CONTEXT: &str = "pool-";

/// Resolve a web URL into a collection reference.
///
/// Owners and pool groups are always returned as [`OwnerRef::Alias`]: a URL
/// segment can carry either form and only a lookup can tell them apart.
pub fn resolve(input: &str) -> Result<CollectionRef, ResolveError> {
    let unrecognized = || ResolveError::UnrecognizedUrl(input.to_string());

    let trimmed = input.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let url = url::Url::parse(&with_scheme).map_err(|_| unrecognized())?;
    let host = url.host_str().ok_or_else(unrecognized)?.to_ascii_lowercase();
    if !ACCEPTED_HOSTS.contains(&host.as_str()) {
        return Err(unrecognized());
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    match segments.as_slice() {
        ["photos", owner] => Ok(CollectionRef::Photostream {
            owner: alias(owner),
        }),
        ["groups", group, "pool", ..] => Ok(CollectionRef::Pool {
            group: alias(group),
        }),
        ["photos", owner, photo, "in", context, ..] if is_photo_id(photo) => {
            resolve_context(owner, context).ok_or_else(unrecognized)
        }
        ["photos", owner, segment, rest @ ..] => {
            let route = ROUTES
                .iter()
                .find(|r| r.segment.eq_ignore_ascii_case(segment))
                .ok_or_else(unrecognized)?;
            if !route.takes_id {
                return Ok(build(route.kind, alias(owner), None));
            }
            match rest.first() {
                Some(id) => Ok(build(route.kind, alias(owner), Some(*id))),
                None => Err(ResolveError::AmbiguousCollection {
                    input: input.to_string(),
                    kind: route.kind,
                }),
            }
        }
        _ => Err(unrecognized()),
    }
}

/// Resolve a bare id with an explicit kind and optional owner.
///
/// Photostreams and favorites are addressed by their owner, so either `id`
/// or `owner` may name it.
pub fn resolve_parts(
    kind: CollectionKind,
    id: Option<&str>,
    owner: Option<&str>,
) -> Result<CollectionRef, ResolveError> {
    let id = id.map(str::trim).filter(|s| !s.is_empty());
    let owner = owner.map(str::trim).filter(|s| !s.is_empty());
    let missing = |part| ResolveError::MissingPart { kind, part };

    match kind {
        CollectionKind::Photostream | CollectionKind::Favorites => {
            let owner = owner.or(id).ok_or_else(|| missing("an owner"))?;
            Ok(build(kind, alias(owner), None))
        }
        CollectionKind::Album | CollectionKind::Gallery => {
            let id = id.ok_or_else(|| missing("an id"))?;
            let owner = owner.ok_or_else(|| missing("an owner"))?;
            Ok(build(kind, alias(owner), Some(id)))
        }
        CollectionKind::Pool => {
            // An explicit group id, not a URL alias.
            let id = id.ok_or_else(|| missing("a group id"))?;
            Ok(CollectionRef::Pool {
                group: OwnerRef::Canonical(id.to_string()),
            })
        }
    }
}

fn resolve_context(path_owner: &str, context: &str) -> Option<CollectionRef> {
    if context == PHOTOSTREAM_CONTEXT {
        return Some(CollectionRef::Photostream {
            owner: alias(path_owner),
        });
    }
    if let Some(group) = context.strip_prefix(POOL_CONTEXT) {
        return non_empty(group).map(|group| CollectionRef::Pool {
            group: alias(group),
        });
    }

    let route = ROUTES.iter().find(|r| context.starts_with(r.context))?;
    let rest = non_empty(&context[route.context.len()..])?;

    match (route.takes_id, route.context_owner) {
        // album-{id}: the album belongs to the photo's owner
        (true, false) => Some(build(route.kind, alias(path_owner), Some(rest))),
        // gallery-{owner}-{id}: curated by someone else
        (true, true) => {
            let (owner, id) = rest.rsplit_once('-')?;
            Some(build(route.kind, alias(non_empty(owner)?), Some(non_empty(id)?)))
        }
        // faves-{owner}
        (false, true) => Some(build(route.kind, alias(rest), None)),
        (false, false) => Some(build(route.kind, alias(path_owner), None)),
    }
}

fn build(kind: CollectionKind, owner: OwnerRef, id: Option<&str>) -> CollectionRef {
    let id = id.unwrap_or_default().to_string();
    match kind {
        CollectionKind::Photostream => CollectionRef::Photostream { owner },
        CollectionKind::Favorites => CollectionRef::Favorites { owner },
        CollectionKind::Album => CollectionRef::Album { owner, id },
        CollectionKind::Gallery => CollectionRef::Gallery { owner, id },
        CollectionKind::Pool => CollectionRef::Pool { group: owner },
    }
}

fn alias(s: &str) -> OwnerRef {
    OwnerRef::Alias(s.to_string())
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

fn is_photo_id(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn album(owner: &str, id: &str) -> CollectionRef {
        CollectionRef::Album {
            owner: alias(owner),
            id: id.into(),
        }
    }

    #[test]
    fn test_photostream_url() {
        assert_eq!(
            resolve("https://www.flickr.com/photos/spacex/").unwrap(),
            CollectionRef::Photostream {
                owner: alias("spacex")
            }
        );
    }

    #[test]
    fn test_scheme_is_optional() {
        assert_eq!(
            resolve("flickr.com/photos/spacex").unwrap(),
            CollectionRef::Photostream {
                owner: alias("spacex")
            }
        );
    }

    #[test]
    fn test_album_urls_under_both_segments() {
        assert_eq!(
            resolve("https://www.flickr.com/photos/spacex/albums/72157").unwrap(),
            album("spacex", "72157")
        );
        assert_eq!(
            resolve("https://www.flickr.com/photos/spacex/sets/72157/").unwrap(),
            album("spacex", "72157")
        );
        // trailing "with/{photo}" does not change the album
        assert_eq!(
            resolve("https://www.flickr.com/photos/spacex/albums/72157/with/5100").unwrap(),
            album("spacex", "72157")
        );
    }

    #[test]
    fn test_gallery_and_favorites_urls() {
        assert_eq!(
            resolve("https://www.flickr.com/photos/flickr/galleries/72157647277042064/").unwrap(),
            CollectionRef::Gallery {
                owner: alias("flickr"),
                id: "72157647277042064".into()
            }
        );
        assert_eq!(
            resolve("https://www.flickr.com/photos/12345@N02/favorites").unwrap(),
            CollectionRef::Favorites {
                owner: alias("12345@N02")
            }
        );
    }

    #[test]
    fn test_pool_url() {
        assert_eq!(
            resolve("https://www.flickr.com/groups/space/pool/").unwrap(),
            CollectionRef::Pool {
                group: alias("space")
            }
        );
        assert!(!resolve("https://www.flickr.com/groups/34427469792@N01/pool/")
            .unwrap()
            .has_canonical_id());
    }

    #[test]
    fn test_photo_in_album_context_resolves_to_album() {
        assert_eq!(
            resolve("https://www.flickr.com/photos/spacex/5100/in/album-72157/").unwrap(),
            album("spacex", "72157")
        );
        assert_eq!(
            resolve("https://www.flickr.com/photos/spacex/5100/in/photostream/").unwrap(),
            CollectionRef::Photostream {
                owner: alias("spacex")
            }
        );
    }

    #[test]
    fn test_photo_in_foreign_contexts_uses_context_owner() {
        assert_eq!(
            resolve("https://www.flickr.com/photos/spacex/5100/in/gallery-99@N01-7215/").unwrap(),
            CollectionRef::Gallery {
                owner: alias("99@N01"),
                id: "7215".into()
            }
        );
        assert_eq!(
            resolve("https://www.flickr.com/photos/spacex/5100/in/faves-kim/").unwrap(),
            CollectionRef::Favorites {
                owner: alias("kim")
            }
        );
        assert_eq!(
            resolve("https://www.flickr.com/photos/spacex/5100/in/pool-space/").unwrap(),
            CollectionRef::Pool {
                group: alias("space")
            }
        );
    }

    #[test]
    fn test_list_of_albums_is_ambiguous() {
        let err = resolve("https://www.flickr.com/photos/spacex/albums").unwrap_err();
        assert!(matches!(
            err,
            ResolveError::AmbiguousCollection {
                kind: CollectionKind::Album,
                ..
            }
        ));
        let err = resolve("https://www.flickr.com/photos/spacex/galleries/").unwrap_err();
        assert!(matches!(
            err,
            ResolveError::AmbiguousCollection {
                kind: CollectionKind::Gallery,
                ..
            }
        ));
    }

    #[test]
    fn test_single_photo_is_unrecognized() {
        assert!(matches!(
            resolve("https://www.flickr.com/photos/spacex/5100/"),
            Err(ResolveError::UnrecognizedUrl(_))
        ));
        assert!(matches!(
            resolve("https://www.flickr.com/photos/spacex/5100/in/unknown-1/"),
            Err(ResolveError::UnrecognizedUrl(_))
        ));
    }

    #[test]
    fn test_foreign_host_and_garbage_are_unrecognized() {
        assert!(matches!(
            resolve("https://example.com/photos/spacex"),
            Err(ResolveError::UnrecognizedUrl(_))
        ));
        assert!(matches!(
            resolve("not a url at all"),
            Err(ResolveError::UnrecognizedUrl(_))
        ));
        assert!(matches!(
            resolve("https://www.flickr.com/"),
            Err(ResolveError::UnrecognizedUrl(_))
        ));
    }

    #[test]
    fn test_numeric_looking_owner_stays_an_alias() {
        let r = resolve("https://www.flickr.com/photos/12345@N02/").unwrap();
        assert!(!r.has_canonical_id());
    }

    #[test]
    fn test_parts_require_what_the_kind_needs() {
        assert_eq!(
            resolve_parts(CollectionKind::Album, Some("7215"), Some("spacex")).unwrap(),
            album("spacex", "7215")
        );
        assert_eq!(
            resolve_parts(CollectionKind::Album, Some("7215"), None).unwrap_err(),
            ResolveError::MissingPart {
                kind: CollectionKind::Album,
                part: "an owner"
            }
        );
        assert_eq!(
            resolve_parts(CollectionKind::Photostream, Some("spacex"), None).unwrap(),
            CollectionRef::Photostream {
                owner: alias("spacex")
            }
        );
        assert_eq!(
            resolve_parts(CollectionKind::Pool, Some("34427469792@N01"), None).unwrap(),
            CollectionRef::Pool {
                group: OwnerRef::Canonical("34427469792@N01".into())
            }
        );
        assert!(resolve_parts(CollectionKind::Pool, None, Some("x")).is_err());
    }
}
