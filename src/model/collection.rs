//! Collection kinds and the references that name a concrete collection.

use std::fmt;

/// The five collection shapes the remote service exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Photostream,
    Album,
    Gallery,
    Favorites,
    Pool,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 5] = [
        Self::Photostream,
        Self::Album,
        Self::Gallery,
        Self::Favorites,
        Self::Pool,
    ];

    /// Convert to the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photostream => "photostream",
            Self::Album => "album",
            Self::Gallery => "gallery",
            Self::Favorites => "favorites",
            Self::Pool => "pool",
        }
    }

    /// Parse from the string stored in the database.
    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Whether every photo in the collection belongs to the collection owner.
    ///
    /// Galleries, favorites and pools aggregate other people's photos, so
    /// photo ownership has to be resolved per item.
    pub fn owner_owns_photos(&self) -> bool {
        matches!(self, Self::Photostream | Self::Album)
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An owner (or a pool's group) as named by the user: either a vanity alias
/// taken from a URL or a canonical id the service hands out.
///
/// Aliases and canonical ids live in different namespaces. An alias is never
/// stored or compared as if it were a canonical id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OwnerRef {
    Alias(String),
    Canonical(String),
}

impl OwnerRef {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Alias(s) | Self::Canonical(s) => s,
        }
    }

    pub fn canonical_id(&self) -> Option<&str> {
        match self {
            Self::Canonical(id) => Some(id),
            Self::Alias(_) => None,
        }
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alias(a) => write!(f, "{a}"),
            Self::Canonical(id) => write!(f, "{id} (canonical)"),
        }
    }
}

/// A resolved pointer to one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionRef {
    Photostream { owner: OwnerRef },
    Favorites { owner: OwnerRef },
    Album { owner: OwnerRef, id: String },
    Gallery { owner: OwnerRef, id: String },
    /// A group pool, keyed by the group. URLs carry the group's alias.
    Pool { group: OwnerRef },
}

impl CollectionRef {
    pub fn kind(&self) -> CollectionKind {
        match self {
            Self::Photostream { .. } => CollectionKind::Photostream,
            Self::Favorites { .. } => CollectionKind::Favorites,
            Self::Album { .. } => CollectionKind::Album,
            Self::Gallery { .. } => CollectionKind::Gallery,
            Self::Pool { .. } => CollectionKind::Pool,
        }
    }

    pub fn owner(&self) -> Option<&OwnerRef> {
        match self {
            Self::Photostream { owner }
            | Self::Favorites { owner }
            | Self::Album { owner, .. }
            | Self::Gallery { owner, .. } => Some(owner),
            Self::Pool { .. } => None,
        }
    }

    pub fn group(&self) -> Option<&OwnerRef> {
        match self {
            Self::Pool { group } => Some(group),
            _ => None,
        }
    }

    /// True once no alias remains to be resolved.
    pub fn has_canonical_id(&self) -> bool {
        self.owner()
            .or(self.group())
            .map(|o| o.canonical_id().is_some())
            .unwrap_or(true)
    }

    /// Replace the owner with its canonical id. No-op for pools.
    pub fn set_canonical_owner(&mut self, canonical_id: String) {
        match self {
            Self::Photostream { owner }
            | Self::Favorites { owner }
            | Self::Album { owner, .. }
            | Self::Gallery { owner, .. } => *owner = OwnerRef::Canonical(canonical_id),
            Self::Pool { .. } => {}
        }
    }

    /// Replace a pool's group alias with the group id. No-op for other kinds.
    pub fn set_canonical_group(&mut self, group_id: String) {
        if let Self::Pool { group } = self {
            *group = OwnerRef::Canonical(group_id);
        }
    }

    /// The id the collection is stored under.
    ///
    /// `None` while the owner of an owner-keyed kind, or a pool's group, is
    /// still an alias.
    pub fn collection_id(&self) -> Option<&str> {
        match self {
            Self::Photostream { owner } | Self::Favorites { owner } => owner.canonical_id(),
            Self::Pool { group } => group.canonical_id(),
            Self::Album { id, .. } | Self::Gallery { id, .. } => Some(id),
        }
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Photostream { owner } => write!(f, "photostream of {owner}"),
            Self::Favorites { owner } => write!(f, "favorites of {owner}"),
            Self::Album { owner, id } => write!(f, "album {id} of {owner}"),
            Self::Gallery { owner, id } => write!(f, "gallery {id} of {owner}"),
            Self::Pool { group } => write!(f, "pool of {group}"),
        }
    }
}
