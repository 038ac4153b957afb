//! Collection kinds, references, size variants, and URL resolution.

pub mod collection;
pub mod resolver;
pub mod size;

pub use collection::{CollectionKind, CollectionRef, OwnerRef};
pub use resolver::ResolveError;
pub use size::SizeVariant;
