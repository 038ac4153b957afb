//! Remote photo service: API client, payload records, user lookup and
//! paginated listings.

pub mod api;
pub mod record;
pub mod source;
pub mod users;

pub use api::{ApiError, HttpApi, RemoteApi};
pub use record::RemoteRecord;
pub use source::{CollectionSource, Listing, Pagination, SourceError};
pub use users::{ApiUserDirectory, UserDirectory, UserIdentity};
