//! Remote collaborators: the authoritative document store and media object storage.
//!
//! Both are consumed through narrow traits so the engagement, feed and upload
//! logic never depends on a particular backend:
//!
//! - [`RemoteContentStore`] - collection-based documents (list, get, create, update-field)
//! - [`MediaStorage`] - binary upload plus public URL resolution
//!
//! [`http`] implements them over JSON/HTTP with `reqwest`; [`memory`] keeps
//! everything in-process for tests and offline runs.

pub mod http;
pub mod memory;
mod types;

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use url::Url;

pub use http::{build_client, HttpContentStore, HttpMediaStorage};
pub use memory::{FieldUpdate, MemoryContentStore, MemoryMediaStorage};
pub use types::{
    new_reel_fields, ContentItem, ContentKind, Document, FetchError, Fields, RemoteError,
    LIKED_FIELD,
};

/// Byte counts reported while a file streams to object storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub transferred: u64,
    pub total: u64,
}

/// Callback receiving transfer progress. Informational only.
pub type ProgressFn = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Authoritative document collection for posts and reels.
#[async_trait]
pub trait RemoteContentStore: Send + Sync {
    /// All documents of `collection`, in the store's natural order.
    async fn list_all(&self, collection: &str) -> Result<Vec<Document>, RemoteError>;

    /// One document, or `None` if it does not exist.
    async fn get_by_id(&self, collection: &str, id: &str)
        -> Result<Option<Document>, RemoteError>;

    /// Creates a document and returns it with its store-assigned id.
    async fn create(&self, collection: &str, fields: Fields) -> Result<Document, RemoteError>;

    /// Sets a single field on an existing document.
    async fn update_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<(), RemoteError>;
}

/// Object storage for uploaded media.
#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Streams the local file to `path`, returning the number of bytes sent.
    async fn put_file(
        &self,
        path: &str,
        local: &Path,
        progress: Option<ProgressFn>,
    ) -> Result<u64, RemoteError>;

    /// Public download URL of a stored object.
    async fn download_url(&self, path: &str) -> Result<Url, RemoteError>;
}
