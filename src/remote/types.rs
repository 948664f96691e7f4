use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// Field map of a remote document.
pub type Fields = Map<String, Value>;

/// Name of the redundant server-side like flag on reel documents.
pub const LIKED_FIELD: &str = "liked";

// ============================================================================
// Error Types
// ============================================================================

/// Failures talking to the remote document store or object storage.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Request timed out")]
    Timeout,
    /// Non-2xx response
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    /// Body did not match the expected document shape
    #[error("Malformed response: {0}")]
    Decode(String),
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(#[from] crate::util::UrlValidationError),
    /// Local file could not be read for upload
    #[error("Local file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid media path: {0}")]
    InvalidPath(String),
    /// In-process store configured to refuse the call
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Upload cancelled")]
    Cancelled,
}

/// Remote list/get failed; the feed keeps its previous content.
#[derive(Debug, Error)]
#[error("Failed to fetch collection '{collection}': {source}")]
pub struct FetchError {
    pub collection: String,
    #[source]
    pub source: RemoteError,
}

// ============================================================================
// Documents
// ============================================================================

/// One document as returned by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub fields: Fields,
}

/// Which feed a content item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    /// Photo post
    Post,
    /// Short video
    Reel,
}

impl ContentKind {
    /// Document field holding the media URL.
    pub fn media_field(self) -> &'static str {
        match self {
            ContentKind::Post => "imageUrl",
            ContentKind::Reel => "video",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ContentKind::Post => "post",
            ContentKind::Reel => "reel",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Content Items
// ============================================================================

/// A post or reel as displayed in a feed.
///
/// String fields use `Arc<str>` so snapshots handed to the presentation layer
/// clone cheaply.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentItem {
    pub id: String,
    pub kind: ContentKind,
    pub author_name: Arc<str>,
    pub media_url: Arc<str>,
    pub description: Arc<str>,
    pub created_at: Option<DateTime<Utc>>,
    /// Server-side copy of the like flag (reels only), refreshed on re-fetch
    pub remote_liked: Option<bool>,
}

impl ContentItem {
    /// Builds an item from a remote document.
    ///
    /// The media URL is required; every other field falls back to empty/none.
    /// Returns the reason on failure so callers can log and skip the document.
    pub fn from_document(kind: ContentKind, doc: Document) -> Result<Self, String> {
        if doc.id.is_empty() {
            return Err("document has an empty id".to_string());
        }

        let media_url = match doc.fields.get(kind.media_field()) {
            Some(Value::String(url)) if !url.is_empty() => url.clone(),
            Some(_) => return Err(format!("field '{}' is not a URL string", kind.media_field())),
            None => return Err(format!("missing field '{}'", kind.media_field())),
        };

        let text = |name: &str| doc.fields.get(name).and_then(Value::as_str);
        let author_name = text("user").unwrap_or_default();
        let description = text("description")
            .or_else(|| text("content"))
            .unwrap_or_default();
        let created_at = text("createdAt")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let remote_liked = doc.fields.get(LIKED_FIELD).and_then(Value::as_bool);

        Ok(Self {
            kind,
            author_name: Arc::from(author_name),
            media_url: Arc::from(media_url),
            description: Arc::from(description),
            created_at,
            remote_liked,
            id: doc.id,
        })
    }
}

/// Fields of a freshly uploaded reel's document.
pub fn new_reel_fields(media_url: &str, author_name: &str, created_at: DateTime<Utc>) -> Fields {
    let mut fields = Fields::new();
    fields.insert(
        ContentKind::Reel.media_field().to_string(),
        Value::from(media_url),
    );
    fields.insert(LIKED_FIELD.to_string(), Value::Bool(false));
    fields.insert("user".to_string(), Value::from(author_name));
    fields.insert("createdAt".to_string(), Value::from(created_at.to_rfc3339()));
    fields
}
