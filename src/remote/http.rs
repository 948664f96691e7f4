//! JSON-over-HTTP backends.
//!
//! Document store layout:
//!
//! | Operation      | Request                                   | Response                          |
//! |----------------|-------------------------------------------|-----------------------------------|
//! | `list_all`     | `GET {base}/{collection}`                 | `{"documents": [{"id", "fields"}]}` |
//! | `get_by_id`    | `GET {base}/{collection}/{id}`            | document, or 404                  |
//! | `create`       | `POST {base}/{collection}` `{"fields"}`   | created document                  |
//! | `update_field` | `PATCH {base}/{collection}/{id}` `{"fields": {field: value}}` | any 2xx       |
//!
//! Object storage: `PUT {base}/o/{path}` with a streamed body, then
//! `GET {base}/o/{path}/url` returning `{"url": "..."}`.

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use url::Url;

use super::{
    Document, Fields, MediaStorage, ProgressFn, RemoteContentStore, RemoteError, TransferProgress,
};
use crate::util::{validate_base_url, validate_media_url};

/// Response bodies above this size are refused (10MB)
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;
/// Uploads carry whole videos, so they get a far longer budget than API calls
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Deserialize)]
struct DocumentList {
    #[serde(default)]
    documents: Vec<Document>,
}

#[derive(Serialize)]
struct FieldsBody<'a> {
    fields: &'a Fields,
}

#[derive(Deserialize)]
struct DownloadUrl {
    url: String,
}

/// Shared HTTP client for both backends.
///
/// Follows at most 3 redirects and refuses redirect loops.
pub fn build_client() -> Result<reqwest::Client, RemoteError> {
    let policy = reqwest::redirect::Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }
        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }
        tracing::debug!(
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    });

    let client = reqwest::Client::builder()
        .redirect(policy)
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .build()?;
    Ok(client)
}

// ============================================================================
// Shared Endpoint
// ============================================================================

/// Base URL plus credentials shared by both HTTP backends.
struct Endpoint {
    client: reqwest::Client,
    base: Url,
    token: Option<SecretString>,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl Endpoint {
    fn new(client: reqwest::Client, base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        Ok(Self {
            client,
            base: validate_base_url(base_url)?,
            token: None,
            api_key: None,
            timeout,
        })
    }

    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| RemoteError::InvalidPath(self.base.to_string()))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn authorize(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key.expose_secret());
        }
        request
    }

    /// Sends `request` and hands the response to `read`. The timeout covers
    /// both, so a body that stalls mid-stream still times out.
    async fn call<T, F, Fut>(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Duration,
        read: F,
    ) -> Result<T, RemoteError>
    where
        F: FnOnce(reqwest::Response) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let exchange = async {
            let response = self.authorize(request).send().await?;
            read(response).await
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| RemoteError::Timeout)?
    }
}

/// Splits an object path into URL segments, refusing empty or relative parts.
fn object_segments(path: &str) -> Result<Vec<&str>, RemoteError> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments
        .iter()
        .any(|s| s.is_empty() || *s == "." || *s == "..")
    {
        return Err(RemoteError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

fn check_status(response: &reqwest::Response) -> Result<(), RemoteError> {
    let status = response.status();
    if !status.is_success() {
        return Err(RemoteError::HttpStatus(status.as_u16()));
    }
    Ok(())
}

/// Read a response body, refusing anything above `limit` bytes.
async fn read_limited(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, RemoteError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(RemoteError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(RemoteError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RemoteError> {
    check_status(&response)?;
    let bytes = read_limited(response, MAX_RESPONSE_SIZE).await?;
    serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
}

fn json_body<T: Serialize>(value: &T) -> Result<Vec<u8>, RemoteError> {
    serde_json::to_vec(value).map_err(|e| RemoteError::Decode(e.to_string()))
}

// ============================================================================
// Document Store
// ============================================================================

/// Remote document store reached over HTTP.
pub struct HttpContentStore {
    endpoint: Endpoint,
}

impl HttpContentStore {
    /// Creates a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidBaseUrl`] for unparseable URLs and for
    /// plain HTTP to anything other than localhost.
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        Ok(Self {
            endpoint: Endpoint::new(client, base_url, timeout)?,
        })
    }

    /// Sends `Authorization: Bearer <token>` on every request.
    pub fn with_token(mut self, token: Option<SecretString>) -> Self {
        self.endpoint.token = token;
        self
    }

    pub fn with_api_key(mut self, api_key: Option<SecretString>) -> Self {
        self.endpoint.api_key = api_key;
        self
    }
}

#[async_trait]
impl RemoteContentStore for HttpContentStore {
    async fn list_all(&self, collection: &str) -> Result<Vec<Document>, RemoteError> {
        let url = self.endpoint.url([collection])?;
        let request = self.endpoint.client.get(url);
        let list: DocumentList = self
            .endpoint
            .call(request, self.endpoint.timeout, read_json)
            .await?;
        tracing::debug!(collection, count = list.documents.len(), "Listed documents");
        Ok(list.documents)
    }

    async fn get_by_id(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, RemoteError> {
        let url = self.endpoint.url([collection, id])?;
        let request = self.endpoint.client.get(url);
        self.endpoint
            .call(request, self.endpoint.timeout, |response| async move {
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                read_json(response).await.map(Some)
            })
            .await
    }

    async fn create(&self, collection: &str, fields: Fields) -> Result<Document, RemoteError> {
        let url = self.endpoint.url([collection])?;
        let body = json_body(&FieldsBody { fields: &fields })?;
        let request = self
            .endpoint
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        let doc: Document = self
            .endpoint
            .call(request, self.endpoint.timeout, read_json)
            .await?;
        tracing::info!(collection, id = %doc.id, "Created document");
        Ok(doc)
    }

    async fn update_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<(), RemoteError> {
        let url = self.endpoint.url([collection, id])?;
        let mut fields = Fields::new();
        fields.insert(field.to_string(), value);
        let body = json_body(&FieldsBody { fields: &fields })?;
        let request = self
            .endpoint
            .client
            .patch(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        self.endpoint
            .call(request, self.endpoint.timeout, |response| async move {
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Err(RemoteError::NotFound {
                        collection: collection.to_string(),
                        id: id.to_string(),
                    });
                }
                check_status(&response)
            })
            .await
    }
}

// ============================================================================
// Object Storage
// ============================================================================

/// Media object storage reached over HTTP.
pub struct HttpMediaStorage {
    endpoint: Endpoint,
}

impl HttpMediaStorage {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        Ok(Self {
            endpoint: Endpoint::new(client, base_url, timeout)?,
        })
    }

    pub fn with_token(mut self, token: Option<SecretString>) -> Self {
        self.endpoint.token = token;
        self
    }

    pub fn with_api_key(mut self, api_key: Option<SecretString>) -> Self {
        self.endpoint.api_key = api_key;
        self
    }
}

#[async_trait]
impl MediaStorage for HttpMediaStorage {
    async fn put_file(
        &self,
        path: &str,
        local: &Path,
        progress: Option<ProgressFn>,
    ) -> Result<u64, RemoteError> {
        let segments = object_segments(path)?;
        let url = self.endpoint.url(std::iter::once("o").chain(segments))?;

        let file = tokio::fs::File::open(local).await?;
        let total = file.metadata().await?.len();

        // Stream the file in chunks; progress counts bytes handed to the transport
        let stream = futures::stream::unfold(Some((file, 0u64)), move |state| {
            let progress = progress.clone();
            async move {
                let (mut file, sent) = state?;
                let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
                match file.read(&mut buf).await {
                    Ok(0) => None,
                    Ok(n) => {
                        buf.truncate(n);
                        let sent = sent + n as u64;
                        if let Some(report) = &progress {
                            report(TransferProgress {
                                transferred: sent,
                                total,
                            });
                        }
                        Some((Ok(buf), Some((file, sent))))
                    }
                    Err(e) => Some((Err(e), None)),
                }
            }
        });

        let request = self
            .endpoint
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(stream));
        self.endpoint
            .call(request, UPLOAD_TIMEOUT, |response| async move {
                check_status(&response)
            })
            .await?;

        tracing::info!(path, bytes = total, "Uploaded media object");
        Ok(total)
    }

    async fn download_url(&self, path: &str) -> Result<Url, RemoteError> {
        let segments = object_segments(path)?;
        let url = self.endpoint.url(
            std::iter::once("o")
                .chain(segments)
                .chain(std::iter::once("url")),
        )?;
        let request = self.endpoint.client.get(url);
        let body: DownloadUrl = self
            .endpoint
            .call(request, self.endpoint.timeout, read_json)
            .await?;
        validate_media_url(&body.url).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}
