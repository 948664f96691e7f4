//! Media upload: local file → object storage → download URL → new document.
//!
//! The three steps run in order and stop at the first failure. Nothing is
//! rolled back: if the document cannot be created the stored object stays
//! behind, which is logged as an orphaned object.
//!
//! Uploads only ever create reels; the posts collection is read-only here.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use url::Url;

use crate::remote::{
    new_reel_fields, ContentItem, ContentKind, MediaStorage, ProgressFn, RemoteContentStore,
    RemoteError, TransferProgress,
};

/// Object-storage folder for reel videos.
pub const REEL_OBJECT_PREFIX: &str = "videos";

/// Step of the upload pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Transfer,
    ResolveUrl,
    CreateDocument,
    /// Writing the URL into an existing document (profile images)
    UpdateDocument,
}

impl std::fmt::Display for UploadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            UploadStage::Transfer => "transfer",
            UploadStage::ResolveUrl => "resolve-url",
            UploadStage::CreateDocument => "create-document",
            UploadStage::UpdateDocument => "update-document",
        })
    }
}

#[derive(Debug, Error)]
#[error("Upload failed at {stage} stage: {cause}")]
pub struct UploadError {
    pub stage: UploadStage,
    #[source]
    pub cause: RemoteError,
}

impl UploadError {
    pub(crate) fn at(stage: UploadStage) -> impl FnOnce(RemoteError) -> Self {
        move |cause| Self { stage, cause }
    }
}

/// Last reported position of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub stage: UploadStage,
    pub transferred: u64,
    pub total: u64,
}

impl Default for UploadProgress {
    fn default() -> Self {
        Self {
            stage: UploadStage::Transfer,
            transferred: 0,
            total: 0,
        }
    }
}

/// A media file picked on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMediaHandle {
    pub path: PathBuf,
}

impl LocalMediaHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
    }

    /// Storage path `<prefix>/<file name>`.
    pub fn object_path(&self, prefix: &str) -> Option<String> {
        self.file_name().map(|name| format!("{prefix}/{name}"))
    }
}

/// Streams `handle` to `object_path` and resolves its public URL.
///
/// Shared by reel uploads and profile images. On success the progress
/// watch is left at `next_stage`.
pub(crate) async fn store_media(
    media: &dyn MediaStorage,
    handle: &LocalMediaHandle,
    object_path: &str,
    progress: Option<&Arc<watch::Sender<UploadProgress>>>,
    next_stage: UploadStage,
) -> Result<Url, UploadError> {
    let on_transfer: Option<ProgressFn> = progress.cloned().map(|tx| {
        Arc::new(move |p: TransferProgress| {
            tx.send_replace(UploadProgress {
                stage: UploadStage::Transfer,
                transferred: p.transferred,
                total: p.total,
            });
        }) as ProgressFn
    });

    tracing::info!(path = %handle.path.display(), object = %object_path, "Uploading media");
    let bytes = media
        .put_file(object_path, &handle.path, on_transfer)
        .await
        .map_err(UploadError::at(UploadStage::Transfer))?;

    let report = |stage| {
        if let Some(tx) = progress {
            tx.send_replace(UploadProgress {
                stage,
                transferred: bytes,
                total: bytes,
            });
        }
    };

    report(UploadStage::ResolveUrl);
    let url = match media.download_url(object_path).await {
        Ok(url) => url,
        Err(e) => {
            log_orphan(object_path, UploadStage::ResolveUrl, &e);
            return Err(UploadError::at(UploadStage::ResolveUrl)(e));
        }
    };
    report(next_stage);
    Ok(url)
}

/// Uploads reel videos and creates their documents.
#[derive(Clone)]
pub struct UploadPipeline {
    collection: String,
    author_name: String,
    remote: Arc<dyn RemoteContentStore>,
    media: Arc<dyn MediaStorage>,
}

impl UploadPipeline {
    pub fn new(
        collection: impl Into<String>,
        author_name: impl Into<String>,
        remote: Arc<dyn RemoteContentStore>,
        media: Arc<dyn MediaStorage>,
    ) -> Self {
        Self {
            collection: collection.into(),
            author_name: author_name.into(),
            remote,
            media,
        }
    }

    /// Runs transfer, resolve-url and create-document.
    ///
    /// Progress, if requested, is published on `progress` as the transfer
    /// advances and whenever the stage changes.
    pub async fn upload(
        &self,
        handle: &LocalMediaHandle,
        progress: Option<watch::Sender<UploadProgress>>,
    ) -> Result<ContentItem, UploadError> {
        let progress = progress.map(Arc::new);

        let object_path = handle
            .object_path(REEL_OBJECT_PREFIX)
            .ok_or_else(|| RemoteError::InvalidPath(handle.path.display().to_string()))
            .map_err(UploadError::at(UploadStage::Transfer))?;

        let url = store_media(
            self.media.as_ref(),
            handle,
            &object_path,
            progress.as_ref(),
            UploadStage::CreateDocument,
        )
        .await?;

        let fields = new_reel_fields(url.as_str(), &self.author_name, Utc::now());
        let doc = match self.remote.create(&self.collection, fields).await {
            Ok(doc) => doc,
            Err(e) => {
                log_orphan(&object_path, UploadStage::CreateDocument, &e);
                return Err(UploadError::at(UploadStage::CreateDocument)(e));
            }
        };

        let doc_id = doc.id.clone();
        let item = ContentItem::from_document(ContentKind::Reel, doc).map_err(|reason| {
            tracing::warn!(
                collection = %self.collection,
                doc_id = %doc_id,
                object = %object_path,
                reason = %reason,
                "Created document is unreadable, it stays in the collection"
            );
            UploadError::at(UploadStage::CreateDocument)(RemoteError::Decode(format!(
                "created document {doc_id}: {reason}"
            )))
        })?;
        tracing::info!(item_id = %item.id, "Upload complete");
        Ok(item)
    }

    /// Runs [`upload`](Self::upload) on a background task.
    pub fn spawn(&self, handle: LocalMediaHandle) -> UploadTask {
        let (tx, rx) = watch::channel(UploadProgress::default());
        let pipeline = self.clone();
        let join = tokio::spawn(async move { pipeline.upload(&handle, Some(tx)).await });
        UploadTask {
            progress: rx,
            handle: Some(join),
        }
    }
}

pub(crate) fn log_orphan(object_path: &str, stage: UploadStage, error: &RemoteError) {
    tracing::warn!(
        object = object_path,
        %stage,
        error = %error,
        "Upload failed after transfer, orphaned object left in storage"
    );
}

/// A running upload. Dropping it cancels the upload.
pub struct UploadTask {
    progress: watch::Receiver<UploadProgress>,
    handle: Option<JoinHandle<Result<ContentItem, UploadError>>>,
}

impl UploadTask {
    pub fn progress(&self) -> watch::Receiver<UploadProgress> {
        self.progress.clone()
    }

    pub fn cancel(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }

    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.handle.as_ref().map(JoinHandle::abort_handle)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the upload. A cancelled upload fails at the stage it had reached.
    pub async fn join(mut self) -> Result<ContentItem, UploadError> {
        let stage = || self.progress.borrow().stage;
        let Some(handle) = self.handle.take() else {
            return Err(UploadError {
                stage: stage(),
                cause: RemoteError::Cancelled,
            });
        };
        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(UploadError {
                stage: stage(),
                cause: RemoteError::Cancelled,
            }),
            Err(e) => {
                tracing::error!(error = %e, "Upload task panicked");
                Err(UploadError {
                    stage: stage(),
                    cause: RemoteError::Unavailable(format!("upload task failed: {e}")),
                })
            }
        }
    }
}

impl Drop for UploadTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
