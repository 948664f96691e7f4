//! The signed-in user's profile document and avatar.
//!
//! Profiles live in the users collection keyed by uid. Changing the avatar
//! uploads the image to `profile_images/<uid>/<file name>` and writes its
//! download URL into the `profileImage` field of that document.

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use url::Url;

use crate::remote::{Document, MediaStorage, RemoteContentStore, RemoteError};
use crate::upload::{log_orphan, store_media, LocalMediaHandle, UploadError, UploadProgress, UploadStage};

/// Document field holding the avatar URL.
pub const PROFILE_IMAGE_FIELD: &str = "profileImage";
/// Object-storage folder for avatars; one subfolder per uid.
pub const PROFILE_IMAGE_PREFIX: &str = "profile_images";

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("No user id configured")]
    NoUser,
    #[error("Invalid user id: {0:?}")]
    InvalidUser(String),
    #[error("Failed to load profile: {0}")]
    Load(#[source] RemoteError),
    #[error(transparent)]
    Upload(#[from] UploadError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    /// `None` when unset or not a usable URL
    pub profile_image: Option<Url>,
}

impl UserProfile {
    fn from_document(doc: Document) -> Self {
        let text = |name: &str| {
            doc.fields
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        };
        let profile_image = text(PROFILE_IMAGE_FIELD).and_then(|raw| match Url::parse(&raw) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::debug!(uid = %doc.id, error = %e, "Ignoring unparseable profile image URL");
                None
            }
        });
        Self {
            display_name: text("displayName"),
            email: text("email"),
            profile_image,
            uid: doc.id,
        }
    }

    /// Display name, or "Anonymous".
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or("Anonymous")
    }
}

/// A uid must be usable as one path segment.
fn check_uid(uid: &str) -> Result<(), ProfileError> {
    if uid.trim().is_empty() || uid.contains('/') || uid == "." || uid == ".." {
        return Err(ProfileError::InvalidUser(uid.to_string()));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ProfileService {
    collection: String,
    remote: Arc<dyn RemoteContentStore>,
    media: Arc<dyn MediaStorage>,
}

impl ProfileService {
    pub fn new(
        collection: impl Into<String>,
        remote: Arc<dyn RemoteContentStore>,
        media: Arc<dyn MediaStorage>,
    ) -> Self {
        Self {
            collection: collection.into(),
            remote,
            media,
        }
    }

    /// Fetches the profile of `uid`. `Ok(None)` if the user has no document.
    pub async fn load(&self, uid: &str) -> Result<Option<UserProfile>, ProfileError> {
        check_uid(uid)?;
        let doc = self
            .remote
            .get_by_id(&self.collection, uid)
            .await
            .map_err(ProfileError::Load)?;
        if doc.is_none() {
            tracing::info!(uid, "No profile document");
        }
        Ok(doc.map(UserProfile::from_document))
    }

    /// Uploads a new avatar for `uid` and records its URL on the profile.
    ///
    /// Like reel uploads nothing is rolled back: a failed document update
    /// leaves the stored image behind.
    pub async fn upload_image(
        &self,
        uid: &str,
        handle: &LocalMediaHandle,
        progress: Option<watch::Sender<UploadProgress>>,
    ) -> Result<Url, ProfileError> {
        check_uid(uid)?;
        let progress = progress.map(Arc::new);
        let object_path = handle
            .object_path(&format!("{PROFILE_IMAGE_PREFIX}/{uid}"))
            .ok_or_else(|| RemoteError::InvalidPath(handle.path.display().to_string()))
            .map_err(UploadError::at(UploadStage::Transfer))?;

        let url = store_media(
            self.media.as_ref(),
            handle,
            &object_path,
            progress.as_ref(),
            UploadStage::UpdateDocument,
        )
        .await?;

        if let Err(e) = self
            .remote
            .update_field(
                &self.collection,
                uid,
                PROFILE_IMAGE_FIELD,
                Value::from(url.as_str()),
            )
            .await
        {
            log_orphan(&object_path, UploadStage::UpdateDocument, &e);
            return Err(UploadError::at(UploadStage::UpdateDocument)(e).into());
        }

        tracing::info!(uid, url = %url, "Profile image updated");
        Ok(url)
    }
}
