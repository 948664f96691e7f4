//! In-process backends for tests and offline runs.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use url::Url;

use super::{
    Document, Fields, MediaStorage, ProgressFn, RemoteContentStore, RemoteError, TransferProgress,
};

/// One `update_field` call as seen by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub collection: String,
    pub id: String,
    pub field: String,
    pub value: Value,
}

#[derive(Default)]
struct ContentState {
    collections: HashMap<String, Vec<Document>>,
    updates: Vec<FieldUpdate>,
    next_id: u64,
    fail_lists: bool,
    fail_creates: bool,
    fail_updates: bool,
}

/// Document store held in memory. Collections keep insertion order.
#[derive(Default)]
pub struct MemoryContentStore {
    state: Mutex<ContentState>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ContentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a document as-is, replacing one with the same id.
    pub fn insert(&self, collection: &str, doc: Document) {
        let mut state = self.state();
        let docs = state.collections.entry(collection.to_string()).or_default();
        match docs.iter_mut().find(|d| d.id == doc.id) {
            Some(existing) => *existing = doc,
            None => docs.push(doc),
        }
    }

    /// Deletes a document. Returns whether it existed.
    pub fn remove(&self, collection: &str, id: &str) -> bool {
        let mut state = self.state();
        let Some(docs) = state.collections.get_mut(collection) else {
            return false;
        };
        let before = docs.len();
        docs.retain(|d| d.id != id);
        docs.len() != before
    }

    /// Current value of one field, if the document exists.
    pub fn field(&self, collection: &str, id: &str, field: &str) -> Option<Value> {
        let state = self.state();
        state
            .collections
            .get(collection)?
            .iter()
            .find(|d| d.id == id)?
            .fields
            .get(field)
            .cloned()
    }

    /// Every `update_field` call that succeeded, in arrival order.
    pub fn updates(&self) -> Vec<FieldUpdate> {
        self.state().updates.clone()
    }

    pub fn document_count(&self, collection: &str) -> usize {
        self.state()
            .collections
            .get(collection)
            .map_or(0, Vec::len)
    }

    pub fn set_fail_lists(&self, fail: bool) {
        self.state().fail_lists = fail;
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.state().fail_creates = fail;
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.state().fail_updates = fail;
    }
}

#[async_trait]
impl RemoteContentStore for MemoryContentStore {
    async fn list_all(&self, collection: &str) -> Result<Vec<Document>, RemoteError> {
        let state = self.state();
        if state.fail_lists {
            return Err(RemoteError::Unavailable(format!("list {collection}")));
        }
        Ok(state.collections.get(collection).cloned().unwrap_or_default())
    }

    async fn get_by_id(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, RemoteError> {
        let state = self.state();
        if state.fail_lists {
            return Err(RemoteError::Unavailable(format!("get {collection}/{id}")));
        }
        Ok(state
            .collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id))
            .cloned())
    }

    async fn create(&self, collection: &str, fields: Fields) -> Result<Document, RemoteError> {
        let mut state = self.state();
        if state.fail_creates {
            return Err(RemoteError::Unavailable(format!("create in {collection}")));
        }
        state.next_id += 1;
        let doc = Document {
            id: format!("doc-{}", state.next_id),
            fields,
        };
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(doc.clone());
        Ok(doc)
    }

    async fn update_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        if state.fail_updates {
            return Err(RemoteError::Unavailable(format!("update {collection}/{id}")));
        }
        let doc = state
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
            .ok_or_else(|| RemoteError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        doc.fields.insert(field.to_string(), value.clone());
        state.updates.push(FieldUpdate {
            collection: collection.to_string(),
            id: id.to_string(),
            field: field.to_string(),
            value,
        });
        Ok(())
    }
}

#[derive(Default)]
struct MediaState {
    objects: HashMap<String, u64>,
    fail_transfers: bool,
    fail_urls: bool,
}

/// Object storage held in memory; only object sizes are kept.
#[derive(Default)]
pub struct MemoryMediaStorage {
    state: Mutex<MediaState>,
}

impl MemoryMediaStorage {
    /// Host used for resolved download URLs.
    pub const URL_BASE: &'static str = "https://media.invalid/";

    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MediaState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.state().objects.contains_key(path)
    }

    pub fn set_fail_transfers(&self, fail: bool) {
        self.state().fail_transfers = fail;
    }

    pub fn set_fail_urls(&self, fail: bool) {
        self.state().fail_urls = fail;
    }
}

#[async_trait]
impl MediaStorage for MemoryMediaStorage {
    async fn put_file(
        &self,
        path: &str,
        local: &Path,
        progress: Option<ProgressFn>,
    ) -> Result<u64, RemoteError> {
        if self.state().fail_transfers {
            return Err(RemoteError::Unavailable(format!("put {path}")));
        }
        if path.is_empty() || path.ends_with('/') {
            return Err(RemoteError::InvalidPath(path.to_string()));
        }

        let bytes = tokio::fs::read(local).await?;
        let total = bytes.len() as u64;
        if let Some(report) = progress {
            report(TransferProgress {
                transferred: total,
                total,
            });
        }
        self.state().objects.insert(path.to_string(), total);
        Ok(total)
    }

    async fn download_url(&self, path: &str) -> Result<Url, RemoteError> {
        let state = self.state();
        if state.fail_urls {
            return Err(RemoteError::Unavailable(format!("url {path}")));
        }
        if !state.objects.contains_key(path) {
            return Err(RemoteError::InvalidPath(path.to_string()));
        }
        Url::parse(Self::URL_BASE)
            .and_then(|base| base.join(path))
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}
