//! Canonical "liked" state per content item.
//!
//! Three copies exist: the in-memory map held here (authoritative for the
//! session), the persisted map under the `"likes"` key, and the `liked` field
//! of reel documents in the remote store. Toggles update memory, then the
//! persisted copy, then queue a remote write without waiting for it.

mod mirror;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use mirror::EngagementEvent;
use mirror::MirrorQueue;

use crate::remote::RemoteContentStore;
use crate::storage::{KeyValueStore, PersistenceError, LIKES_KEY};

pub struct EngagementCache {
    store: Arc<dyn KeyValueStore>,
    /// Every item the user has toggled; missing means not liked
    records: BTreeMap<String, bool>,
    /// Mirror writes queued but not yet settled, per item
    pending: HashMap<String, usize>,
    /// Bumped on every toggle
    toggle_seq: u64,
    /// Sequence number of each item's latest toggle
    last_toggled: HashMap<String, u64>,
    mirror: MirrorQueue,
}

impl EngagementCache {
    /// Creates an empty cache and starts the mirror worker for `collection`.
    ///
    /// The returned receiver yields one [`EngagementEvent`] per mirrored write;
    /// feed each back through [`EngagementCache::on_mirror_settled`].
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteContentStore>,
        collection: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<EngagementEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mirror = MirrorQueue::spawn(remote, collection.into(), events_tx);
        let cache = Self {
            store,
            records: BTreeMap::new(),
            pending: HashMap::new(),
            toggle_seq: 0,
            last_toggled: HashMap::new(),
            mirror,
        };
        (cache, events_rx)
    }

    /// Replaces in-memory state with the persisted records.
    ///
    /// Unreadable or corrupt storage yields an empty set. Returns the number
    /// of liked items loaded.
    pub async fn load(&mut self) -> usize {
        self.records = match self.read_persisted().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load persisted likes, starting empty");
                BTreeMap::new()
            }
        };
        let liked = self.records.values().filter(|liked| **liked).count();
        tracing::debug!(records = self.records.len(), liked, "Loaded likes");
        liked
    }

    async fn read_persisted(&self) -> Result<BTreeMap<String, bool>, PersistenceError> {
        let Some(raw) = self.store.get(LIKES_KEY).await? else {
            return Ok(BTreeMap::new());
        };
        serde_json::from_str(&raw).map_err(|source| PersistenceError::Corrupt {
            key: LIKES_KEY.to_string(),
            source,
        })
    }

    async fn persist(&self) {
        let result = match serde_json::to_string(&self.records) {
            Ok(json) => self.store.set(LIKES_KEY, &json).await,
            Err(source) => Err(PersistenceError::Corrupt {
                key: LIKES_KEY.to_string(),
                source,
            }),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to persist likes");
        }
    }

    pub fn is_liked(&self, item_id: &str) -> bool {
        self.records.get(item_id).copied().unwrap_or(false)
    }

    /// Flips the flag, persists it, and queues the remote write.
    ///
    /// Returns the new value immediately; the remote result arrives later as
    /// an [`EngagementEvent`].
    pub async fn toggle_like(&mut self, item_id: &str) -> bool {
        let liked = self.flip(item_id);
        self.persist().await;

        if self.mirror.enqueue(item_id, liked) {
            *self.pending.entry(item_id.to_string()).or_insert(0) += 1;
        } else {
            tracing::warn!(item_id, "Like mirror worker is gone, remote not updated");
        }
        liked
    }

    /// Flips and persists without touching the remote store (photo posts).
    pub async fn toggle_local_like(&mut self, item_id: &str) -> bool {
        let liked = self.flip(item_id);
        self.persist().await;
        liked
    }

    fn flip(&mut self, item_id: &str) -> bool {
        let liked = !self.is_liked(item_id);
        self.records.insert(item_id.to_string(), liked);
        self.toggle_seq += 1;
        self.last_toggled.insert(item_id.to_string(), self.toggle_seq);
        tracing::debug!(item_id, liked, "Toggled like");
        liked
    }

    /// Settles one queued write.
    pub fn on_mirror_settled(&mut self, event: &EngagementEvent) {
        let id = event.item_id();
        if let Some(count) = self.pending.get_mut(id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.pending.remove(id);
            }
        }
    }

    pub fn has_pending_write(&self, item_id: &str) -> bool {
        self.pending.contains_key(item_id)
    }

    /// Marks the current toggle position. Take one before a refresh fetch
    /// starts and hand it to [`reconcile`](Self::reconcile).
    pub fn checkpoint(&self) -> u64 {
        self.toggle_seq
    }

    fn toggled_since(&self, item_id: &str, checkpoint: u64) -> bool {
        self.last_toggled
            .get(item_id)
            .is_some_and(|seq| *seq > checkpoint)
    }

    /// Adopts remote flags reported by a refresh whose fetch started at
    /// `checkpoint`.
    ///
    /// Items toggled after the checkpoint, or with a write still in flight,
    /// keep their local value: the snapshot cannot have seen those toggles.
    /// Returns how many records changed; changes are persisted.
    pub async fn reconcile<'a, I>(&mut self, checkpoint: u64, remote_states: I) -> usize
    where
        I: IntoIterator<Item = (&'a str, bool)>,
    {
        let mut changed = 0;
        for (id, remote_liked) in remote_states {
            if self.pending.contains_key(id)
                || self.toggled_since(id, checkpoint)
                || self.is_liked(id) == remote_liked
            {
                continue;
            }
            self.records.insert(id.to_string(), remote_liked);
            changed += 1;
        }

        if changed > 0 {
            tracing::info!(changed, "Adopted remote like state");
            self.persist().await;
        }
        changed
    }

    /// Ids currently liked, sorted.
    pub fn liked_ids(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|(_, liked)| **liked)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Stops accepting writes and waits for queued ones to reach the remote.
    pub async fn flush(&mut self) {
        self.mirror.drain().await;
    }
}
