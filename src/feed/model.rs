use std::sync::Arc;

use crate::engagement::EngagementCache;
use crate::remote::{ContentItem, ContentKind, FetchError, RemoteContentStore};
use crate::util::MAX_SEARCH_QUERY_LENGTH;

/// An item paired with the viewer's like flag.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoratedItem {
    pub item: ContentItem,
    pub liked: bool,
}

/// Pairs `item` with its like flag. Never fails; unknown ids are not liked.
pub fn decorate(item: &ContentItem, cache: &EngagementCache) -> DecoratedItem {
    DecoratedItem {
        liked: cache.is_liked(&item.id),
        item: item.clone(),
    }
}

/// Result of handing a finished fetch back to the model.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// Items replaced
    Applied { count: usize },
    /// A newer refresh was issued after this one; result dropped
    Stale { generation: u64, latest: u64 },
    /// Fetch failed; previous items kept
    Failed(FetchError),
}

/// A refresh in flight. Carries everything the fetch needs so it can run on
/// a background task while the model stays on the event loop.
pub struct RefreshTicket {
    generation: u64,
    kind: ContentKind,
    collection: String,
    remote: Arc<dyn RemoteContentStore>,
}

impl RefreshTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Lists the collection and converts documents to items.
    pub async fn fetch(self) -> Result<Vec<ContentItem>, FetchError> {
        fetch_items(self.remote.as_ref(), self.kind, &self.collection).await
    }
}

/// Lists `collection`, skipping documents that do not describe a `kind` item.
pub async fn fetch_items(
    remote: &dyn RemoteContentStore,
    kind: ContentKind,
    collection: &str,
) -> Result<Vec<ContentItem>, FetchError> {
    let docs = remote
        .list_all(collection)
        .await
        .map_err(|source| FetchError {
            collection: collection.to_string(),
            source,
        })?;

    let mut items = Vec::with_capacity(docs.len());
    for doc in docs {
        let id = doc.id.clone();
        match ContentItem::from_document(kind, doc) {
            Ok(item) => items.push(item),
            Err(reason) => {
                tracing::warn!(collection, doc_id = %id, reason = %reason, "Skipping malformed document");
            }
        }
    }
    Ok(items)
}

/// Ordered items of one collection, in the store's natural order.
pub struct FeedModel {
    kind: ContentKind,
    collection: String,
    remote: Arc<dyn RemoteContentStore>,
    items: Arc<Vec<ContentItem>>,
    /// Bumped by every `begin_refresh`; only the latest result is applied
    refresh_generation: u64,
}

impl FeedModel {
    pub fn new(
        kind: ContentKind,
        collection: impl Into<String>,
        remote: Arc<dyn RemoteContentStore>,
    ) -> Self {
        Self {
            kind,
            collection: collection.into(),
            remote,
            items: Arc::new(Vec::new()),
            refresh_generation: 0,
        }
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Fetches the whole collection and replaces the list.
    ///
    /// On error the previous items stay in place.
    pub async fn refresh(&mut self) -> Result<&[ContentItem], FetchError> {
        let ticket = self.begin_refresh();
        let generation = ticket.generation();
        let result = ticket.fetch().await;
        match self.complete_refresh(generation, result) {
            RefreshOutcome::Failed(e) => Err(e),
            RefreshOutcome::Applied { .. } | RefreshOutcome::Stale { .. } => Ok(self.items.as_slice()),
        }
    }

    /// Issues a new refresh generation, superseding any refresh in flight.
    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.refresh_generation += 1;
        tracing::debug!(
            collection = %self.collection,
            generation = self.refresh_generation,
            "Starting refresh"
        );
        RefreshTicket {
            generation: self.refresh_generation,
            kind: self.kind,
            collection: self.collection.clone(),
            remote: Arc::clone(&self.remote),
        }
    }

    /// Applies a finished fetch if it belongs to the latest generation.
    pub fn complete_refresh(
        &mut self,
        generation: u64,
        result: Result<Vec<ContentItem>, FetchError>,
    ) -> RefreshOutcome {
        if generation != self.refresh_generation {
            tracing::debug!(
                collection = %self.collection,
                generation,
                latest = self.refresh_generation,
                "Discarding stale refresh result"
            );
            return RefreshOutcome::Stale {
                generation,
                latest: self.refresh_generation,
            };
        }

        match result {
            Ok(items) => {
                let count = items.len();
                self.items = Arc::new(items);
                tracing::info!(collection = %self.collection, count, "Feed refreshed");
                RefreshOutcome::Applied { count }
            }
            Err(e) => {
                tracing::warn!(
                    collection = %self.collection,
                    error = %e,
                    kept = self.items.len(),
                    "Refresh failed, keeping previous items"
                );
                RefreshOutcome::Failed(e)
            }
        }
    }

    /// Adds a freshly uploaded item at the end. An id already present is ignored.
    ///
    /// Returns whether the item was added.
    pub fn append(&mut self, item: ContentItem) -> bool {
        if self.items.iter().any(|existing| existing.id == item.id) {
            tracing::debug!(item_id = %item.id, "Item already in feed, not appending");
            return false;
        }
        Arc::make_mut(&mut self.items).push(item);
        true
    }

    pub fn items(&self) -> &[ContentItem] {
        &self.items
    }

    /// Shared handle to the current list; later refreshes do not affect it.
    pub fn snapshot(&self) -> Arc<Vec<ContentItem>> {
        Arc::clone(&self.items)
    }

    pub fn get(&self, id: &str) -> Option<&ContentItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn decorated(&self, cache: &EngagementCache) -> Vec<DecoratedItem> {
        self.items.iter().map(|item| decorate(item, cache)).collect()
    }

    /// `(id, liked)` for items whose document carries a remote like flag.
    pub fn remote_like_states(&self) -> Vec<(&str, bool)> {
        self.items
            .iter()
            .filter_map(|item| item.remote_liked.map(|liked| (item.id.as_str(), liked)))
            .collect()
    }

    /// Case-insensitive substring match over author and description.
    ///
    /// An empty query matches everything; overlong queries match nothing.
    pub fn search(&self, query: &str) -> Vec<&ContentItem> {
        if query.chars().count() > MAX_SEARCH_QUERY_LENGTH {
            tracing::warn!(len = query.len(), "Search query too long, ignoring");
            return Vec::new();
        }
        let needle = query.trim().to_lowercase();
        self.items
            .iter()
            .filter(|item| {
                needle.is_empty()
                    || item.author_name.to_lowercase().contains(&needle)
                    || item.description.to_lowercase().contains(&needle)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{Document, MemoryContentStore};
    use crate::storage::MemoryKeyValueStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const REELS: &str = "videos";

    fn reel_doc(id: &str, user: &str, description: &str) -> Document {
        Document {
            id: id.to_string(),
            fields: json!({
                "video": format!("https://cdn.example.com/{id}.mp4"),
                "user": user,
                "description": description,
                "liked": false
            })
            .as_object()
            .cloned()
            .unwrap(),
        }
    }

    fn seeded(docs: &[(&str, &str, &str)]) -> Arc<MemoryContentStore> {
        let remote = Arc::new(MemoryContentStore::new());
        for (id, user, description) in docs {
            remote.insert(REELS, reel_doc(id, user, description));
        }
        remote
    }

    fn item(id: &str) -> ContentItem {
        ContentItem::from_document(ContentKind::Reel, reel_doc(id, "me", "")).unwrap()
    }

    #[tokio::test]
    async fn test_refresh_keeps_store_order() {
        let remote = seeded(&[("c", "u", ""), ("a", "u", ""), ("b", "u", "")]);
        let mut feed = FeedModel::new(ContentKind::Reel, REELS, remote);

        let items = feed.refresh().await.unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(feed.ids(), vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_refresh_skips_malformed_documents() {
        let remote = seeded(&[("a", "u", "")]);
        remote.insert(
            REELS,
            Document {
                id: "broken".into(),
                fields: json!({"imageUrl": "https://x.example.com/p.jpg"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            },
        );
        let mut feed = FeedModel::new(ContentKind::Reel, REELS, remote);
        feed.refresh().await.unwrap();
        assert_eq!(feed.ids(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_fetch_error_keeps_previous_items() {
        let remote = seeded(&[("a", "u", ""), ("b", "u", "")]);
        let mut feed = FeedModel::new(ContentKind::Reel, REELS, remote.clone());
        feed.refresh().await.unwrap();

        remote.set_fail_lists(true);
        let err = feed.refresh().await.unwrap_err();
        assert_eq!(err.collection, REELS);
        assert_eq!(feed.ids(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_stale_refresh_is_discarded() {
        let remote = seeded(&[("old", "u", "")]);
        let mut feed = FeedModel::new(ContentKind::Reel, REELS, remote.clone());

        let first = feed.begin_refresh();
        let first_generation = first.generation();
        let first_result = first.fetch().await;

        remote.insert(REELS, reel_doc("new", "u", ""));
        let second = feed.begin_refresh();
        let second_generation = second.generation();
        let second_result = second.fetch().await;

        // the newer refresh lands first; the older one must not overwrite it
        assert!(matches!(
            feed.complete_refresh(second_generation, second_result),
            RefreshOutcome::Applied { count: 2 }
        ));
        assert!(matches!(
            feed.complete_refresh(first_generation, first_result),
            RefreshOutcome::Stale { latest, .. } if latest == second_generation
        ));
        assert_eq!(feed.ids(), vec!["old", "new"]);
    }

    #[test]
    fn test_append_ignores_duplicates() {
        let mut feed = FeedModel::new(ContentKind::Reel, REELS, Arc::new(MemoryContentStore::new()));
        assert!(feed.append(item("x")));
        assert!(!feed.append(item("x")));
        assert_eq!(feed.len(), 1);
        assert_eq!(feed.position("x"), Some(0));
    }

    #[test]
    fn test_snapshot_is_unaffected_by_append() {
        let mut feed = FeedModel::new(ContentKind::Reel, REELS, Arc::new(MemoryContentStore::new()));
        feed.append(item("x"));
        let snapshot = feed.snapshot();
        feed.append(item("y"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(feed.len(), 2);
    }

    #[tokio::test]
    async fn test_decorate_reflects_cache() {
        let remote = seeded(&[("a", "u", ""), ("b", "u", "")]);
        let (mut cache, _rx) =
            EngagementCache::new(Arc::new(MemoryKeyValueStore::new()), remote.clone(), REELS);
        let mut feed = FeedModel::new(ContentKind::Reel, REELS, remote);
        feed.refresh().await.unwrap();

        cache.toggle_like("b").await;
        let flags: Vec<(String, bool)> = feed
            .decorated(&cache)
            .into_iter()
            .map(|d| (d.item.id, d.liked))
            .collect();
        assert_eq!(flags, vec![("a".to_string(), false), ("b".to_string(), true)]);

        // appended items start out not liked
        feed.append(item("fresh"));
        let fresh = decorate(feed.get("fresh").unwrap(), &cache);
        assert!(!fresh.liked);
    }

    #[tokio::test]
    async fn test_search_matches_author_and_description() {
        let remote = seeded(&[
            ("a", "Mohit", "Sunset at the beach"),
            ("b", "vinay", "city lights"),
            ("c", "anya", "BEACH volleyball"),
        ]);
        let mut feed = FeedModel::new(ContentKind::Reel, REELS, remote);
        feed.refresh().await.unwrap();

        let ids = |q: &str| -> Vec<String> { feed.search(q).iter().map(|i| i.id.clone()).collect() };
        assert_eq!(ids("beach"), vec!["a", "c"]);
        assert_eq!(ids("mohit"), vec!["a"]);
        assert_eq!(ids(""), vec!["a", "b", "c"]);
        assert!(ids("nothing here").is_empty());
        assert!(ids(&"a".repeat(MAX_SEARCH_QUERY_LENGTH + 1)).is_empty());
    }

    #[tokio::test]
    async fn test_remote_like_states() {
        let remote = seeded(&[("a", "u", "")]);
        let mut feed = FeedModel::new(ContentKind::Reel, REELS, remote);
        feed.refresh().await.unwrap();
        assert_eq!(feed.remote_like_states(), vec![("a", false)]);
    }
}
