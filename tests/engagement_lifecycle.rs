//! Integration tests for likes across the SQLite store and the remote collection.
//!
//! Persistence tests use a file database in the temp directory so state
//! survives closing and reopening, which an in-memory database cannot show.

use pretty_assertions::assert_eq;
use reelfeed::engagement::{EngagementCache, EngagementEvent};
use reelfeed::remote::{Document, MemoryContentStore};
use reelfeed::storage::{Database, KeyValueStore, LIKES_KEY};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

const REELS: &str = "videos";

fn temp_db_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("reelfeed_it_{name}"));
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("reelfeed.db")
}

async fn open(path: &PathBuf) -> Arc<Database> {
    Arc::new(Database::open(path.to_str().unwrap()).await.unwrap())
}

fn remote_with(ids: &[&str]) -> Arc<MemoryContentStore> {
    let remote = Arc::new(MemoryContentStore::new());
    for id in ids {
        remote.insert(
            REELS,
            Document {
                id: id.to_string(),
                fields: json!({"video": format!("https://cdn.example.com/{id}.mp4"), "liked": false})
                    .as_object()
                    .cloned()
                    .unwrap(),
            },
        );
    }
    remote
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_likes_survive_restart() {
    let path = temp_db_path("likes_restart");
    let remote = remote_with(&["r1", "r2", "r3"]);

    {
        let db = open(&path).await;
        let (mut cache, _events) = EngagementCache::new(db.clone(), remote.clone(), REELS);
        cache.load().await;
        cache.toggle_like("r1").await;
        cache.toggle_like("r3").await;
        cache.toggle_like("r3").await;
        cache.toggle_local_like("p7").await;
        cache.flush().await;
        db.close().await;
    }

    let db = open(&path).await;
    let (mut cache, _events) = EngagementCache::new(db, remote, REELS);
    assert_eq!(cache.load().await, 2);
    assert_eq!(cache.liked_ids(), vec!["p7", "r1"]);
    assert!(!cache.is_liked("r2"));
    assert!(!cache.is_liked("r3"));

    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}

#[tokio::test]
async fn test_corrupt_row_loads_empty_and_is_overwritten() {
    let db = Arc::new(Database::open(":memory:").await.unwrap());
    db.set(LIKES_KEY, "[1, 2, 3]").await.unwrap();

    let (mut cache, _events) = EngagementCache::new(db.clone(), remote_with(&["r1"]), REELS);
    assert_eq!(cache.load().await, 0);

    cache.toggle_like("r1").await;
    let raw = db.get(LIKES_KEY).await.unwrap().unwrap();
    assert_eq!(raw, r#"{"r1":true}"#);
}

// ============================================================================
// Remote mirroring
// ============================================================================

#[tokio::test]
async fn test_remote_reflects_final_state_after_many_toggles() {
    let db = Arc::new(Database::open(":memory:").await.unwrap());
    let remote = remote_with(&["a", "b"]);
    let (mut cache, mut events) = EngagementCache::new(db, remote.clone(), REELS);

    for _ in 0..5 {
        cache.toggle_like("a").await;
    }
    for _ in 0..4 {
        cache.toggle_like("b").await;
    }

    let mut settled = 0;
    while settled < 9 {
        let event = events.recv().await.unwrap();
        assert!(matches!(event, EngagementEvent::Mirrored { .. }));
        cache.on_mirror_settled(&event);
        settled += 1;
    }

    assert_eq!(remote.field(REELS, "a", "liked"), Some(json!(true)));
    assert_eq!(remote.field(REELS, "b", "liked"), Some(json!(false)));
    assert!(cache.is_liked("a"));
    assert!(!cache.is_liked("b"));
    assert!(!cache.has_pending_write("a"));
}

#[tokio::test]
async fn test_failed_mirror_is_not_retried() {
    let db = Arc::new(Database::open(":memory:").await.unwrap());
    let remote = remote_with(&["a"]);
    remote.set_fail_updates(true);
    let (mut cache, mut events) = EngagementCache::new(db, remote.clone(), REELS);

    cache.toggle_like("a").await;
    let event = events.recv().await.unwrap();
    cache.on_mirror_settled(&event);
    assert!(matches!(event, EngagementEvent::MirrorFailed { .. }));

    remote.set_fail_updates(false);
    cache.flush().await;
    assert!(remote.updates().is_empty());
    assert!(cache.is_liked("a"));
}

#[tokio::test]
async fn test_reconcile_after_remote_change() {
    let db = Arc::new(Database::open(":memory:").await.unwrap());
    let remote = remote_with(&["a"]);
    let (mut cache, mut events) = EngagementCache::new(db.clone(), remote, REELS);

    cache.toggle_like("a").await;
    let event = events.recv().await.unwrap();
    cache.on_mirror_settled(&event);

    // another device unliked it
    let checkpoint = cache.checkpoint();
    assert_eq!(cache.reconcile(checkpoint, [("a", false)]).await, 1);
    assert!(!cache.is_liked("a"));

    let (mut reloaded, _events) = EngagementCache::new(db, remote_with(&[]), REELS);
    reloaded.load().await;
    assert!(!reloaded.is_liked("a"));
}
