//! Session-level state and the event loop plumbing.
//!
//! `App` owns every core component and is mutated only by the task that
//! drives it. Background work (feed refreshes, uploads, like mirroring)
//! and coalesced scroll offsets report back through [`AppEvent`]s, which
//! the owner feeds to [`App::handle_event`] one at a time.

use secrecy::SecretString;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use crate::config::Config;
use crate::engagement::{EngagementCache, EngagementEvent};
use crate::feed::{decorate, DecoratedItem, FeedModel, RefreshOutcome};
use crate::navigation::{Navigator, Route};
use crate::playback::{
    ItemState, PlaybackController, PlaybackError, ScrollCoalescer, ScrollReceiver, Transition,
};
use crate::profile::{ProfileError, ProfileService, UserProfile};
use crate::remote::{ContentItem, ContentKind, FetchError, MediaStorage, RemoteContentStore};
use crate::session::SessionStore;
use crate::storage::{KeyValueStore, PersistenceError};
use crate::upload::{LocalMediaHandle, UploadError, UploadPipeline, UploadProgress};
use url::Url;

/// Capacity of the background event channel.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Completion reports from background tasks.
#[derive(Debug)]
pub enum AppEvent {
    RefreshCompleted {
        kind: ContentKind,
        /// Refresh generation the fetch was issued under
        generation: u64,
        /// Like toggle position when the fetch started
        like_checkpoint: u64,
        result: Result<Vec<ContentItem>, FetchError>,
    },
    /// A reel upload ended
    UploadFinished {
        result: Result<ContentItem, UploadError>,
    },
    Engagement(EngagementEvent),
    /// Latest scroll offset after a burst
    Scrolled { offset: f64 },
}

pub struct App {
    pub config: Config,
    pub session: SessionStore,
    pub engagement: EngagementCache,
    pub posts: FeedModel,
    pub reels: FeedModel,
    pub playback: PlaybackController,
    pub profile: ProfileService,
    /// Last user-facing message, if any
    pub status: Option<String>,
    uploader: UploadPipeline,
    navigator: Box<dyn Navigator>,
    event_tx: mpsc::Sender<AppEvent>,
    event_rx: mpsc::Receiver<AppEvent>,
    engagement_rx: mpsc::UnboundedReceiver<EngagementEvent>,
    scroll_tx: Arc<ScrollCoalescer>,
    scroll_rx: ScrollReceiver,
    /// Uploads still running; aborted when the app is dropped
    uploads: Vec<AbortHandle>,
}

impl App {
    /// Builds the session. Must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PlaybackError`] if `config.item_height` is not a positive
    /// finite number.
    pub fn new(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteContentStore>,
        media: Arc<dyn MediaStorage>,
        navigator: Box<dyn Navigator>,
    ) -> Result<Self, PlaybackError> {
        let playback = PlaybackController::new(config.item_height)?;
        let posts_collection = config.collection(ContentKind::Post).to_string();
        let reels_collection = config.collection(ContentKind::Reel).to_string();

        let (engagement, engagement_rx) =
            EngagementCache::new(Arc::clone(&store), Arc::clone(&remote), reels_collection.clone());
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (scroll_tx, scroll_rx) = ScrollCoalescer::new();

        Ok(Self {
            session: SessionStore::new(store),
            engagement,
            posts: FeedModel::new(ContentKind::Post, posts_collection, Arc::clone(&remote)),
            reels: FeedModel::new(ContentKind::Reel, reels_collection.clone(), Arc::clone(&remote)),
            playback,
            profile: ProfileService::new(
                config.users_collection.clone(),
                Arc::clone(&remote),
                Arc::clone(&media),
            ),
            status: None,
            uploader: UploadPipeline::new(
                reels_collection,
                config.author_name.clone(),
                remote,
                media,
            ),
            navigator,
            event_tx,
            event_rx,
            engagement_rx,
            scroll_tx: Arc::new(scroll_tx),
            scroll_rx,
            uploads: Vec::new(),
            config,
        })
    }

    /// Loads persisted likes and routes to home or login.
    ///
    /// Returns whether a session token is present.
    pub async fn start(&mut self) -> bool {
        self.engagement.load().await;
        let signed_in = self.session.is_signed_in().await;
        self.navigate(if signed_in { Route::Home } else { Route::Login });
        signed_in
    }

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status = Some(message.into());
    }

    pub fn feed(&self, kind: ContentKind) -> &FeedModel {
        match kind {
            ContentKind::Post => &self.posts,
            ContentKind::Reel => &self.reels,
        }
    }

    fn feed_mut(&mut self, kind: ContentKind) -> &mut FeedModel {
        match kind {
            ContentKind::Post => &mut self.posts,
            ContentKind::Reel => &mut self.reels,
        }
    }

    // ------------------------------------------------------------------------
    // Background work
    // ------------------------------------------------------------------------

    /// Starts a refresh of one feed. Returns its generation.
    pub fn spawn_refresh(&mut self, kind: ContentKind) -> u64 {
        let like_checkpoint = self.engagement.checkpoint();
        let ticket = self.feed_mut(kind).begin_refresh();
        let generation = ticket.generation();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = ticket.fetch().await;
            let event = AppEvent::RefreshCompleted {
                kind,
                generation,
                like_checkpoint,
                result,
            };
            if tx.send(event).await.is_err() {
                tracing::debug!(%kind, generation, "App gone before refresh completed");
            }
        });
        generation
    }

    /// Starts a reel upload; the result arrives as [`AppEvent::UploadFinished`].
    pub fn spawn_upload(&mut self, handle: LocalMediaHandle) -> watch::Receiver<UploadProgress> {
        let task = self.uploader.spawn(handle);
        let progress = task.progress();
        if let Some(abort) = task.abort_handle() {
            self.uploads.retain(|h| !h.is_finished());
            self.uploads.push(abort);
        }

        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = task.join().await;
            let _ = tx.send(AppEvent::UploadFinished { result }).await;
        });
        progress
    }

    /// Producer for scroll offsets. Gesture handlers publish every offset;
    /// [`next_event`](Self::next_event) yields only the latest of a burst.
    pub fn scroll_publisher(&self) -> Arc<ScrollCoalescer> {
        Arc::clone(&self.scroll_tx)
    }

    /// Waits for the next background event.
    pub async fn next_event(&mut self) -> Option<AppEvent> {
        tokio::select! {
            Some(event) = self.event_rx.recv() => Some(event),
            Some(event) = self.engagement_rx.recv() => Some(AppEvent::Engagement(event)),
            Some(offset) = self.scroll_rx.next() => Some(AppEvent::Scrolled { offset }),
            else => None,
        }
    }

    /// Applies one background event to the session state.
    pub async fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::RefreshCompleted {
                kind,
                generation,
                like_checkpoint,
                result,
            } => {
                self.handle_refresh_completed(kind, generation, like_checkpoint, result)
                    .await;
            }
            AppEvent::UploadFinished { result } => {
                self.handle_upload_finished(result);
            }
            AppEvent::Scrolled { offset } => {
                self.on_scroll(offset);
            }
            AppEvent::Engagement(event) => {
                self.engagement.on_mirror_settled(&event);
                // Sync failures stay silent; the local state is kept
                if let EngagementEvent::MirrorFailed { item_id, .. } = &event {
                    tracing::debug!(item_id = %item_id, "Like kept locally after mirror failure");
                }
            }
        }
    }

    async fn handle_refresh_completed(
        &mut self,
        kind: ContentKind,
        generation: u64,
        like_checkpoint: u64,
        result: Result<Vec<ContentItem>, FetchError>,
    ) {
        let active_id = self.active_reel_id();
        match self.feed_mut(kind).complete_refresh(generation, result) {
            RefreshOutcome::Applied { count } => {
                if kind == ContentKind::Reel {
                    self.engagement
                        .reconcile(like_checkpoint, self.reels.remote_like_states())
                        .await;
                    if self.playback.set_len(self.reels.len()).is_none()
                        && self.active_reel_id() != active_id
                    {
                        // reordered: a different reel now sits at the active index
                        self.playback.restart_active();
                    }
                }
                self.status = None;
                tracing::debug!(%kind, count, "Applied refresh");
            }
            RefreshOutcome::Stale { .. } => {}
            RefreshOutcome::Failed(e) => {
                self.set_status(format!("Could not refresh {kind}s: {}", e.source));
            }
        }
    }

    fn active_reel_id(&self) -> Option<String> {
        let index = self.playback.active_index()?;
        self.reels.items().get(index).map(|item| item.id.clone())
    }

    fn handle_upload_finished(&mut self, result: Result<ContentItem, UploadError>) {
        match result {
            Ok(item) => {
                let id = item.id.clone();
                if self.reels.append(item) {
                    self.playback.set_len(self.reels.len());
                }
                tracing::info!(item_id = %id, "Uploaded reel added to feed");
                self.set_status("Uploaded reel");
            }
            Err(e) => {
                tracing::warn!(stage = %e.stage, error = %e.cause, "Upload failed");
                self.set_status(format!("Upload failed ({})", e.stage));
            }
        }
    }

    // ------------------------------------------------------------------------
    // User actions
    // ------------------------------------------------------------------------

    /// Toggles the like on an item and returns the new value.
    ///
    /// Reel likes are mirrored to the remote store; post likes stay local.
    pub async fn toggle_like(&mut self, kind: ContentKind, item_id: &str) -> bool {
        match kind {
            ContentKind::Reel => self.engagement.toggle_like(item_id).await,
            ContentKind::Post => self.engagement.toggle_local_like(item_id).await,
        }
    }

    pub fn on_scroll(&mut self, offset: f64) -> Option<Transition> {
        self.playback.on_scroll(offset)
    }

    pub fn toggle_play(&mut self, index: usize) -> Option<ItemState> {
        self.playback.toggle(index)
    }

    pub fn decorated(&self, kind: ContentKind) -> Vec<DecoratedItem> {
        self.feed(kind).decorated(&self.engagement)
    }

    /// Searches posts, then reels.
    pub fn search(&self, query: &str) -> Vec<DecoratedItem> {
        self.posts
            .search(query)
            .into_iter()
            .chain(self.reels.search(query))
            .map(|item| decorate(item, &self.engagement))
            .collect()
    }

    pub fn navigate(&mut self, route: Route) {
        self.navigator.navigate(route);
    }

    /// Opens the detail screen of an item loaded in either feed.
    ///
    /// Returns `false` for unknown ids.
    pub fn open_item(&mut self, item_id: &str) -> bool {
        if self.posts.get(item_id).is_none() && self.reels.get(item_id).is_none() {
            tracing::debug!(item_id, "Cannot open unknown item");
            return false;
        }
        self.navigate(Route::Item {
            item_id: item_id.to_string(),
        });
        true
    }

    fn user_id(&self) -> Result<String, ProfileError> {
        self.config.user_id.clone().ok_or(ProfileError::NoUser)
    }

    /// Opens the profile screen and loads the signed-in user's profile.
    pub async fn open_profile(&mut self) -> Result<Option<UserProfile>, ProfileError> {
        let uid = self.user_id()?;
        self.navigate(Route::Profile);
        self.profile.load(&uid).await
    }

    /// Uploads a new avatar for the signed-in user.
    pub async fn update_profile_image(
        &mut self,
        handle: &LocalMediaHandle,
        progress: Option<watch::Sender<UploadProgress>>,
    ) -> Result<Url, ProfileError> {
        let uid = self.user_id()?;
        match self.profile.upload_image(&uid, handle, progress).await {
            Ok(url) => {
                self.set_status("Profile image updated");
                Ok(url)
            }
            Err(e) => {
                self.set_status(format!("Could not update profile image: {e}"));
                Err(e)
            }
        }
    }

    pub async fn login(&mut self, token: &SecretString) -> Result<(), PersistenceError> {
        self.session.store_token(token).await?;
        self.navigate(Route::Home);
        Ok(())
    }

    pub async fn logout(&mut self) -> Result<(), PersistenceError> {
        self.session.clear().await?;
        self.navigate(Route::Login);
        Ok(())
    }

    /// Waits until queued like writes have reached the remote store.
    pub async fn flush_likes(&mut self) {
        self.engagement.flush().await;
        while let Ok(event) = self.engagement_rx.try_recv() {
            self.engagement.on_mirror_settled(&event);
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        for handle in self.uploads.drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::LogNavigator;
    use crate::remote::{Document, MemoryContentStore, MemoryMediaStorage};
    use crate::storage::MemoryKeyValueStore;
    use serde_json::json;
    use std::sync::Mutex;

    /// Navigator that shares its route history with the test.
    struct Recorder(Arc<Mutex<Vec<Route>>>);

    impl Navigator for Recorder {
        fn navigate(&mut self, route: Route) {
            self.0.lock().unwrap().push(route);
        }
    }

    fn reel(id: &str, liked: bool) -> Document {
        Document {
            id: id.to_string(),
            fields: json!({"video": format!("https://cdn.example.com/{id}.mp4"), "liked": liked})
                .as_object()
                .cloned()
                .unwrap(),
        }
    }

    fn app_with(remote: Arc<MemoryContentStore>, navigator: Box<dyn Navigator>) -> App {
        App::new(
            Config::default(),
            Arc::new(MemoryKeyValueStore::new()),
            remote,
            Arc::new(MemoryMediaStorage::new()),
            navigator,
        )
        .unwrap()
    }

    async fn pump_until_refreshed(app: &mut App) {
        loop {
            let event = app.next_event().await.unwrap();
            let done = matches!(event, AppEvent::RefreshCompleted { .. });
            app.handle_event(event).await;
            if done {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_start_routes_by_session() {
        let routes = Arc::new(Mutex::new(Vec::new()));
        let mut app = app_with(
            Arc::new(MemoryContentStore::new()),
            Box::new(Recorder(routes.clone())),
        );

        assert!(!app.start().await);
        app.login(&SecretString::from("tok")).await.unwrap();
        app.logout().await.unwrap();

        assert_eq!(
            *routes.lock().unwrap(),
            vec![Route::Login, Route::Home, Route::Login]
        );
    }

    #[tokio::test]
    async fn test_reel_refresh_activates_first_item_and_reconciles() {
        let remote = Arc::new(MemoryContentStore::new());
        remote.insert("videos", reel("a", false));
        remote.insert("videos", reel("b", true));
        let mut app = app_with(remote, Box::new(LogNavigator::default()));

        app.spawn_refresh(ContentKind::Reel);
        pump_until_refreshed(&mut app).await;

        assert_eq!(app.reels.ids(), vec!["a", "b"]);
        assert_eq!(app.playback.active_index(), Some(0));
        assert!(app.engagement.is_liked("b"));
    }

    #[tokio::test]
    async fn test_superseded_refresh_is_ignored() {
        let remote = Arc::new(MemoryContentStore::new());
        remote.insert("videos", reel("a", false));
        let mut app = app_with(remote.clone(), Box::new(LogNavigator::default()));

        let first = app.spawn_refresh(ContentKind::Reel);
        let second = app.spawn_refresh(ContentKind::Reel);
        assert!(second > first);

        pump_until_refreshed(&mut app).await;
        pump_until_refreshed(&mut app).await;
        assert_eq!(app.reels.len(), 1);
    }

    #[tokio::test]
    async fn test_open_item_requires_loaded_item() {
        let remote = Arc::new(MemoryContentStore::new());
        remote.insert("videos", reel("a", false));
        let routes = Arc::new(Mutex::new(Vec::new()));
        let mut app = app_with(remote, Box::new(Recorder(routes.clone())));

        assert!(!app.open_item("a"));
        app.spawn_refresh(ContentKind::Reel);
        pump_until_refreshed(&mut app).await;
        assert!(app.open_item("a"));
        assert_eq!(
            routes.lock().unwrap().last(),
            Some(&Route::Item {
                item_id: "a".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_post_like_stays_local() {
        let remote = Arc::new(MemoryContentStore::new());
        let mut app = app_with(remote.clone(), Box::new(LogNavigator::default()));

        assert!(app.toggle_like(ContentKind::Post, "p1").await);
        app.flush_likes().await;
        assert!(remote.updates().is_empty());
        assert!(app.engagement.is_liked("p1"));
    }

    #[tokio::test]
    async fn test_like_made_during_refresh_survives_its_snapshot() {
        let remote = Arc::new(MemoryContentStore::new());
        remote.insert("videos", reel("a", false));
        let mut app = app_with(remote.clone(), Box::new(LogNavigator::default()));

        // the fetch completes with liked=false before the user taps like
        app.spawn_refresh(ContentKind::Reel);
        let refreshed = app.next_event().await.unwrap();
        assert!(matches!(refreshed, AppEvent::RefreshCompleted { .. }));

        assert!(app.toggle_like(ContentKind::Reel, "a").await);
        loop {
            let event = app.next_event().await.unwrap();
            let mirrored = matches!(event, AppEvent::Engagement(_));
            app.handle_event(event).await;
            if mirrored {
                break;
            }
        }
        assert!(!app.engagement.has_pending_write("a"));

        app.handle_event(refreshed).await;
        assert!(app.engagement.is_liked("a"));
        assert_eq!(remote.field("videos", "a", "liked"), Some(json!(true)));

        // the next refresh sees the mirrored value
        app.spawn_refresh(ContentKind::Reel);
        pump_until_refreshed(&mut app).await;
        assert!(app.engagement.is_liked("a"));
    }

    #[tokio::test]
    async fn test_reordered_refresh_pauses_new_item_at_active_index() {
        let remote = Arc::new(MemoryContentStore::new());
        for id in ["a", "b", "c"] {
            remote.insert("videos", reel(id, false));
        }
        let mut app = app_with(remote.clone(), Box::new(LogNavigator::default()));
        app.spawn_refresh(ContentKind::Reel);
        pump_until_refreshed(&mut app).await;

        let h = app.config.item_height;
        app.on_scroll(h);
        assert_eq!(app.toggle_play(1), Some(ItemState::ActivePlaying));

        // same order: playback untouched
        app.spawn_refresh(ContentKind::Reel);
        pump_until_refreshed(&mut app).await;
        assert!(app.playback.is_playing(1));

        // `a` gone, so `c` now sits at index 1
        remote.remove("videos", "a");
        app.spawn_refresh(ContentKind::Reel);
        pump_until_refreshed(&mut app).await;
        assert_eq!(app.reels.ids(), vec!["b", "c"]);
        assert_eq!(app.playback.active_index(), Some(1));
        assert_eq!(app.playback.state_of(1), ItemState::ActivePaused);
    }

    #[tokio::test]
    async fn test_scroll_burst_arrives_as_one_event() {
        let remote = Arc::new(MemoryContentStore::new());
        for id in ["a", "b", "c"] {
            remote.insert("videos", reel(id, false));
        }
        let mut app = app_with(remote, Box::new(LogNavigator::default()));
        app.spawn_refresh(ContentKind::Reel);
        pump_until_refreshed(&mut app).await;

        let h = app.config.item_height;
        let scroll = app.scroll_publisher();
        for y in [0.2 * h, 0.9 * h, 1.4 * h, 2.0 * h] {
            assert!(scroll.publish(y));
        }

        let event = app.next_event().await.unwrap();
        match event {
            AppEvent::Scrolled { offset } => assert_eq!(offset, 2.0 * h),
            other => panic!("expected scroll, got {other:?}"),
        }
        app.handle_event(AppEvent::Scrolled { offset: 2.0 * h }).await;
        assert_eq!(app.playback.active_index(), Some(2));
        assert_eq!(app.playback.state_of(2), ItemState::ActivePaused);
    }

    #[tokio::test]
    async fn test_open_profile_loads_configured_user() {
        let remote = Arc::new(MemoryContentStore::new());
        remote.insert(
            "users",
            Document {
                id: "u1".to_string(),
                fields: json!({"displayName": "Mohit"}).as_object().cloned().unwrap(),
            },
        );
        let routes = Arc::new(Mutex::new(Vec::new()));

        let mut anonymous = app_with(remote.clone(), Box::new(Recorder(routes.clone())));
        assert!(matches!(
            anonymous.open_profile().await,
            Err(ProfileError::NoUser)
        ));
        assert!(routes.lock().unwrap().is_empty());

        let config = Config {
            user_id: Some("u1".to_string()),
            ..Config::default()
        };
        let mut app = App::new(
            config,
            Arc::new(MemoryKeyValueStore::new()),
            remote,
            Arc::new(MemoryMediaStorage::new()),
            Box::new(Recorder(routes.clone())),
        )
        .unwrap();
        let profile = app.open_profile().await.unwrap().unwrap();
        assert_eq!(profile.name(), "Mohit");
        assert_eq!(routes.lock().unwrap().last(), Some(&Route::Profile));
    }
}
