//! Feed engagement and reel playback engine for a social-feed client.
//!
//! - [`engagement`] - liked flags across memory, local storage and the remote store
//! - [`feed`] - ordered post/reel lists filled from the remote store
//! - [`playback`] - the single active reel and its play/pause state
//! - [`upload`] - reel upload followed by document creation
//! - [`profile`] - the signed-in user's profile and avatar
//! - [`app`] - session owner tying the above to background tasks
//!
//! Collaborators sit behind traits: [`storage::KeyValueStore`],
//! [`remote::RemoteContentStore`], [`remote::MediaStorage`] and
//! [`navigation::Navigator`].

pub mod app;
pub mod config;
pub mod engagement;
pub mod feed;
pub mod navigation;
pub mod playback;
pub mod profile;
pub mod remote;
pub mod session;
pub mod storage;
pub mod upload;
pub mod util;
