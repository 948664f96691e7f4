//! Feed models for the photo and reel collections.
//!
//! A [`FeedModel`] holds the items of one remote collection in the store's
//! natural order. Refreshes can run on a background task:
//!
//! - [`FeedModel::begin_refresh`] issues a [`RefreshTicket`] tagged with a
//!   refresh generation
//! - the ticket's `fetch` runs anywhere
//! - [`FeedModel::complete_refresh`] applies the result only if no newer
//!   refresh was issued in the meantime
//!
//! Like flags are not stored on items; [`decorate`] pairs an item with the
//! current state of the [`EngagementCache`](crate::engagement::EngagementCache).

mod model;

pub use model::{decorate, fetch_items, DecoratedItem, FeedModel, RefreshOutcome, RefreshTicket};
