//! Which reel is on screen, and whether it is playing.
//!
//! Reels are laid out in a paged vertical list of fixed-height items. The
//! controller maps a scroll offset to the single active index and keeps the
//! play/pause state of that index. Every other index is idle, so at most one
//! item ever plays.
//!
//! ```text
//!            scroll to other index
//!   Idle ─────────────────────────► ActivePaused ◄──toggle──► ActivePlaying
//!    ▲                                   │                         │
//!    └───────── scroll away ─────────────┴─────────────────────────┘
//! ```

mod coalesce;

use std::collections::BTreeMap;
use thiserror::Error;

pub use coalesce::{ScrollCoalescer, ScrollReceiver};

#[derive(Debug, Error, PartialEq)]
pub enum PlaybackError {
    #[error("Invalid item height: {0} (must be positive and finite)")]
    InvalidItemHeight(f64),
}

/// Playback state of one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Idle,
    ActivePaused,
    ActivePlaying,
}

/// A change of active index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Previously active index, now idle
    pub deactivated: Option<usize>,
    /// Newly active index, paused
    pub activated: usize,
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackState {
    pub active_index: Option<usize>,
    /// Only the active index has an entry
    pub playing: BTreeMap<usize, bool>,
}

pub struct PlaybackController {
    item_height: f64,
    len: usize,
    active: Option<usize>,
    playing: bool,
}

impl PlaybackController {
    /// Creates a controller for an empty list.
    pub fn new(item_height: f64) -> Result<Self, PlaybackError> {
        check_height(item_height)?;
        Ok(Self {
            item_height,
            len: 0,
            active: None,
            playing: false,
        })
    }

    pub fn item_height(&self) -> f64 {
        self.item_height
    }

    /// Viewport resize. The active index is kept until the next scroll.
    pub fn set_item_height(&mut self, item_height: f64) -> Result<(), PlaybackError> {
        check_height(item_height)?;
        self.item_height = item_height;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The list length changed.
    ///
    /// - empty list: no active index
    /// - first items arrive: index 0 becomes active (paused)
    /// - active index past the end: moved to the last item (paused)
    pub fn set_len(&mut self, len: usize) -> Option<Transition> {
        self.len = len;

        if len == 0 {
            if self.active.is_some() {
                tracing::debug!("Feed emptied, clearing playback");
            }
            self.active = None;
            self.playing = false;
            return None;
        }

        match self.active {
            None => self.activate(0),
            Some(index) if index >= len => self.activate(len - 1),
            Some(_) => None,
        }
    }

    /// A different item now sits at the active index: keep the index, drop
    /// its play state.
    pub fn restart_active(&mut self) -> Option<Transition> {
        let index = self.active?;
        self.activate(index)
    }

    /// Index for a scroll offset: `clamp(round_half_up(y / h), 0, len-1)`.
    ///
    /// `None` for an empty list or a non-finite offset.
    pub fn index_for_offset(&self, offset: f64) -> Option<usize> {
        if self.len == 0 || !offset.is_finite() {
            return None;
        }
        // f64::round rounds half away from zero, i.e. half-up once negatives are clamped
        let ratio = (offset.max(0.0) / self.item_height).round();
        let last = self.len - 1;
        if ratio >= last as f64 {
            Some(last)
        } else {
            Some(ratio as usize)
        }
    }

    /// Scroll settled at `offset`. Returns the transition if the active index changed.
    pub fn on_scroll(&mut self, offset: f64) -> Option<Transition> {
        let Some(index) = self.index_for_offset(offset) else {
            if !offset.is_finite() {
                tracing::debug!(offset, "Ignoring non-finite scroll offset");
            }
            return None;
        };
        if self.active == Some(index) {
            return None;
        }
        self.activate(index)
    }

    /// Applies a burst of scroll events, committing only the final position.
    pub fn apply_burst<I>(&mut self, offsets: I) -> Option<Transition>
    where
        I: IntoIterator<Item = f64>,
    {
        let last = offsets.into_iter().filter(|y| y.is_finite()).last()?;
        self.on_scroll(last)
    }

    /// Play/pause on `index`. Only the active index responds.
    ///
    /// Returns the new state, or `None` if the toggle was rejected.
    pub fn toggle(&mut self, index: usize) -> Option<ItemState> {
        if self.active != Some(index) {
            tracing::debug!(index, active = ?self.active, "Ignoring toggle on inactive item");
            return None;
        }
        self.playing = !self.playing;
        let state = self.state_of(index);
        tracing::debug!(index, ?state, "Toggled playback");
        Some(state)
    }

    pub fn state_of(&self, index: usize) -> ItemState {
        match self.active {
            Some(active) if active == index && self.playing => ItemState::ActivePlaying,
            Some(active) if active == index => ItemState::ActivePaused,
            _ => ItemState::Idle,
        }
    }

    pub fn is_playing(&self, index: usize) -> bool {
        self.state_of(index) == ItemState::ActivePlaying
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn snapshot(&self) -> PlaybackState {
        let mut playing = BTreeMap::new();
        if let Some(index) = self.active {
            playing.insert(index, self.playing);
        }
        PlaybackState {
            active_index: self.active,
            playing,
        }
    }

    fn activate(&mut self, index: usize) -> Option<Transition> {
        let transition = Transition {
            deactivated: self.active,
            activated: index,
        };
        self.active = Some(index);
        self.playing = false;
        tracing::debug!(from = ?transition.deactivated, to = index, "Active item changed");
        Some(transition)
    }
}

fn check_height(item_height: f64) -> Result<(), PlaybackError> {
    if item_height.is_finite() && item_height > 0.0 {
        Ok(())
    } else {
        Err(PlaybackError::InvalidItemHeight(item_height))
    }
}
