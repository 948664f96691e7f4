//! Background task that copies like flags to the remote store.
//!
//! Writes are queued on an unbounded channel and applied one at a time, so
//! the remote sees them in the order the user toggled. Failures are reported
//! and dropped; there is no retry.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::remote::{RemoteContentStore, LIKED_FIELD};

/// Outcome of one mirrored write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngagementEvent {
    Mirrored {
        item_id: String,
        liked: bool,
    },
    /// The remote rejected the write; local state is kept as-is.
    MirrorFailed {
        item_id: String,
        liked: bool,
        error: String,
    },
}

impl EngagementEvent {
    pub fn item_id(&self) -> &str {
        match self {
            EngagementEvent::Mirrored { item_id, .. }
            | EngagementEvent::MirrorFailed { item_id, .. } => item_id,
        }
    }
}

struct MirrorWrite {
    item_id: String,
    liked: bool,
}

/// Sending half of the mirror queue plus the worker's handle.
pub(crate) struct MirrorQueue {
    tx: Option<mpsc::UnboundedSender<MirrorWrite>>,
    handle: Option<JoinHandle<()>>,
}

impl MirrorQueue {
    /// Spawns the worker on the current tokio runtime.
    pub(crate) fn spawn(
        remote: Arc<dyn RemoteContentStore>,
        collection: String,
        events: mpsc::UnboundedSender<EngagementEvent>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<MirrorWrite>();

        let handle = tokio::spawn(async move {
            while let Some(write) = rx.recv().await {
                let result = remote
                    .update_field(
                        &collection,
                        &write.item_id,
                        LIKED_FIELD,
                        Value::Bool(write.liked),
                    )
                    .await;

                let event = match result {
                    Ok(()) => {
                        tracing::debug!(item_id = %write.item_id, liked = write.liked, "Mirrored like");
                        EngagementEvent::Mirrored {
                            item_id: write.item_id,
                            liked: write.liked,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            item_id = %write.item_id,
                            liked = write.liked,
                            error = %e,
                            "Failed to mirror like to remote store"
                        );
                        EngagementEvent::MirrorFailed {
                            item_id: write.item_id,
                            liked: write.liked,
                            error: e.to_string(),
                        }
                    }
                };

                // Receiver gone means the session is shutting down
                let _ = events.send(event);
            }
            tracing::debug!(collection = %collection, "Like mirror worker stopped");
        });

        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    /// Queues a write. Returns `false` if the worker is gone.
    pub(crate) fn enqueue(&self, item_id: &str, liked: bool) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        tx.send(MirrorWrite {
            item_id: item_id.to_string(),
            liked,
        })
        .is_ok()
    }

    /// Closes the queue and waits for queued writes to finish.
    pub(crate) async fn drain(&mut self) {
        self.tx = None;
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Like mirror worker panicked");
            }
        }
    }
}
