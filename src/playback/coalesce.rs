//! Latest-value hand-off for scroll offsets.
//!
//! Gesture handlers publish every offset; the consumer wakes once and reads
//! only the most recent one, so a fling costs one state update.

use tokio::sync::watch;

/// Producer side. Cloning is not needed; wrap in `Arc` to share.
pub struct ScrollCoalescer {
    tx: watch::Sender<Option<f64>>,
}

/// Consumer side.
pub struct ScrollReceiver {
    rx: watch::Receiver<Option<f64>>,
}

impl ScrollCoalescer {
    pub fn new() -> (Self, ScrollReceiver) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, ScrollReceiver { rx })
    }

    /// Publishes an offset, replacing any the consumer has not read yet.
    ///
    /// Returns `false` once the receiver is gone.
    pub fn publish(&self, offset: f64) -> bool {
        self.tx.send(Some(offset)).is_ok()
    }
}

impl ScrollReceiver {
    /// Waits for the next offset. `None` when the producer is dropped.
    pub async fn next(&mut self) -> Option<f64> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(offset) = *self.rx.borrow_and_update() {
                return Some(offset);
            }
        }
    }

    /// The unread offset, if one was published since the last read.
    pub fn try_latest(&mut self) -> Option<f64> {
        match self.rx.has_changed() {
            Ok(true) => *self.rx.borrow_and_update(),
            _ => None,
        }
    }
}
