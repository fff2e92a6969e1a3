//! Access-point state notification sources

use dashlink_shared::ApStateChange;
use tokio::sync::broadcast;
use tracing::debug;

/// Push-based source of access-point state changes.
///
/// Each subscriber owns its receiver; dropping it unsubscribes.
pub trait ApEventSource: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<ApStateChange>;
}

/// Fan-out source that platform glue feeds with raw notifications
pub struct BroadcastApSource {
    tx: broadcast::Sender<ApStateChange>,
}

impl BroadcastApSource {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Deliver a change to every subscriber. Returns how many received it.
    pub fn notify(&self, change: ApStateChange) -> usize {
        debug!("[AP] {:?} -> {:?}", change.previous, change.current);
        self.tx.send(change).unwrap_or(0)
    }

    /// Deliver a change given as raw platform state codes
    pub fn notify_codes(&self, previous: i32, current: i32) -> usize {
        self.notify(ApStateChange::from_codes(previous, current))
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastApSource {
    fn default() -> Self {
        Self::new(16)
    }
}

impl ApEventSource for BroadcastApSource {
    fn subscribe(&self) -> broadcast::Receiver<ApStateChange> {
        self.tx.subscribe()
    }
}
