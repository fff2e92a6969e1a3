//! Telemetry Registry
//!
//! Holds the latest value of every named signal. Written by the ingest path,
//! read by any number of observers.

use dashlink_shared::{SignalValue, Snapshot};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Last-value-wins store of named signals.
///
/// Every mutation happens under one write lock and republishes the new
/// snapshot before the lock is released, so snapshots are always a state the
/// map really held and subscribers see mutations in order.
pub struct TelemetryRegistry {
    signals: RwLock<Snapshot>,
    published: watch::Sender<Arc<Snapshot>>,
}

impl TelemetryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        let (published, _) = watch::channel(Arc::new(Snapshot::new()));
        Self {
            signals: RwLock::new(Snapshot::new()),
            published,
        }
    }

    /// Store `value` under `key`, replacing any previous value
    pub fn put(&self, key: impl Into<String>, value: impl Into<SignalValue>) {
        let key = key.into();
        let value = value.into();

        let mut signals = self.signals.write().unwrap_or_else(PoisonError::into_inner);
        if signals.get(&key) == Some(&value) {
            return;
        }
        signals.insert(key, value);
        self.published.send_replace(Arc::new(signals.clone()));
    }

    /// Store several values as one mutation
    pub fn put_all<I, K, V>(&self, updates: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SignalValue>,
    {
        let mut signals = self.signals.write().unwrap_or_else(PoisonError::into_inner);
        let mut changed = false;
        for (key, value) in updates {
            let value = value.into();
            let key = key.into();
            if signals.get(&key) != Some(&value) {
                signals.insert(key, value);
                changed = true;
            }
        }
        if changed {
            self.published.send_replace(Arc::new(signals.clone()));
        }
    }

    /// Drop every signal
    pub fn clear(&self) {
        let mut signals = self.signals.write().unwrap_or_else(PoisonError::into_inner);
        // A cleared map is consistent whatever a panicking writer left behind
        self.signals.clear_poison();
        if signals.is_empty() {
            return;
        }
        signals.clear();
        self.published.send_replace(Arc::new(Snapshot::new()));
        debug!("[TELEMETRY] Registry cleared");
    }

    /// Key-sorted copy of every live signal.
    ///
    /// Never fails. If a writer panicked mid-mutation the map may be torn,
    /// so an empty snapshot is returned until `clear()` resets the registry.
    pub fn snapshot(&self) -> Snapshot {
        match self.signals.read() {
            Ok(signals) => signals.clone(),
            Err(_) => {
                warn!("[TELEMETRY] Registry poisoned, returning empty snapshot");
                Snapshot::new()
            }
        }
    }

    /// Latest value for one signal
    pub fn get(&self, key: &str) -> Option<SignalValue> {
        self.signals.read().ok()?.get(key).cloned()
    }

    /// Number of live signals
    pub fn len(&self) -> usize {
        self.signals.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver that always holds the latest published snapshot
    pub fn watch(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.published.subscribe()
    }

    /// Call `observer` with a fresh snapshot after each mutation.
    ///
    /// Delivery runs on a runtime task. Intermediate snapshots may be
    /// coalesced when the observer is slower than the writers; the last one
    /// is always delivered.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&Snapshot) + Send + 'static,
    {
        let mut rx = self.published.subscribe();
        // Only changes from here on
        rx.borrow_and_update();

        let token = CancellationToken::new();
        let cancel = token.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = rx.borrow_and_update().clone();
                        if cancel.is_cancelled() {
                            break;
                        }
                        observer(&snapshot);
                    }
                }
            }
        });

        Subscription {
            token,
            task: Some(task),
        }
    }
}

impl Default for TelemetryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a registry observer. Dropping it cancels the observer.
pub struct Subscription {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Stop deliveries. Once this returns the observer will not be called again.
    pub async fn cancel(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
