//! Network State Watcher
//!
//! Restarts the connection pipeline when the local access point comes up.

use super::source::ApEventSource;
use dashlink_shared::ApStateChange;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Called once per qualifying transition
pub type RestartTrigger = Box<dyn Fn() + Send + Sync>;

/// Decides which notifications are a not-enabled -> enabled transition.
///
/// The last category this detector saw takes precedence over the
/// notification's own `previous` field, so a repeated "enabled" never
/// counts twice.
#[derive(Debug, Default)]
pub struct ApTransitionDetector {
    last_enabled: Option<bool>,
}

impl ApTransitionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one notification; returns whether it qualifies for a restart
    pub fn observe(&mut self, change: ApStateChange) -> bool {
        let was_enabled = self
            .last_enabled
            .unwrap_or_else(|| change.previous.is_enabled());
        let enabled = change.current.is_enabled();
        self.last_enabled = Some(enabled);
        enabled && !was_enabled
    }

    /// Forget the tracked category (after missed notifications)
    pub fn reset(&mut self) {
        self.last_enabled = None;
    }
}

/// Detector shared by successive watchers so its memory outlives a restart
pub type SharedDetector = Arc<Mutex<ApTransitionDetector>>;

/// Subscription to access-point changes, bound to its owner's lifetime
pub struct NetworkStateWatcher {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl NetworkStateWatcher {
    /// Subscribe to `source` and call `on_restart` on every qualifying
    /// transition. `detector` carries the last seen category across watchers.
    pub fn start(
        source: &dyn ApEventSource,
        detector: SharedDetector,
        on_restart: RestartTrigger,
        token: CancellationToken,
    ) -> Self {
        let mut rx = source.subscribe();
        let cancel = token.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(change) => {
                            let qualifies = detector
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .observe(change);
                            if qualifies {
                                info!("[AP] Access point enabled, restarting pipeline");
                                on_restart();
                            } else {
                                debug!("[AP] Ignoring {:?} -> {:?}", change.previous, change.current);
                            }
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!("[AP] Missed {} notification(s)", missed);
                            detector.lock().unwrap_or_else(PoisonError::into_inner).reset();
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
            debug!("[AP] Watcher stopped");
        });

        Self {
            token,
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Unsubscribe and wait for the watcher task to finish. Idempotent.
    pub async fn stop(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for NetworkStateWatcher {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
