//! Ingest path from the upstream bus decoder into the registry

use super::TelemetryRegistry;
use anyhow::{anyhow, Result};
use dashlink_shared::{SessionPhase, Signal};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Most updates drained into one registry mutation
const MAX_BATCH: usize = 64;

/// Handle the upstream decoder pushes decoded signals into. Cheap to clone.
#[derive(Clone)]
pub struct SignalIngest {
    tx: mpsc::Sender<Signal>,
}

impl SignalIngest {
    /// Queue a signal, waiting if the queue is full
    pub async fn send(&self, signal: Signal) -> Result<()> {
        self.tx
            .send(signal)
            .await
            .map_err(|_| anyhow!("Ingest closed"))
    }

    /// Queue a signal without waiting. Returns false if it was not queued.
    pub fn try_send(&self, signal: Signal) -> bool {
        self.tx.try_send(signal).is_ok()
    }
}

/// Whether updates are applied in this phase
fn accepts(phase: SessionPhase) -> bool {
    matches!(phase, SessionPhase::Starting | SessionPhase::Running)
}

/// Spawn the task that applies queued signals to `registry` while the
/// session is STARTING or RUNNING. Signals arriving in any other phase are
/// dropped. The task ends when every [`SignalIngest`] is gone.
pub fn spawn_ingest(
    registry: Arc<TelemetryRegistry>,
    phases: watch::Receiver<SessionPhase>,
    capacity: usize,
) -> (SignalIngest, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Signal>(capacity);

    let task = tokio::spawn(async move {
        let mut batch = Vec::with_capacity(MAX_BATCH);
        let mut dropped: u64 = 0;

        while let Some(first) = rx.recv().await {
            batch.push(first);
            while batch.len() < MAX_BATCH {
                match rx.try_recv() {
                    Ok(signal) => batch.push(signal),
                    Err(_) => break,
                }
            }

            if accepts(*phases.borrow()) {
                registry.put_all(batch.drain(..).map(|s| (s.key, s.value)));
            } else {
                dropped += batch.len() as u64;
                debug!("[TELEMETRY] Dropped {} signal(s) while stopped", batch.len());
                batch.clear();
            }
        }

        info!("[TELEMETRY] Ingest closed ({} signal(s) dropped in total)", dropped);
    });

    (SignalIngest { tx }, task)
}
