//! Session Controller
//!
//! Owns the connection manager, telemetry registry, lifecycle poller and
//! network watcher, and moves them through STOPPED -> STARTING -> RUNNING ->
//! STOPPING together.

use crate::connection::ConnectionManager;
use crate::lifecycle::{LifecyclePoller, PowerSource, StayAwake};
use crate::navigation::Navigator;
use crate::network::{ApEventSource, NetworkStateWatcher, SharedDetector};
use crate::telemetry::{spawn_ingest, SignalIngest, TelemetryRegistry};
use dashlink_shared::state_machine::is_valid_transition;
use dashlink_shared::{
    defaults, ConnectionState, DeviceId, Destination, SessionEvent, SessionPhase,
    SessionStateMachine, TransitionResult,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What the session does when its connection attempt fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stay in STARTING; the user retries with `restart()`
    #[default]
    StayStarting,
    /// Shut the session down
    Stop,
}

/// Session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Adapter to connect to; `None` fails every attempt until set
    pub device: Option<DeviceId>,
    pub poll_interval: Duration,
    pub on_failure: FailurePolicy,
    pub start_destination: Destination,
    /// Queue depth of the signal ingest path
    pub ingest_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device: None,
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            on_failure: FailurePolicy::default(),
            start_destination: Destination::default(),
            ingest_capacity: 1024,
        }
    }
}

/// Platform collaborators the session drives
pub struct SessionDeps {
    pub connection: ConnectionManager,
    pub power: Arc<dyn PowerSource>,
    pub stay_awake: Arc<dyn StayAwake>,
    pub ap_source: Arc<dyn ApEventSource>,
}

/// Lifecycle requests raised by components, served by the supervisor task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Restart { generation: u64 },
    Shutdown { generation: u64 },
}

/// Components armed by one `start_up()`
struct Run {
    token: CancellationToken,
    poller: LifecyclePoller,
    watcher: NetworkStateWatcher,
    connector: JoinHandle<()>,
}

struct Inner {
    device: StdMutex<Option<DeviceId>>,
    poll_interval: Duration,
    on_failure: FailurePolicy,

    connection: ConnectionManager,
    registry: Arc<TelemetryRegistry>,
    navigator: Navigator,
    power: Arc<dyn PowerSource>,
    stay_awake: Arc<dyn StayAwake>,
    ap_source: Arc<dyn ApEventSource>,
    /// Last access-point category seen; survives restarts, reset on shutdown
    ap_detector: SharedDetector,

    fsm: StdMutex<SessionStateMachine>,
    phase_tx: watch::Sender<SessionPhase>,
    /// Serialises lifecycle commands; holds the active run
    lifecycle: Mutex<Option<Run>>,
    generation: AtomicU64,
    requests: mpsc::UnboundedSender<Request>,
}

/// The owning session controller
pub struct Session {
    inner: Arc<Inner>,
    ingest: SignalIngest,
    supervisor: JoinHandle<()>,
    ingest_task: JoinHandle<()>,
}

impl Session {
    /// Create a STOPPED session. Must be called inside a Tokio runtime.
    pub fn new(config: SessionConfig, deps: SessionDeps) -> Self {
        let (phase_tx, _) = watch::channel(SessionPhase::Stopped);
        let (requests, request_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(TelemetryRegistry::new());

        let (ingest, ingest_task) =
            spawn_ingest(registry.clone(), phase_tx.subscribe(), config.ingest_capacity);

        let inner = Arc::new(Inner {
            device: StdMutex::new(config.device),
            poll_interval: config.poll_interval,
            on_failure: config.on_failure,
            connection: deps.connection,
            registry,
            navigator: Navigator::new(config.start_destination),
            power: deps.power,
            stay_awake: deps.stay_awake,
            ap_source: deps.ap_source,
            ap_detector: SharedDetector::default(),
            fsm: StdMutex::new(SessionStateMachine::new()),
            phase_tx,
            lifecycle: Mutex::new(None),
            generation: AtomicU64::new(0),
            requests,
        });

        let supervisor = tokio::spawn(supervise(Arc::downgrade(&inner), request_rx));

        Self {
            inner,
            ingest,
            supervisor,
            ingest_task,
        }
    }

    /// Arm the connection manager, poller and watcher. No-op unless STOPPED.
    pub async fn start_up(&self) {
        let mut run = self.inner.lifecycle.lock().await;
        self.inner.start_locked(&mut run);
    }

    /// Release every component and return to STOPPED. No-op when STOPPED.
    pub async fn shutdown(&self) {
        let mut run = self.inner.lifecycle.lock().await;
        self.inner.stop_locked(&mut run).await;
    }

    /// `shutdown()` followed by `start_up()`, with nothing interleaved
    pub async fn restart(&self) {
        self.inner.restart().await;
    }

    pub fn phase(&self) -> SessionPhase {
        *self.inner.phase_tx.borrow()
    }

    pub fn phases(&self) -> watch::Receiver<SessionPhase> {
        self.inner.phase_tx.subscribe()
    }

    /// Whether the session has been started and not shut down
    pub fn is_running(&self) -> bool {
        matches!(self.phase(), SessionPhase::Starting | SessionPhase::Running)
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    pub fn connection_states(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.states()
    }

    pub fn registry(&self) -> Arc<TelemetryRegistry> {
        self.inner.registry.clone()
    }

    /// Drop every stored signal (the user's "clear" command)
    pub fn clear_signals(&self) {
        self.inner.registry.clear();
    }

    /// Handle for the upstream decoder to push signals through
    pub fn ingest(&self) -> SignalIngest {
        self.ingest.clone()
    }

    pub fn navigator(&self) -> &Navigator {
        &self.inner.navigator
    }

    /// Change the target device. Takes effect on the next start.
    pub fn set_device(&self, device: DeviceId) {
        info!("[SESSION] Target device set to {}", device);
        *self
            .inner
            .device
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(device);
    }

    pub fn device(&self) -> Option<DeviceId> {
        self.inner
            .device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.supervisor.abort();
        self.ingest_task.abort();
        if let Ok(mut run) = self.inner.lifecycle.try_lock() {
            if let Some(run) = run.take() {
                run.token.cancel();
            }
        }
    }
}

impl Inner {
    /// Feed an event to the state machine and publish the new phase
    fn apply(&self, event: SessionEvent) -> TransitionResult {
        let mut fsm = self.fsm.lock().unwrap_or_else(PoisonError::into_inner);
        let from = fsm.phase();
        let result = fsm.process_event(event);
        match &result {
            TransitionResult::Success(to) => {
                debug_assert!(is_valid_transition(from, *to));
                info!("[SESSION] {} -> {}", from, to);
                self.phase_tx.send_replace(*to);
            }
            TransitionResult::Unchanged(phase) => {
                debug!("[SESSION] Staying {}", phase);
            }
            TransitionResult::Invalid { from, event } => {
                debug!("[SESSION] Ignoring {:?} while {}", event, from);
            }
        }
        result
    }

    fn start_locked(self: &Arc<Self>, slot: &mut Option<Run>) {
        if !matches!(
            self.apply(SessionEvent::StartRequested),
            TransitionResult::Success(_)
        ) {
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();

        let poller = LifecyclePoller::start_with_token(
            self.power.clone(),
            self.stay_awake.clone(),
            self.poll_interval,
            token.child_token(),
        );

        let requests = self.requests.clone();
        let watcher = NetworkStateWatcher::start(
            self.ap_source.as_ref(),
            self.ap_detector.clone(),
            Box::new(move || {
                let _ = requests.send(Request::Restart { generation });
            }),
            token.child_token(),
        );

        let device = self
            .device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let connector = tokio::spawn(connect_task(
            Arc::downgrade(self),
            device,
            generation,
            token.clone(),
        ));

        *slot = Some(Run {
            token,
            poller,
            watcher,
            connector,
        });
    }

    async fn shutdown_locked(&self, slot: &mut Option<Run>) {
        if !matches!(
            self.apply(SessionEvent::StopRequested),
            TransitionResult::Success(_)
        ) {
            return;
        }

        if let Some(mut run) = slot.take() {
            run.token.cancel();
            run.poller.stop().await;
            run.watcher.stop().await;
            if let Err(e) = run.connector.await {
                error!("[SESSION] Connector task failed: {}", e);
            }
        }
        self.connection.disconnect().await;

        self.apply(SessionEvent::Released);
    }

    /// Final shutdown: the access-point state is no longer being tracked
    async fn stop_locked(&self, slot: &mut Option<Run>) {
        self.shutdown_locked(slot).await;
        self.ap_detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }

    async fn restart(self: &Arc<Self>) {
        let mut run = self.lifecycle.lock().await;
        self.restart_locked(&mut run).await;
    }

    async fn restart_locked(self: &Arc<Self>, slot: &mut Option<Run>) {
        info!("[SESSION] Restarting");
        self.shutdown_locked(slot).await;
        self.start_locked(slot);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
            && !matches!(
                *self.phase_tx.borrow(),
                SessionPhase::Stopped | SessionPhase::Stopping
            )
    }
}

/// Runs one connection attempt for one run of the session
async fn connect_task(
    inner: Weak<Inner>,
    device: Option<DeviceId>,
    generation: u64,
    token: CancellationToken,
) {
    let Some(session) = inner.upgrade() else {
        return;
    };
    let on_failure = session.on_failure;
    let requests = session.requests.clone();

    let Some(device) = device else {
        warn!("[SESSION] No device configured");
        session.apply(SessionEvent::ConnectFailed);
        if on_failure == FailurePolicy::Stop {
            let _ = requests.send(Request::Shutdown { generation });
        }
        return;
    };

    let mut attempt = session.connection.connect(device);
    drop(session);

    loop {
        let next = tokio::select! {
            biased;
            // Dropping the attempt abandons it at its current await point
            () = token.cancelled() => return,
            next = attempt.next() => next,
        };
        let Some(state) = next else { break };
        let Some(session) = inner.upgrade() else { return };

        match state {
            ConnectionState::Connecting { device } => {
                debug!("[SESSION] Connecting to {}", device);
            }
            ConnectionState::Connected { channel } => {
                info!("[SESSION] Session established on {}", channel);
                session.apply(SessionEvent::ChannelOpened);
            }
            ConnectionState::Failed { reason } => {
                warn!("[SESSION] Connection failed: {}", reason);
                session.apply(SessionEvent::ConnectFailed);
                if on_failure == FailurePolicy::Stop {
                    let _ = requests.send(Request::Shutdown { generation });
                }
            }
            ConnectionState::Idle => {}
        }
    }
}

/// Serves lifecycle requests raised by components of a run
async fn supervise(inner: Weak<Inner>, mut requests: mpsc::UnboundedReceiver<Request>) {
    while let Some(request) = requests.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        let (Request::Restart { generation } | Request::Shutdown { generation }) = request;

        let mut run = inner.lifecycle.lock().await;
        // The run may have been stopped or replaced while we waited for the lock
        if !inner.is_current(generation) {
            debug!("[SESSION] Dropping stale request {:?}", request);
            continue;
        }
        match request {
            Request::Restart { .. } => inner.restart_locked(&mut run).await,
            Request::Shutdown { .. } => inner.stop_locked(&mut run).await,
        }
    }
}
