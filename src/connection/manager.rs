//! Connection manager: one outbound channel attempt at a time

use crate::transport::{ChannelStream, Transport};
use anyhow::anyhow;
use dashlink_shared::{defaults, ChannelHandle, ConnectionState, DeviceId};
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Service class UUID the adapter exposes its byte stream on
    pub service_uuid: String,
    /// Upper bound on one attempt. `None` waits as long as the transport does.
    pub connect_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            service_uuid: defaults::SPP_SERVICE_UUID.into(),
            connect_timeout: Some(Duration::from_millis(defaults::CONNECT_TIMEOUT_MS)),
        }
    }
}

/// Drives connection attempts and owns the open channel.
///
/// Cheap to clone; clones share the current state and the channel.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    state_tx: watch::Sender<ConnectionState>,
    channel: Mutex<Option<Box<dyn ChannelStream>>>,
    next_channel_id: AtomicU64,
}

enum Step {
    Begin(DeviceId),
    Open(DeviceId, AttemptGuard),
    Done,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                state_tx,
                channel: Mutex::new(None),
                next_channel_id: AtomicU64::new(0),
            }),
        }
    }

    /// Start an attempt to reach `device`.
    ///
    /// Nothing happens until the stream is polled. The stream yields
    /// `Connecting` followed by exactly one of `Connected` or `Failed`, then
    /// ends. Failures are values, never errors. If another attempt is in
    /// flight or a channel is already open the stream yields a single
    /// `Failed` and the current state is left alone. Dropping the stream
    /// mid-attempt abandons it and returns the current state to `Idle`.
    pub fn connect(&self, device: DeviceId) -> BoxStream<'static, ConnectionState> {
        let inner = self.inner.clone();
        stream::unfold(Step::Begin(device), move |step| {
            let inner = inner.clone();
            async move {
                match step {
                    Step::Begin(device) => match inner.begin(&device) {
                        Ok(state) => {
                            let guard = AttemptGuard::new(inner.clone());
                            Some((state, Step::Open(device, guard)))
                        }
                        Err(state) => Some((state, Step::Done)),
                    },
                    Step::Open(device, guard) => {
                        let state = inner.open(&device).await;
                        guard.disarm();
                        Some((state, Step::Done))
                    }
                    Step::Done => None,
                }
            }
        })
        .boxed()
    }

    /// Close the open channel, if any, and return to `Idle`.
    ///
    /// An attempt in flight is not interrupted; drop its stream instead.
    pub async fn disconnect(&self) {
        if let Some(mut channel) = self.inner.channel.lock().await.take() {
            if let Err(e) = channel.shutdown().await {
                debug!("[CONN] Channel shutdown: {}", e);
            }
            info!("[CONN] Channel closed");
        }

        self.inner.state_tx.send_if_modified(|state| match state {
            ConnectionState::Connecting { .. } | ConnectionState::Idle => false,
            _ => {
                *state = ConnectionState::Idle;
                true
            }
        });
    }

    /// Hand the open channel to the upstream decoder. The state stays `Connected`.
    pub async fn take_channel(&self) -> Option<Box<dyn ChannelStream>> {
        self.inner.channel.lock().await.take()
    }

    /// Get the current state
    pub fn current(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }

    /// Observe every state change
    pub fn states(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Name of the underlying transport
    pub fn transport_name(&self) -> &'static str {
        self.inner.transport.name()
    }
}

impl Inner {
    /// Claim the manager for a new attempt
    fn begin(&self, device: &DeviceId) -> Result<ConnectionState, ConnectionState> {
        let connecting = ConnectionState::Connecting {
            device: device.clone(),
        };

        let mut busy_with = None;
        self.state_tx.send_if_modified(|state| {
            if state.is_busy() {
                busy_with = Some(state.clone());
                false
            } else {
                *state = connecting.clone();
                true
            }
        });

        match busy_with {
            None => {
                info!("[CONN] Connecting to {} via {}", device, self.transport.name());
                Ok(connecting)
            }
            Some(current) => {
                warn!("[CONN] Refusing attempt to {} while {}", device, current);
                Err(ConnectionState::Failed {
                    reason: format!("Connection manager busy: {current}"),
                })
            }
        }
    }

    async fn open(&self, device: &DeviceId) -> ConnectionState {
        if let Err(e) = self.transport.cancel_discovery().await {
            return self.fail(format!("Could not cancel discovery: {e}"));
        }

        let attempt = AssertUnwindSafe(
            self.transport
                .open_channel(device, &self.config.service_uuid),
        )
        .catch_unwind();

        let result = match self.config.connect_timeout {
            Some(limit) => match timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Ok(Err(anyhow!("connection timed out after {:?}", limit))),
            },
            None => attempt.await,
        };

        match result {
            Ok(Ok(stream)) => {
                let id = self.next_channel_id.fetch_add(1, Ordering::SeqCst) + 1;
                *self.channel.lock().await = Some(stream);

                let channel = ChannelHandle {
                    id,
                    device: device.clone(),
                };
                info!("[CONN] Connected: {}", channel);
                let state = ConnectionState::Connected { channel };
                self.state_tx.send_replace(state.clone());
                state
            }
            Ok(Err(e)) => self.fail(e.to_string()),
            Err(_) => self.fail("Transport panicked while opening channel".into()),
        }
    }

    fn fail(&self, reason: String) -> ConnectionState {
        warn!("[CONN] Connection failed: {}", reason);
        let state = ConnectionState::Failed { reason };
        self.state_tx.send_replace(state.clone());
        state
    }
}

/// Returns the manager to `Idle` if an attempt is abandoned before it ends
struct AttemptGuard {
    inner: Option<Arc<Inner>>,
}

impl AttemptGuard {
    fn new(inner: Arc<Inner>) -> Self {
        Self { inner: Some(inner) }
    }

    fn disarm(mut self) {
        self.inner = None;
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            debug!("[CONN] Attempt abandoned");
            inner.state_tx.send_if_modified(|state| {
                if matches!(state, ConnectionState::Connecting { .. }) {
                    *state = ConnectionState::Idle;
                    true
                } else {
                    false
                }
            });
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use dashlink_shared::BdAddr;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    #[async_trait]
    impl ChannelStream for DuplexStream {
        async fn shutdown(&mut self) -> Result<()> {
            AsyncWriteExt::shutdown(self).await?;
            Ok(())
        }
    }

    /// What the fake transport does when asked to open a channel
    #[derive(Clone)]
    pub(crate) enum Outcome {
        /// Succeed; the peer end of the stream is parked in `peers`
        Open,
        Fail(&'static str),
        /// Never complete
        Hang,
        Panic,
    }

    pub(crate) struct FakeTransport {
        pub outcome: std::sync::Mutex<Outcome>,
        pub cancel_fails: std::sync::atomic::AtomicBool,
        pub discovery_cancels: AtomicUsize,
        pub opens: AtomicUsize,
        pub peers: std::sync::Mutex<Vec<DuplexStream>>,
    }

    impl FakeTransport {
        pub(crate) fn new(outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                outcome: std::sync::Mutex::new(outcome),
                cancel_fails: std::sync::atomic::AtomicBool::new(false),
                discovery_cancels: AtomicUsize::new(0),
                opens: AtomicUsize::new(0),
                peers: std::sync::Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn set_outcome(&self, outcome: Outcome) {
            *self.outcome.lock().unwrap() = outcome;
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn cancel_discovery(&self) -> Result<()> {
            self.discovery_cancels.fetch_add(1, Ordering::SeqCst);
            if self.cancel_fails.load(Ordering::SeqCst) {
                anyhow::bail!("adapter is off");
            }
            Ok(())
        }

        async fn open_channel(
            &self,
            _device: &DeviceId,
            _service: &str,
        ) -> Result<Box<dyn ChannelStream>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let outcome = self.outcome.lock().unwrap().clone();
            match outcome {
                Outcome::Open => {
                    let (ours, theirs) = tokio::io::duplex(64);
                    self.peers.lock().unwrap().push(theirs);
                    Ok(Box::new(ours))
                }
                Outcome::Fail(reason) => Err(anyhow!(reason)),
                Outcome::Hang => futures::future::pending().await,
                Outcome::Panic => panic!("driver crashed"),
            }
        }

        fn name(&self) -> &'static str {
            "Fake"
        }
    }

    pub(crate) fn device_a() -> DeviceId {
        DeviceId::new("deviceA", BdAddr::new([0x00, 0x1D, 0xA5, 0x68, 0x98, 0x8A]))
    }

    fn manager(transport: Arc<FakeTransport>, connect_timeout: Option<Duration>) -> ConnectionManager {
        ConnectionManager::new(
            transport,
            ConnectionConfig {
                connect_timeout,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_successful_attempt() {
        let transport = FakeTransport::new(Outcome::Open);
        let conn = manager(transport.clone(), None);

        let states: Vec<_> = conn.connect(device_a()).collect().await;
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting { device: device_a() },
                ConnectionState::Connected {
                    channel: ChannelHandle { id: 1, device: device_a() }
                },
            ]
        );
        assert_eq!(transport.discovery_cancels.load(Ordering::SeqCst), 1);
        assert_eq!(conn.current(), states[1]);
    }

    #[tokio::test]
    async fn test_transport_error_becomes_failed_state() {
        let transport = FakeTransport::new(Outcome::Fail("timeout"));
        let conn = manager(transport, None);

        let states: Vec<_> = conn.connect(device_a()).collect().await;
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting { device: device_a() },
                ConnectionState::Failed { reason: "timeout".into() },
            ]
        );
    }

    #[tokio::test]
    async fn test_discovery_cancel_failure() {
        let transport = FakeTransport::new(Outcome::Open);
        transport.cancel_fails.store(true, Ordering::SeqCst);
        let conn = manager(transport.clone(), None);

        let states: Vec<_> = conn.connect(device_a()).collect().await;
        assert!(matches!(
            &states[1],
            ConnectionState::Failed { reason } if reason.contains("adapter is off")
        ));
        assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transport_panic_is_contained() {
        let conn = manager(FakeTransport::new(Outcome::Panic), None);
        let states: Vec<_> = conn.connect(device_a()).collect().await;
        assert_eq!(states.len(), 2);
        assert!(matches!(states[1], ConnectionState::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_times_out() {
        let conn = manager(FakeTransport::new(Outcome::Hang), Some(Duration::from_secs(5)));

        let states: Vec<_> = conn.connect(device_a()).collect().await;
        assert!(matches!(
            &states[1],
            ConnectionState::Failed { reason } if reason.contains("timed out")
        ));
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let transport = FakeTransport::new(Outcome::Open);
        let conn = manager(transport.clone(), None);

        let attempt = conn.connect(device_a());
        assert_eq!(conn.current(), ConnectionState::Idle);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
        drop(attempt);
        assert_eq!(conn.current(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_second_attempt_refused_while_connecting() {
        let conn = manager(FakeTransport::new(Outcome::Hang), None);

        let mut first = conn.connect(device_a());
        assert!(matches!(
            first.next().await,
            Some(ConnectionState::Connecting { .. })
        ));

        let second: Vec<_> = conn.connect(device_a()).collect().await;
        assert_eq!(second.len(), 1);
        assert!(matches!(second[0], ConnectionState::Failed { .. }));
        assert!(matches!(conn.current(), ConnectionState::Connecting { .. }));

        // Abandoning the first attempt frees the manager
        drop(first);
        assert_eq!(conn.current(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_reconnect_requires_disconnect() {
        let transport = FakeTransport::new(Outcome::Open);
        let conn = manager(transport.clone(), None);
        let _: Vec<_> = conn.connect(device_a()).collect().await;

        let refused: Vec<_> = conn.connect(device_a()).collect().await;
        assert_eq!(refused.len(), 1);

        conn.disconnect().await;
        assert_eq!(conn.current(), ConnectionState::Idle);

        let again: Vec<_> = conn.connect(device_a()).collect().await;
        assert!(matches!(
            &again[1],
            ConnectionState::Connected { channel } if channel.id == 2
        ));
    }

    #[tokio::test]
    async fn test_disconnect_closes_channel() {
        let transport = FakeTransport::new(Outcome::Open);
        let conn = manager(transport.clone(), None);
        let _: Vec<_> = conn.connect(device_a()).collect().await;

        conn.disconnect().await;

        let mut peer = transport.peers.lock().unwrap().pop().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(peer.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_take_channel() {
        let transport = FakeTransport::new(Outcome::Open);
        let conn = manager(transport.clone(), None);
        let _: Vec<_> = conn.connect(device_a()).collect().await;

        let mut channel = conn.take_channel().await.unwrap();
        channel.write_all(b"010D\r").await.unwrap();

        let mut peer = transport.peers.lock().unwrap().pop().unwrap();
        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"010D\r");
        assert!(conn.take_channel().await.is_none());
        assert!(matches!(conn.current(), ConnectionState::Connected { .. }));
    }

    #[tokio::test]
    async fn test_never_two_connecting_in_a_row() {
        let transport = FakeTransport::new(Outcome::Fail("no route"));
        let conn = manager(transport.clone(), None);

        let mut emitted = Vec::new();
        for outcome in [
            Outcome::Fail("no route"),
            Outcome::Open,
            Outcome::Open,
            Outcome::Fail("rejected"),
        ] {
            transport.set_outcome(outcome);
            emitted.extend(conn.connect(device_a()).collect::<Vec<_>>().await);
        }
        conn.disconnect().await;
        emitted.extend(conn.connect(device_a()).collect::<Vec<_>>().await);

        for pair in emitted.windows(2) {
            assert!(
                !matches!(
                    (&pair[0], &pair[1]),
                    (ConnectionState::Connecting { .. }, ConnectionState::Connecting { .. })
                ),
                "consecutive Connecting in {emitted:?}"
            );
        }
        assert!(matches!(emitted.last(), Some(ConnectionState::Failed { .. })));
    }
}
