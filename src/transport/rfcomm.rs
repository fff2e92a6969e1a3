//! RFCOMM transport implementation for Bluetooth bus adapters

use crate::transport::bt_discovery::{BtDiscovery, BtDiscoveryConfig, DiscoveredDevice};
use crate::transport::traits::{ChannelStream, Transport};
use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use bluer::rfcomm::{
    ConnectRequest, Profile, ProfileHandle, Role, SocketAddr as RfcommAddr, Stream as RfcommStream,
};
use bluer::{Adapter, Address, Session, Uuid};
use dashlink_shared::DeviceId;
use futures::StreamExt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// RFCOMM stream wrapper implementing ChannelStream
pub struct RfcommChannel {
    inner: RfcommStream,
    peer_addr: Address,
    /// Keeps the client profile registered while the channel is open
    _profile: Option<ProfileHandle>,
}

impl RfcommChannel {
    /// Create a new RFCOMM channel
    pub fn new(stream: RfcommStream, peer_addr: Address) -> Self {
        Self {
            inner: stream,
            peer_addr,
            _profile: None,
        }
    }

    fn with_profile(stream: RfcommStream, peer_addr: Address, profile: ProfileHandle) -> Self {
        Self {
            inner: stream,
            peer_addr,
            _profile: Some(profile),
        }
    }

    /// Get the peer Bluetooth address
    pub fn peer_address(&self) -> Address {
        self.peer_addr
    }
}

impl AsyncRead for RfcommChannel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RfcommChannel {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl ChannelStream for RfcommChannel {
    async fn shutdown(&mut self) -> Result<()> {
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await?;
        Ok(())
    }
}

/// Configuration for the RFCOMM transport
#[derive(Debug, Clone, Default)]
pub struct RfcommConfig {
    /// Fixed RFCOMM channel. `None` resolves the channel from the service UUID.
    pub channel: Option<u8>,
    /// Discovery configuration
    pub discovery: BtDiscoveryConfig,
}

/// RFCOMM transport over BlueZ
pub struct RfcommTransport {
    config: RfcommConfig,
    session: Session,
    adapter: Adapter,
    discovery: BtDiscovery,
}

impl RfcommTransport {
    /// Connect to BlueZ and power up the default adapter
    pub async fn new(config: RfcommConfig) -> Result<Self> {
        let session = Session::new().await.context("BlueZ session unavailable")?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        info!("[BT] Using adapter {}", adapter.name());

        Ok(Self {
            discovery: BtDiscovery::new(config.discovery.clone()),
            config,
            session,
            adapter,
        })
    }

    /// Scan for adapters in the background (used by the settings view).
    /// Await the handle for the ranked result.
    pub fn start_discovery(&self) -> JoinHandle<Vec<DiscoveredDevice>> {
        self.discovery.start(self.adapter.clone())
    }

    async fn open_fixed(&self, addr: Address, channel: u8) -> Result<RfcommChannel> {
        let socket_addr = RfcommAddr::new(addr, channel);
        debug!("[BT] Connecting to {} channel {}", addr, channel);

        let stream = RfcommStream::connect(socket_addr)
            .await
            .map_err(|e| anyhow!("RFCOMM connect failed: {}", e))?;
        Ok(RfcommChannel::new(stream, addr))
    }

    /// Let BlueZ resolve the service record and hand us the socket
    async fn open_profile(&self, addr: Address, uuid: Uuid) -> Result<RfcommChannel> {
        let profile = Profile {
            uuid,
            role: Some(Role::Client),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        let mut handle = self
            .session
            .register_profile(profile)
            .await
            .map_err(|e| anyhow!("Profile registration failed: {}", e))?;

        let device = self.adapter.device(addr)?;
        debug!("[BT] Connecting to {} service {}", addr, uuid);

        let connect = async {
            device
                .connect_profile(&uuid)
                .await
                .map_err(|e| anyhow!("Service connect failed: {}", e))
        };
        let request = connect_then_accept(connect, next_request_from(&mut handle, addr)).await?;
        let stream = request
            .accept()
            .map_err(|e| anyhow!("Accepting channel failed: {}", e))?;

        Ok(RfcommChannel::with_profile(stream, addr, handle))
    }
}

/// Drive the profile connect and the wait for its socket together.
///
/// The first failure ends the attempt: after a rejected connect the profile
/// stays registered and the socket never arrives.
async fn connect_then_accept<R>(
    connect: impl Future<Output = Result<()>>,
    request: impl Future<Output = Result<R>>,
) -> Result<R> {
    let ((), request) = tokio::try_join!(connect, request)?;
    Ok(request)
}

/// Wait for the profile connection belonging to `addr`. Others are dropped (rejected).
async fn next_request_from(handle: &mut ProfileHandle, addr: Address) -> Result<ConnectRequest> {
    while let Some(request) = handle.next().await {
        if request.device() == addr {
            return Ok(request);
        }
        debug!("[BT] Ignoring profile connection from {}", request.device());
    }
    Err(anyhow!("Profile unregistered before {} connected", addr))
}

#[async_trait]
impl Transport for RfcommTransport {
    async fn cancel_discovery(&self) -> Result<()> {
        self.discovery.cancel();
        Ok(())
    }

    async fn open_channel(
        &self,
        device: &DeviceId,
        service: &str,
    ) -> Result<Box<dyn ChannelStream>> {
        let addr = Address::new(device.address.octets());

        let channel = match self.config.channel {
            Some(channel) => self.open_fixed(addr, channel).await?,
            None => {
                let uuid: Uuid = service
                    .parse()
                    .with_context(|| format!("Invalid service UUID {service:?}"))?;
                self.open_profile(addr, uuid).await?
            }
        };

        info!("[BT] Connected to {} ({})", device, channel.peer_address());
        Ok(Box::new(channel))
    }

    fn name(&self) -> &'static str {
        "Bluetooth"
    }
}
