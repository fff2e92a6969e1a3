//! Transport trait abstraction for the short-range link

use anyhow::Result;
use async_trait::async_trait;
use dashlink_shared::DeviceId;
use tokio::io::{AsyncRead, AsyncWrite};

/// A reliable, ordered byte stream to the bus adapter
#[async_trait]
pub trait ChannelStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Close the channel gracefully
    async fn shutdown(&mut self) -> Result<()>;
}

/// Platform capability for reaching an already-paired device.
///
/// Both operations may block for a long time; callers run them on the
/// runtime's I/O context and never hold locks across them.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stop any device scan in progress. Scanning disturbs direct connects.
    async fn cancel_discovery(&self) -> Result<()>;

    /// Open a channel to `device` for the given service class UUID
    async fn open_channel(&self, device: &DeviceId, service: &str)
        -> Result<Box<dyn ChannelStream>>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
