//! Connection-level types: device addressing and the per-attempt state.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing a Bluetooth device address
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Expected 6 colon-separated octets, got {0}")]
    WrongLength(usize),

    #[error("Invalid octet {0:?}")]
    InvalidOctet(String),
}

/// A 48-bit Bluetooth device address, most significant octet first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BdAddr(pub [u8; 6]);

impl BdAddr {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for BdAddr {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(AddressError::WrongLength(parts.len()));
        }

        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(&parts) {
            if part.len() != 2 {
                return Err(AddressError::InvalidOctet(part.to_string()));
            }
            *slot = u8::from_str_radix(part, 16)
                .map_err(|_| AddressError::InvalidOctet(part.to_string()))?;
        }
        Ok(Self(octets))
    }
}

/// Target of a connection attempt. Supplied by the caller, never chosen by the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId {
    /// Human-readable label (the paired device's alias)
    pub name: String,
    /// Transport address
    pub address: BdAddr,
}

impl DeviceId {
    pub fn new(name: impl Into<String>, address: BdAddr) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} ({})", self.name, self.address)
        }
    }
}

/// Identifies an open channel. The stream itself stays with the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    /// Monotonic per-manager channel number
    pub id: u64,
    /// Device the channel is connected to
    pub device: DeviceId,
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel #{} to {}", self.id, self.device)
    }
}

/// State of the connection to the bus adapter
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No attempt in progress and no open channel
    #[default]
    Idle,
    /// Attempt in progress
    Connecting { device: DeviceId },
    /// Channel open
    Connected { channel: ChannelHandle },
    /// Attempt ended without a channel
    Failed { reason: String },
}

impl ConnectionState {
    /// Whether this state ends an attempt
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Connected { .. } | Self::Failed { .. })
    }

    /// Whether an attempt is in flight or a channel is held
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Connecting { .. } | Self::Connected { .. })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting { device } => write!(f, "connecting to {device}"),
            Self::Connected { channel } => write!(f, "connected ({channel})"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip() {
        let addr: BdAddr = "00:1d:a5:68:98:8a".parse().unwrap();
        assert_eq!(addr.octets(), [0x00, 0x1D, 0xA5, 0x68, 0x98, 0x8A]);
        assert_eq!(addr.to_string(), "00:1D:A5:68:98:8A");
    }

    #[test]
    fn test_address_rejects_garbage() {
        assert_eq!(
            "00:11:22".parse::<BdAddr>(),
            Err(AddressError::WrongLength(3))
        );
        assert!(matches!(
            "00:11:22:33:44:GG".parse::<BdAddr>(),
            Err(AddressError::InvalidOctet(_))
        ));
        assert!(matches!(
            "00:11:22:33:44:555".parse::<BdAddr>(),
            Err(AddressError::InvalidOctet(_))
        ));
    }

    #[test]
    fn test_terminal_states() {
        let device = DeviceId::new("OBDII", BdAddr::new([1, 2, 3, 4, 5, 6]));
        assert!(!ConnectionState::Idle.is_terminal());
        assert!(!ConnectionState::Connecting { device: device.clone() }.is_terminal());
        assert!(ConnectionState::Failed { reason: "timeout".into() }.is_terminal());
        assert!(ConnectionState::Connected {
            channel: ChannelHandle { id: 1, device }
        }
        .is_terminal());
    }
}
