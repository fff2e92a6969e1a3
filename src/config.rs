//! TOML configuration: target device, connection policy and polling.
//!
//! Also serves as the persisted key/value store the settings view writes
//! the chosen device back to.

use crate::connection::ConnectionConfig;
use crate::session::FailurePolicy;
use anyhow::{Context, Result};
use dashlink_shared::{defaults, BdAddr, DeviceId, Destination};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "DASHLINK_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "dashlink.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceSection,
    pub connection: ConnectionSection,
    pub lifecycle: LifecycleSection,
    pub display: DisplaySection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceSection {
    /// Paired adapter address, `AA:BB:CC:DD:EE:FF`
    pub address: Option<String>,
    pub name: String,
    pub service_uuid: String,
    /// Fixed RFCOMM channel; resolved from `service_uuid` when absent
    pub channel: Option<u8>,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            address: None,
            name: String::new(),
            service_uuid: defaults::SPP_SERVICE_UUID.into(),
            channel: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionSection {
    /// `0` disables the timeout
    pub connect_timeout_ms: u64,
    pub on_failure: FailurePolicy,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
            on_failure: FailurePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleSection {
    pub poll_interval_ms: u64,
    pub power_supply_dir: PathBuf,
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            power_supply_dir: defaults::POWER_SUPPLY_DIR.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplaySection {
    pub start_destination: String,
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            start_destination: Destination::default().name().into(),
        }
    }
}

impl Config {
    /// Pick the config path: explicit argument, then `DASHLINK_CONFIG`, then `./dashlink.toml`
    pub fn resolve_path(arg: Option<String>) -> PathBuf {
        arg.or_else(|| std::env::var(CONFIG_ENV).ok())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text).with_context(|| format!("Parsing {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Reading {}", path.display())),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Write the config back to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text).with_context(|| format!("Writing {}", path.display()))
    }

    /// The configured target, if an address is set
    pub fn device(&self) -> Result<Option<DeviceId>> {
        let Some(address) = &self.device.address else {
            return Ok(None);
        };
        let address: BdAddr = address
            .parse()
            .with_context(|| format!("Invalid device address {address:?}"))?;
        Ok(Some(DeviceId::new(self.device.name.clone(), address)))
    }

    /// Remember `device` as the connection target
    pub fn set_device(&mut self, device: &DeviceId) {
        self.device.address = Some(device.address.to_string());
        self.device.name = device.name.clone();
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        let connect_timeout = match self.connection.connect_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        ConnectionConfig {
            service_uuid: self.device.service_uuid.clone(),
            connect_timeout,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.lifecycle.poll_interval_ms.max(1))
    }

    pub fn start_destination(&self) -> Result<Destination> {
        Ok(self.display.start_destination.parse()?)
    }
}
