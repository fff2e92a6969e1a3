//! Bluetooth device discovery for finding bus adapters

use anyhow::Result;
use bluer::{Adapter, Address, Device};
use dashlink_shared::{BdAddr, DeviceId};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::timeout;
use tracing::{debug, info};

/// Configuration for Bluetooth discovery
#[derive(Debug, Clone)]
pub struct BtDiscoveryConfig {
    /// How long to scan for devices
    pub scan_duration: Duration,
    /// Known adapter addresses (always reported)
    pub known_devices: Vec<Address>,
    /// Device name prefixes to match
    pub name_prefixes: Vec<String>,
}

impl Default for BtDiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(10),
            known_devices: Vec::new(),
            name_prefixes: vec!["OBD".into(), "CANServer".into(), "Vgate".into()],
        }
    }
}

/// Information about a discovered adapter
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub id: DeviceId,
    /// Signal strength (if available)
    pub rssi: Option<i16>,
}

/// Bluetooth device discovery service.
///
/// A scan runs as an owned task; [`BtDiscovery::cancel`] aborts it, which
/// drops the discovery session and stops the adapter scanning.
pub struct BtDiscovery {
    config: BtDiscoveryConfig,
    scan: Mutex<Option<AbortHandle>>,
}

impl BtDiscovery {
    /// Create a new discovery service
    pub fn new(config: BtDiscoveryConfig) -> Self {
        Self {
            config,
            scan: Mutex::new(None),
        }
    }

    /// Start a background scan, replacing any scan already running.
    ///
    /// The returned handle resolves to the devices found once the scan
    /// completes; a failed scan resolves to an empty list.
    pub fn start(&self, adapter: Adapter) -> JoinHandle<Vec<DiscoveredDevice>> {
        let config = self.config.clone();
        let task = tokio::spawn(async move {
            match scan(&adapter, &config).await {
                Ok(devices) => {
                    info!("[BT] Discovery found {} device(s)", devices.len());
                    rank(devices)
                }
                Err(e) => {
                    debug!("[BT] Discovery ended: {}", e);
                    Vec::new()
                }
            }
        });

        if let Ok(mut slot) = self.scan.lock() {
            if let Some(previous) = slot.replace(task.abort_handle()) {
                previous.abort();
            }
        }
        task
    }

    /// Abort the running scan, if any. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        let task = self.scan.lock().ok().and_then(|mut slot| slot.take());
        match task {
            Some(task) if !task.is_finished() => {
                task.abort();
                info!("[BT] Discovery cancelled");
                true
            }
            _ => false,
        }
    }
}

impl Drop for BtDiscovery {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn scan(adapter: &Adapter, config: &BtDiscoveryConfig) -> Result<Vec<DiscoveredDevice>> {
    let mut devices = Vec::new();
    let mut seen: HashSet<Address> = HashSet::new();

    let discover = adapter.discover_devices().await?;
    tokio::pin!(discover);

    // Timeout is expected, not an error
    let _ = timeout(config.scan_duration, async {
        while let Some(evt) = discover.next().await {
            if let bluer::AdapterEvent::DeviceAdded(addr) = evt {
                if !seen.insert(addr) {
                    continue;
                }
                if let Ok(device) = adapter.device(addr) {
                    if let Some(found) = inspect(&device, config).await {
                        devices.push(found);
                    }
                }
            }
        }
    })
    .await;

    Ok(devices)
}

/// Strongest signal first; devices without a reading go last
fn rank(mut devices: Vec<DiscoveredDevice>) -> Vec<DiscoveredDevice> {
    devices.sort_by_key(|d| std::cmp::Reverse(d.rssi.unwrap_or(i16::MIN)));
    devices
}

/// Report the device if it is known or its name matches a prefix
async fn inspect(device: &Device, config: &BtDiscoveryConfig) -> Option<DiscoveredDevice> {
    let addr = device.address();
    let name = device.name().await.ok().flatten().unwrap_or_default();

    let known = config.known_devices.contains(&addr);
    let matched = config
        .name_prefixes
        .iter()
        .any(|prefix| name.starts_with(prefix.as_str()));
    if !known && !matched {
        return None;
    }

    Some(DiscoveredDevice {
        id: DeviceId::new(name, BdAddr::new(addr.0)),
        rssi: device.rssi().await.ok().flatten(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BtDiscoveryConfig::default();
        assert_eq!(config.scan_duration, Duration::from_secs(10));
        assert!(config.known_devices.is_empty());
        assert!(config.name_prefixes.iter().any(|p| p == "OBD"));
    }

    #[tokio::test]
    async fn test_cancel_without_scan() {
        let discovery = BtDiscovery::new(BtDiscoveryConfig::default());
        assert!(!discovery.cancel());
    }

    fn device(name: &str, last: u8, rssi: Option<i16>) -> DiscoveredDevice {
        DiscoveredDevice {
            id: DeviceId::new(name, BdAddr::new([0, 0, 0, 0, 0, last])),
            rssi,
        }
    }

    #[test]
    fn test_rank_strongest_first() {
        let ranked = rank(vec![
            device("OBD-far", 1, Some(-90)),
            device("OBD-silent", 2, None),
            device("OBD-near", 3, Some(-40)),
        ]);

        let names: Vec<_> = ranked.iter().map(|d| d.id.name.as_str()).collect();
        assert_eq!(names, ["OBD-near", "OBD-far", "OBD-silent"]);
    }
}
