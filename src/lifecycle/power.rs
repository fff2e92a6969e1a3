//! Host power-state sources and the stay-awake directive

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashlink_shared::ChargeSource;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Reports what is powering the host
#[async_trait]
pub trait PowerSource: Send + Sync {
    async fn current_charge_source(&self) -> Result<ChargeSource>;
}

/// Receiver of the stay-awake decision (usually the display surface)
pub trait StayAwake: Send + Sync {
    fn set_stay_awake(&self, on: bool);
}

/// Reads the Linux `power_supply` class
///
/// An online supply of type `USB*`, `Mains` or `Wireless` wins in that
/// order. A battery with nothing online means `None`; no supplies at all
/// means `Unknown`.
pub struct SysfsPowerSource {
    root: PathBuf,
}

impl SysfsPowerSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

async fn read_trimmed(path: PathBuf) -> Option<String> {
    tokio::fs::read_to_string(path)
        .await
        .ok()
        .map(|s| s.trim().to_string())
}

#[async_trait]
impl PowerSource for SysfsPowerSource {
    async fn current_charge_source(&self) -> Result<ChargeSource> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Reading {}", self.root.display()))?;

        let (mut usb, mut ac, mut wireless, mut battery) = (false, false, false, false);
        while let Some(entry) = entries.next_entry().await? {
            let dir = entry.path();
            let Some(kind) = read_trimmed(dir.join("type")).await else {
                continue;
            };
            if kind == "Battery" {
                battery = true;
                continue;
            }
            let online = read_trimmed(dir.join("online")).await.as_deref() == Some("1");
            if !online {
                continue;
            }
            match kind.as_str() {
                k if k.starts_with("USB") => usb = true,
                "Mains" => ac = true,
                "Wireless" => wireless = true,
                _ => {}
            }
        }

        Ok(if usb {
            ChargeSource::Usb
        } else if ac {
            ChargeSource::Ac
        } else if wireless {
            ChargeSource::Wireless
        } else if battery {
            ChargeSource::None
        } else {
            ChargeSource::Unknown
        })
    }
}

/// Keeps the latest directive and logs when it flips
#[derive(Default)]
pub struct TracingStayAwake {
    on: AtomicBool,
}

impl TracingStayAwake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }
}

impl StayAwake for TracingStayAwake {
    fn set_stay_awake(&self, on: bool) {
        if self.on.swap(on, Ordering::SeqCst) != on {
            info!("[POWER] Keep screen on: {}", on);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn supply(root: &Path, name: &str, kind: &str, online: Option<&str>) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("type"), format!("{kind}\n")).unwrap();
        if let Some(online) = online {
            fs::write(dir.join("online"), format!("{online}\n")).unwrap();
        }
    }

    #[tokio::test]
    async fn test_usb_online() {
        let root = tempfile::tempdir().unwrap();
        supply(root.path(), "BAT0", "Battery", None);
        supply(root.path(), "AC", "Mains", Some("0"));
        supply(root.path(), "usb", "USB_PD", Some("1"));

        let source = SysfsPowerSource::new(root.path());
        assert_eq!(source.current_charge_source().await.unwrap(), ChargeSource::Usb);
    }

    #[tokio::test]
    async fn test_mains_online() {
        let root = tempfile::tempdir().unwrap();
        supply(root.path(), "AC", "Mains", Some("1"));
        let source = SysfsPowerSource::new(root.path());
        assert_eq!(source.current_charge_source().await.unwrap(), ChargeSource::Ac);
    }

    #[tokio::test]
    async fn test_battery_only() {
        let root = tempfile::tempdir().unwrap();
        supply(root.path(), "BAT0", "Battery", None);
        supply(root.path(), "AC", "Mains", Some("0"));
        let source = SysfsPowerSource::new(root.path());
        assert_eq!(source.current_charge_source().await.unwrap(), ChargeSource::None);
    }

    #[tokio::test]
    async fn test_empty_and_missing() {
        let root = tempfile::tempdir().unwrap();
        let source = SysfsPowerSource::new(root.path());
        assert_eq!(
            source.current_charge_source().await.unwrap(),
            ChargeSource::Unknown
        );

        let missing = SysfsPowerSource::new(root.path().join("nope"));
        assert!(missing.current_charge_source().await.is_err());
    }

    #[test]
    fn test_tracing_stay_awake() {
        let awake = TracingStayAwake::new();
        assert!(!awake.is_on());
        awake.set_stay_awake(true);
        awake.set_stay_awake(true);
        assert!(awake.is_on());
        awake.set_stay_awake(false);
        assert!(!awake.is_on());
    }
}
