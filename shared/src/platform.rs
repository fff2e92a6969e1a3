//! Platform state reported by the host: charger source and access-point state.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown charge source: {0}")]
pub struct ChargeSourceError(pub String);

/// What is currently powering the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChargeSource {
    Usb,
    Ac,
    Wireless,
    /// Running on battery
    None,
    /// Power state could not be read
    #[default]
    Unknown,
}

impl ChargeSource {
    /// Whether the host is on external power. Unknown counts as unplugged.
    pub fn is_plugged(self) -> bool {
        matches!(self, Self::Usb | Self::Ac | Self::Wireless)
    }
}

impl fmt::Display for ChargeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Usb => "usb",
            Self::Ac => "ac",
            Self::Wireless => "wireless",
            Self::None => "none",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

impl FromStr for ChargeSource {
    type Err = ChargeSourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "usb" => Ok(Self::Usb),
            "ac" | "mains" => Ok(Self::Ac),
            "wireless" => Ok(Self::Wireless),
            "none" | "battery" => Ok(Self::None),
            "unknown" => Ok(Self::Unknown),
            other => Err(ChargeSourceError(other.to_string())),
        }
    }
}

/// Wireless access-point (hotspot) state
///
/// Vendors report the same states in two numbering families: 0..=4 and
/// 10..=14. Both map onto the same variants; anything else is `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApState {
    Disabling,
    Disabled,
    Enabling,
    Enabled,
    Failed,
    Unknown(i32),
}

impl ApState {
    /// Decode a raw platform state code
    pub fn from_code(code: i32) -> Self {
        let base = match code {
            0..=4 => code,
            10..=14 => code - 10,
            _ => return Self::Unknown(code),
        };
        match base {
            0 => Self::Disabling,
            1 => Self::Disabled,
            2 => Self::Enabling,
            3 => Self::Enabled,
            _ => Self::Failed,
        }
    }

    /// Coarse category. Only a fully enabled access point counts.
    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled)
    }
}

/// A single access-point state notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApStateChange {
    pub previous: ApState,
    pub current: ApState,
}

impl ApStateChange {
    pub fn new(previous: ApState, current: ApState) -> Self {
        Self { previous, current }
    }

    pub fn from_codes(previous: i32, current: i32) -> Self {
        Self::new(ApState::from_code(previous), ApState::from_code(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugged_sources() {
        assert!(ChargeSource::Usb.is_plugged());
        assert!(ChargeSource::Ac.is_plugged());
        assert!(ChargeSource::Wireless.is_plugged());
        assert!(!ChargeSource::None.is_plugged());
        assert!(!ChargeSource::Unknown.is_plugged());
    }

    #[test]
    fn test_charge_source_parse() {
        assert_eq!("Mains".parse::<ChargeSource>(), Ok(ChargeSource::Ac));
        assert_eq!("USB".parse::<ChargeSource>(), Ok(ChargeSource::Usb));
        assert!("solar".parse::<ChargeSource>().is_err());
    }

    #[test]
    fn test_both_code_families_normalize() {
        assert_eq!(ApState::from_code(3), ApState::Enabled);
        assert_eq!(ApState::from_code(13), ApState::Enabled);
        assert_eq!(ApState::from_code(11), ApState::Disabled);
        assert_eq!(ApState::from_code(12), ApState::Enabling);
        assert_eq!(ApState::from_code(14), ApState::Failed);
        assert_eq!(ApState::from_code(23), ApState::Unknown(23));
        assert_eq!(ApState::from_code(-1), ApState::Unknown(-1));
    }

    #[test]
    fn test_coarse_category() {
        assert!(ApState::from_code(13).is_enabled());
        assert!(!ApState::from_code(12).is_enabled());
        assert!(!ApState::Unknown(3).is_enabled());
    }
}
