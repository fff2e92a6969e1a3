//! Display destinations

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown destination: {0:?} (expected one of dash, info, settings)")]
pub struct DestinationError(pub String);

/// The views a front end can show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Destination {
    /// Gauge cluster
    #[default]
    Dash,
    /// Raw signal list and connection controls
    Info,
    Settings,
}

impl Destination {
    pub const ALL: [Destination; 3] = [Self::Dash, Self::Info, Self::Settings];

    pub fn name(self) -> &'static str {
        match self {
            Self::Dash => "dash",
            Self::Info => "info",
            Self::Settings => "settings",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Destination {
    type Err = DestinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DestinationError(s.to_string()))
    }
}
