//! dashlink Shared Types
//!
//! This crate provides the domain types shared between the companion display
//! core and any front end that renders it: connection states, device
//! addressing, signal values, platform state enums and the session phase
//! state machine.

pub mod connection;
pub mod navigation;
pub mod platform;
pub mod signal;
pub mod state_machine;

// Re-export commonly used types at crate root
pub use connection::{AddressError, BdAddr, ChannelHandle, ConnectionState, DeviceId};
pub use navigation::{Destination, DestinationError};
pub use platform::{ApState, ApStateChange, ChargeSource, ChargeSourceError};
pub use signal::{Signal, SignalValue, Snapshot};
pub use state_machine::{SessionEvent, SessionPhase, SessionStateMachine, TransitionResult};

/// Default timing and addressing parameters
pub mod defaults {
    /// Interval between power-state samples
    pub const POLL_INTERVAL_MS: u64 = 1000;

    /// Upper bound on a single channel-open attempt
    pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

    /// Serial Port Profile service class, used by OBD/CAN bridge dongles
    pub const SPP_SERVICE_UUID: &str = "00001101-0000-1000-8000-00805F9B34FB";

    /// Where Linux exposes charger state
    pub const POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";
}
