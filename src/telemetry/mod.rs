//! Live Telemetry
//!
//! Concurrent last-value-wins registry of decoded signals and the ingest
//! path that feeds it.

mod ingest;
mod registry;

pub use ingest::{spawn_ingest, SignalIngest};
pub use registry::{Subscription, TelemetryRegistry};
