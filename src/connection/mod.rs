//! Connection management for the bus adapter link
//!
//! This module handles:
//! - Single outbound channel attempts, reported as a stream of states
//! - The observable current connection state
//! - Ownership of the open channel

mod manager;

pub use manager::{ConnectionConfig, ConnectionManager};

#[cfg(test)]
pub(crate) use manager::tests as fakes;
