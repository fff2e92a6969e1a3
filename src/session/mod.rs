//! Session lifecycle
//!
//! The owning controller that starts, stops and restarts the connection
//! pipeline as one unit.

mod controller;

pub use controller::{FailurePolicy, Session, SessionConfig, SessionDeps};
