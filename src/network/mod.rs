//! Local access-point monitoring
//!
//! Normalises vendor access-point states to enabled / not enabled and
//! requests a pipeline restart when the access point comes up.

mod source;
mod watcher;

pub use source::{ApEventSource, BroadcastApSource};
pub use watcher::{ApTransitionDetector, NetworkStateWatcher, RestartTrigger, SharedDetector};
