//! Current display destination, observable by the front end

use dashlink_shared::{Destination, DestinationError};
use tokio::sync::watch;
use tracing::info;

/// Holds which view the display should show
pub struct Navigator {
    tx: watch::Sender<Destination>,
}

impl Navigator {
    pub fn new(start: Destination) -> Self {
        let (tx, _) = watch::channel(start);
        Self { tx }
    }

    /// Switch views. Returns whether the destination changed.
    pub fn navigate(&self, destination: Destination) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == destination {
                false
            } else {
                *current = destination;
                true
            }
        });
        if changed {
            info!("[NAV] Showing {}", destination);
        }
        changed
    }

    /// Switch views by name, as received from a text command
    pub fn navigate_to(&self, name: &str) -> Result<Destination, DestinationError> {
        let destination: Destination = name.parse()?;
        self.navigate(destination);
        Ok(destination)
    }

    pub fn current(&self) -> Destination {
        *self.tx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<Destination> {
        self.tx.subscribe()
    }
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new(Destination::default())
    }
}
