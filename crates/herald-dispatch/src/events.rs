//! Status event bus.
//!
//! One typed broadcast channel instead of ad-hoc callback wiring: every
//! component publishes [`StatusEvent`]s here and the presentation layer
//! (dashboard, log mirror) subscribes.

use herald_core::types::StatusEvent;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct StatusBus {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Lagging or absent subscribers are not errors.
    pub fn emit(&self, event: StatusEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new(256)
    }
}
