//! Progress observers
//!
//! The engine reports progress as [`Event`] values through a
//! [`ProgressObserver`]. Observation is fire-and-forget: a slow or absent
//! listener never blocks or fails a download.

use tokio::sync::broadcast;

use crate::types::Event;

/// Sink for progress events
///
/// `notify` must be cheap and non-blocking; it is called from the engine's
/// worker tasks while downloads are in flight.
pub trait ProgressObserver: Send + Sync {
    /// Deliver one event. Implementations must not fail or block.
    fn notify(&self, event: Event);
}

/// Observer that fans events out over a tokio broadcast channel
///
/// Any number of receivers can [`subscribe`](Self::subscribe); slow
/// receivers lag (dropping their oldest events) rather than slowing the
/// engine down.
#[derive(Debug)]
pub struct BroadcastObserver {
    event_tx: broadcast::Sender<Event>,
}

impl BroadcastObserver {
    /// Create an observer whose channel buffers up to `capacity` events per
    /// receiver.
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self { event_tx }
    }

    /// Open a new event stream. Only events sent after this call are
    /// delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }
}

impl Default for BroadcastObserver {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl ProgressObserver for BroadcastObserver {
    fn notify(&self, event: Event) {
        // Send fails only when no receiver exists; progress is advisory.
        self.event_tx.send(event).ok();
    }
}

/// Observer that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl ProgressObserver for NullObserver {
    fn notify(&self, _event: Event) {}
}
