//! # Lifecycle event bus.
//!
//! Every task driver, the supervision tree and the runtime publish [`Event`]s on
//! one [`Bus`]. The runtime keeps two listeners on it: one feeds the
//! [`SubscriberSet`](crate::SubscriberSet), the other mirrors events into the
//! lifecycle [`EventSource`](crate::EventSource).
//!
//! ```text
//!   driver #1 ──┐
//!   driver #N ──┼──► Bus (broadcast ring) ──┬──► subscriber listener ──► SubscriberSet
//!   Tree      ──┤                           └──► lifecycle mirror    ──► Runtime::lifecycle()
//!   Runtime   ──┘
//! ```
//!
//! Publishing never waits. A listener that falls more than the ring capacity
//! behind gets `RecvError::Lagged(n)` and skips the `n` oldest events; an event
//! published while nobody listens is gone.

use tokio::sync::broadcast;

use super::event::Event;

/// Shared publisher of lifecycle events; clones publish into the same ring.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus whose ring holds `capacity` events (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Event>(capacity);
        Self { tx }
    }

    /// Publishes `ev`; returns how many listeners will see it.
    pub fn publish(&self, ev: Event) -> usize {
        self.tx.send(ev).unwrap_or(0)
    }

    /// Starts listening; only events published from now on are received.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
