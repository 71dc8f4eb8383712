//! # Subscriber contract.
//!
//! A [`Subscribe`] implementation receives every runtime [`Event`] (spawns,
//! aborts, adoptions, shutdown progress) from its own worker task. The worker is
//! fed through a bounded queue owned by the [`SubscriberSet`](crate::SubscriberSet);
//! its size is the subscriber's [`queue_capacity`](Subscribe::queue_capacity).
//!
//! A slow subscriber only delays itself. When its queue is full, further events
//! are dropped for it alone and a `SubscriberOverflow` event is published. A
//! panic inside `on_event` is caught and reported as `SubscriberPanicked`.
//!
//! ## Example
//! ```rust
//! use tasklane::{Event, EventKind, Subscribe};
//!
//! struct AbortCounter(std::sync::atomic::AtomicUsize);
//!
//! #[async_trait::async_trait]
//! impl Subscribe for AbortCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::TaskAborting {
//!             self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         }
//!     }
//!     fn name(&self) -> &'static str { "abort-counter" }
//!     fn queue_capacity(&self) -> usize { 512 }
//! }
//! ```

use crate::events::Event;
use async_trait::async_trait;

/// Receives runtime events.
///
/// `on_event` runs on the subscriber's worker; blocking inside it stalls that
/// worker's tokio thread.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event. Events arrive in publication order.
    async fn on_event(&self, event: &Event);

    /// Name used in `SubscriberOverflow` / `SubscriberPanicked` events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Events that may wait for this subscriber before new ones are dropped.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
