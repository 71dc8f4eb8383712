//! # Runtime events and event sources.
//!
//! - [`Bus`], [`Event`], [`EventKind`]: lifecycle events of the runtime itself,
//!   published by task drivers and the supervision tree and fanned out to
//!   [`Subscribe`](crate::Subscribe) implementations.
//! - [`EventSource`]: turns any recurring notification into channels that can be
//!   read, piped or handed to other tasks like any other [`Inbound`](crate::Inbound).
//!
//! ```text
//! Driver/Tree ──► Bus ──► Runtime listener ──► SubscriberSet ──► subscribers
//!                                   └────────► EventSource<Event> ──► Runtime::lifecycle()
//! ```

mod bus;
mod event;
mod source;

pub use bus::Bus;
pub use event::{Event, EventKind};
pub use source::{DefaultAction, Delivery, Dispatch, EventSource, Notice};
