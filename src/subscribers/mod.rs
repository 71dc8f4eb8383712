//! # Event subscribers for the tasklane runtime.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out and,
//! with the `logging` feature, the [`LogWriter`] subscriber.
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   Driver/Tree ── publish(Event) ──► Bus ──► Runtime listener ──► SubscriberSet::emit()
//!                                                                     │
//!                                                ┌──────────┬─────────┴─┬───────┐
//!                                                ▼          ▼           ▼       ▼
//!                                            LogWriter   Metrics     Custom    ...
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
