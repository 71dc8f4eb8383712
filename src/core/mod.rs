//! Runtime core: the supervision tree, task drivers and abort propagation.
//!
//! The public API from this module is [`Runtime`] (with [`RuntimeBuilder`]),
//! [`Config`] and [`Orphans`].
//!
//! Internal modules:
//! - [`tree`]: arena of task records, spawn/close/adopt and process abort;
//! - [`driver`]: runs one entry future and routes its outcome;
//! - [`abort`]: places aborts on sides and climbs the tree until one is handled;
//! - [`orphans`]: children left behind by an aborting task;
//! - [`runtime`]: host handle (spawn, wait, shutdown, lifecycle events);
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod abort;
mod builder;
mod config;
mod driver;
pub(crate) mod orphans;
mod runtime;
mod shutdown;
pub(crate) mod tree;

pub use builder::RuntimeBuilder;
pub use config::Config;
pub use orphans::Orphans;
pub use runtime::Runtime;
