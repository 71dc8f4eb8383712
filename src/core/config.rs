//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for the runtime.
//!
//! Config is used in two ways:
//! 1. **Runtime creation**: `Runtime::builder(config)`
//! 2. **Channel defaults**: every spawned task's channel pair uses `high_water_mark`
//!
//! ## Sentinel values
//! - `grace = 0s` → shutdown does not wait for drivers to exit
//! - `high_water_mark = 0` → task sides are rendezvous channels
//! - `handler_turns = 0` → treated as 1

use std::time::Duration;

/// Global configuration for the runtime.
///
/// ## Field semantics
/// - `grace`: maximum wait for task drivers to exit on shutdown
/// - `high_water_mark`: backpressure threshold of each side of a task's channel pair
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
/// - `lifecycle_high_water_mark`: buffer of each [`Runtime::lifecycle`](crate::Runtime::lifecycle) channel
/// - `handler_turns`: scheduler turns a fault may wait for a reader before it counts as unhandled
///
/// ## Notes
/// All fields are public for flexibility. Prefer using helper accessors to avoid
/// sprinkling sentinel checks across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum time to wait for graceful shutdown before giving up.
    ///
    /// When shutdown is requested:
    /// - every task is closed and its driver cancelled
    /// - the runtime waits up to `grace` for the drivers to exit
    /// - if that takes longer, returns `RuntimeError::GraceExceeded`
    pub grace: Duration,

    /// High-water mark of both sides of every task's channel pair.
    pub high_water_mark: usize,

    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow listeners that lag behind more than `bus_capacity` messages will
    /// receive `Lagged` and skip older items. Minimum value is 1 (enforced by Bus).
    pub bus_capacity: usize,

    /// High-water mark of each lifecycle event channel.
    pub lifecycle_high_water_mark: usize,

    /// Scheduler turns a placed fault waits for a read before it is unhandled.
    ///
    /// A turn is one `tokio::task::yield_now` of the propagating driver. Adopting
    /// orphans gets the same number of turns once the abort was observed.
    pub handler_turns: usize,
}

impl Config {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the handler window clamped to a minimum of one turn.
    #[inline]
    pub fn handler_turns_clamped(&self) -> usize {
        self.handler_turns.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `grace = 60s`
    /// - `high_water_mark = 16`
    /// - `bus_capacity = 1024`
    /// - `lifecycle_high_water_mark = 256`
    /// - `handler_turns = 1`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            high_water_mark: 16,
            bus_capacity: 1024,
            lifecycle_high_water_mark: 256,
            handler_turns: 1,
        }
    }
}
