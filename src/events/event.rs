//! # Runtime events emitted by the supervision tree and task drivers.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Lifecycle events**: spawned, running, closed
//! - **Failure events**: aborting, propagated, handled, process aborted
//! - **Supervision events**: adoption and orphan shutdown
//! - **Runtime events**: shutdown, grace, subscriber health
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use tasklane::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TaskAborting)
//!     .with_module("worker")
//!     .with_reason("boom");
//!
//! assert_eq!(ev.kind, EventKind::TaskAborting);
//! assert_eq!(ev.module.as_deref(), Some("worker"));
//! assert_eq!(ev.reason.as_deref(), Some("boom"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::tasks::TaskId;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `subscriber`, `reason` (panic message).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `subscriber`, `reason` ("full" / "closed").
    SubscriberOverflow,

    // === Shutdown events ===
    /// Shutdown requested (explicit call or OS signal).
    ShutdownRequested,

    /// All task drivers exited within the configured grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some drivers did not exit in time.
    GraceExceeded,

    // === Task lifecycle ===
    /// Task record created and channels built.
    ///
    /// Sets: `task`, `parent` (absent for roots), `module`.
    TaskSpawned,

    /// Entry function launched (Initializing → Running).
    ///
    /// Sets: `task`, `module`.
    TaskRunning,

    /// Task reached Closed and its record was reclaimed.
    ///
    /// Sets: `task`, `reason` (`completed`, `shutdown`, `aborted`, `orphaned`).
    TaskClosed,

    // === Failures ===
    /// Task entered Aborting.
    ///
    /// Sets: `task`, `reason` (the cause).
    TaskAborting,

    /// Unhandled abort delivered to the parent's inbound side.
    ///
    /// Sets: `task` (aborting task), `parent`.
    AbortPropagated,

    /// Abort observed by a reader in time; propagation stopped.
    ///
    /// Sets: `task` (aborting task), `parent` (the handling task, if the handler was its inbound).
    AbortHandled,

    /// Abort reached a root unhandled; the whole tree is being shut down.
    ///
    /// Sets: `task` (the root), `reason`.
    ProcessAborted,

    // === Supervision ===
    /// Orphan adopted; its supervision edge moved.
    ///
    /// Sets: `task` (the child), `parent` (the new supervisor, absent if adopted by the host).
    ChildAdopted,

    /// Orphan force-closed.
    ///
    /// Sets: `task` (the child), `parent` (the parent that left it).
    OrphanShutdown,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Task the event is about.
    pub task: Option<TaskId>,
    /// Parent / supervisor involved.
    pub parent: Option<TaskId>,
    /// Module name of the task.
    pub module: Option<Arc<str>>,
    /// Human-readable reason (fault, close reason, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Subscriber name (subscriber events only).
    pub subscriber: Option<&'static str>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: None,
            parent: None,
            module: None,
            reason: None,
            subscriber: None,
        }
    }

    /// Attaches a task id.
    #[inline]
    pub fn with_task(mut self, task: TaskId) -> Self {
        self.task = Some(task);
        self
    }

    /// Attaches a parent / supervisor id.
    #[inline]
    pub fn with_parent(mut self, parent: Option<TaskId>) -> Self {
        self.parent = parent;
        self
    }

    /// Attaches a module name.
    #[inline]
    pub fn with_module(mut self, module: impl Into<Arc<str>>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        let mut ev = Event::new(EventKind::SubscriberOverflow).with_reason(reason);
        ev.subscriber = Some(subscriber);
        ev
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        let mut ev = Event::new(EventKind::SubscriberPanicked).with_reason(info);
        ev.subscriber = Some(subscriber);
        ev
    }

    /// True for `SubscriberOverflow` events.
    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }
}
