//! # Task lifecycle state.
//!
//! ```text
//! Initializing ──► Running ◄──► Suspended ──► Closed
//!       │             │             │
//!       └─────────────┴─────────────┴──► Aborting ──► Closed
//! ```
//!
//! `Running ↔ Suspended` follows the entry future: suspended while it is parked
//! on a pending poll. `Aborting` and `Closed` are entered exactly once.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering as AtomicOrdering};

/// Lifecycle state of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Record created; entry not launched yet.
    Initializing,
    /// Entry is being polled.
    Running,
    /// Entry is parked at a suspension point.
    Suspended,
    /// An uncaught failure is being propagated.
    Aborting,
    /// Terminal.
    Closed,
}

impl TaskState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TaskState::Initializing,
            1 => TaskState::Running,
            2 => TaskState::Suspended,
            3 => TaskState::Aborting,
            _ => TaskState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TaskState::Initializing => 0,
            TaskState::Running => 1,
            TaskState::Suspended => 2,
            TaskState::Aborting => 3,
            TaskState::Closed => 4,
        }
    }

    /// True while the entry may still run (neither aborting nor closed).
    pub fn is_live(self) -> bool {
        matches!(
            self,
            TaskState::Initializing | TaskState::Running | TaskState::Suspended
        )
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(self) -> &'static str {
        match self {
            TaskState::Initializing => "initializing",
            TaskState::Running => "running",
            TaskState::Suspended => "suspended",
            TaskState::Aborting => "aborting",
            TaskState::Closed => "closed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Lock-free state cell shared by the tree, the driver and every handle.
#[derive(Debug)]
pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(TaskState::Initializing.as_u8()))
    }

    pub(crate) fn load(&self) -> TaskState {
        TaskState::from_u8(self.0.load(AtomicOrdering::Acquire))
    }

    /// Applies `next` if `allowed(current)`; returns whether the transition happened.
    fn transition(&self, next: TaskState, allowed: impl Fn(TaskState) -> bool) -> bool {
        self.0
            .fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |raw| {
                let current = TaskState::from_u8(raw);
                (allowed(current) && current != next).then_some(next.as_u8())
            })
            .is_ok()
    }

    pub(crate) fn enter_running(&self) -> bool {
        self.transition(TaskState::Running, TaskState::is_live)
    }

    pub(crate) fn suspend(&self) -> bool {
        self.transition(TaskState::Suspended, |s| {
            matches!(s, TaskState::Running)
        })
    }

    /// Live → Aborting, at most once.
    pub(crate) fn begin_abort(&self) -> bool {
        self.transition(TaskState::Aborting, TaskState::is_live)
    }

    /// Anything → Closed, at most once.
    pub(crate) fn close(&self) -> bool {
        self.transition(TaskState::Closed, |s| s != TaskState::Closed)
    }
}
