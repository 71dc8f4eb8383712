//! # Task identity.
//!
//! [`TaskId`] is the arena index of a task record. Ids are allocated by the runtime
//! in increasing order and never reused, so an id that is no longer present in the
//! arena always refers to a task that has reached [`TaskState::Closed`](crate::TaskState::Closed).

use std::fmt;

/// Identity of a task inside one runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    #[inline]
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric id.
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_prefixed() {
        assert_eq!(TaskId::new(7).to_string(), "task#7");
        assert!(TaskId::new(1) < TaskId::new(2));
    }
}
