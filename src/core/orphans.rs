//! # Orphans: children left behind by an aborting task.
//!
//! Every [`AbortError`](crate::AbortError) carries the aborting task's children as
//! an [`Orphans`] set. Whoever handles the abort may, for each child, either
//! adopt it ([`TaskContext::adopt`](crate::TaskContext::adopt) /
//! [`Runtime::adopt`](crate::Runtime::adopt)) or shut it down
//! ([`Orphans::shutdown`]). Once the handling window passes the set is
//! *settled*: every child still pending is force-closed with
//! [`OrphanShutdown`](crate::OrphanShutdown).
//!
//! ```text
//! pending {c1, c2, c3}
//!   ├─ adopt(c1)     ──► edge moves to the handler; c1 keeps running
//!   ├─ shutdown(c2)  ──► c2 closed (cascades to its descendants)
//!   └─ settle()      ──► c3 force-closed as an orphan
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::SuperviseError;
use crate::tasks::TaskId;

/// Closes tasks on behalf of an orphan set.
pub(crate) trait OrphanCloser: Send + Sync {
    /// Orderly close of `child` (requested by the handler).
    fn shutdown_child(&self, child: TaskId);
    /// Forced close of an unadopted `child` of `parent`.
    fn close_orphan(&self, child: TaskId, parent: TaskId);
}

struct Pending {
    ids: BTreeSet<TaskId>,
    settled: bool,
}

struct OrphanSet {
    parent: TaskId,
    all: Vec<TaskId>,
    pending: Mutex<Pending>,
    closer: Option<Weak<dyn OrphanCloser>>,
}

/// Children of an aborting task awaiting a decision.
///
/// Clones share one set: a child adopted through one clone is no longer pending
/// in any other.
#[derive(Clone)]
pub struct Orphans {
    inner: Arc<OrphanSet>,
}

impl Orphans {
    pub(crate) fn new(parent: TaskId, children: Vec<TaskId>, closer: Weak<dyn OrphanCloser>) -> Self {
        let ids = children.iter().copied().collect();
        Self {
            inner: Arc::new(OrphanSet {
                parent,
                all: children,
                pending: Mutex::new(Pending {
                    ids,
                    settled: false,
                }),
                closer: Some(closer),
            }),
        }
    }

    /// An empty, already settled set not attached to any runtime.
    #[cfg(test)]
    pub(crate) fn detached(parent: TaskId) -> Self {
        Self {
            inner: Arc::new(OrphanSet {
                parent,
                all: Vec::new(),
                pending: Mutex::new(Pending {
                    ids: BTreeSet::new(),
                    settled: true,
                }),
                closer: None,
            }),
        }
    }

    /// The task that left these children behind.
    pub fn parent(&self) -> TaskId {
        self.inner.parent
    }

    /// Every child the parent had when it started aborting.
    pub fn ids(&self) -> &[TaskId] {
        &self.inner.all
    }

    /// Children not yet adopted, shut down or settled.
    pub fn pending(&self) -> Vec<TaskId> {
        self.inner.pending.lock().ids.iter().copied().collect()
    }

    /// True if the aborting task had no children.
    pub fn is_empty(&self) -> bool {
        self.inner.all.is_empty()
    }

    /// True once the handling window has passed.
    pub fn is_settled(&self) -> bool {
        self.inner.pending.lock().settled
    }

    /// Closes `child` in an orderly way; its own descendants are closed with it.
    pub fn shutdown(&self, child: TaskId) -> Result<(), SuperviseError> {
        self.claim(child)?;
        if let Some(closer) = self.closer() {
            closer.shutdown_child(child);
        }
        Ok(())
    }

    /// Removes `child` from the pending set so the caller can take it over.
    pub(crate) fn claim(&self, child: TaskId) -> Result<(), SuperviseError> {
        let mut pending = self.inner.pending.lock();
        if pending.settled {
            return Err(SuperviseError::Settled);
        }
        if !pending.ids.remove(&child) {
            return Err(SuperviseError::NotOrphan { task: child });
        }
        Ok(())
    }

    /// Puts back a child whose takeover failed after [`claim`](Self::claim).
    pub(crate) fn unclaim(&self, child: TaskId) {
        let mut pending = self.inner.pending.lock();
        if !pending.settled {
            pending.ids.insert(child);
        }
    }

    /// Closes the window and force-closes every child still pending. Idempotent.
    pub(crate) fn settle(&self) {
        let left: Vec<TaskId> = {
            let mut pending = self.inner.pending.lock();
            if pending.settled {
                return;
            }
            pending.settled = true;
            std::mem::take(&mut pending.ids).into_iter().collect()
        };
        if let Some(closer) = self.closer() {
            for child in left {
                closer.close_orphan(child, self.inner.parent);
            }
        }
    }

    fn closer(&self) -> Option<Arc<dyn OrphanCloser>> {
        self.inner.closer.as_ref().and_then(Weak::upgrade)
    }
}

impl fmt::Debug for Orphans {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.inner.pending.lock();
        f.debug_struct("Orphans")
            .field("parent", &self.inner.parent)
            .field("ids", &self.inner.all)
            .field("pending", &pending.ids)
            .field("settled", &pending.settled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        shut: Mutex<Vec<TaskId>>,
        orphaned: Mutex<Vec<(TaskId, TaskId)>>,
    }

    impl OrphanCloser for Recorder {
        fn shutdown_child(&self, child: TaskId) {
            self.shut.lock().push(child);
        }

        fn close_orphan(&self, child: TaskId, parent: TaskId) {
            self.orphaned.lock().push((child, parent));
        }
    }

    fn id(n: u64) -> TaskId {
        TaskId::new(n)
    }

    #[test]
    fn each_child_is_decided_once() {
        let recorder = Arc::new(Recorder::default());
        let closer: Arc<dyn OrphanCloser> = recorder.clone();
        let orphans = Orphans::new(id(1), vec![id(2), id(3), id(4)], Arc::downgrade(&closer));

        orphans.claim(id(2)).unwrap();
        assert!(matches!(
            orphans.claim(id(2)),
            Err(SuperviseError::NotOrphan { .. })
        ));
        orphans.shutdown(id(3)).unwrap();
        assert_eq!(orphans.pending(), vec![id(4)]);

        orphans.settle();
        orphans.settle();
        assert!(orphans.is_settled());
        assert!(matches!(orphans.claim(id(4)), Err(SuperviseError::Settled)));
        assert_eq!(orphans.ids(), &[id(2), id(3), id(4)]);

        assert_eq!(*recorder.shut.lock(), vec![id(3)]);
        assert_eq!(*recorder.orphaned.lock(), vec![(id(4), id(1))]);
    }

    #[test]
    fn detached_set_is_empty_and_settled() {
        let orphans = Orphans::detached(id(7));
        assert!(orphans.is_empty());
        assert!(orphans.is_settled());
        assert_eq!(orphans.parent(), id(7));
    }
}
