//! # Supervision tree: arena of task records.
//!
//! Records are indexed by [`TaskId`]; children are id sets and the parent is a
//! plain id, so adoption is an index re-assignment and reclaiming a subtree is a
//! walk over ids.
//!
//! ```text
//! records: { id ─► Record { parent, children, status, pulse, cancel, requests, replies } }
//! drivers: { ids whose driver future has not exited }      ──► live watch (count)
//! aborted: Option<AbortError>                             ──► set once on process abort
//! ```
//!
//! ## Rules
//! - a record is removed together with its whole subtree, so no record ever
//!   points at a missing parent and a closed task has no children;
//! - side effects (side close/error, cancellation, events) run after the arena
//!   lock is released;
//! - once `closing` is set no new task is admitted.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::config::Config;
use super::driver;
use super::orphans::{OrphanCloser, Orphans};
use crate::channel::{Inbound, Outbound, Ports, Side, duplex};
use crate::error::{AbortError, Fault, OrphanShutdown, SpawnError, SuperviseError};
use crate::events::{Bus, Event, EventKind};
use crate::tasks::{
    ModuleLoader, ModuleRef, Pulse, StatusCell, TaskContext, TaskHandle, TaskId, TaskState,
};

struct Record<M> {
    parent: Option<TaskId>,
    children: BTreeSet<TaskId>,
    status: Arc<StatusCell>,
    pulse: Arc<Pulse>,
    cancel: CancellationToken,
    /// Side the task reads (its parent writes).
    requests: Arc<Side<M>>,
    /// Side the task writes (its parent reads).
    replies: Arc<Side<M>>,
}

struct Inner<M> {
    records: BTreeMap<TaskId, Record<M>>,
    drivers: BTreeSet<TaskId>,
    closing: bool,
}

/// What the abort path needs from a task that just entered Aborting.
pub(crate) struct AbortHop<M> {
    pub parent: Option<TaskId>,
    /// Pulse of the parent, the task expected to read the abort.
    pub handler: Option<Arc<Pulse>>,
    pub status: Arc<StatusCell>,
    pub requests: Arc<Side<M>>,
    pub replies: Arc<Side<M>>,
    pub orphans: Orphans,
}

/// How a removed subtree root is finalized.
enum Finish {
    Completed,
    Aborted,
    Shutdown,
    Orphaned { parent: TaskId },
}

pub(crate) struct Tree<M> {
    me: Weak<Tree<M>>,
    cfg: Config,
    bus: Bus,
    loader: Arc<dyn ModuleLoader<M>>,
    next_id: AtomicU64,
    inner: Mutex<Inner<M>>,
    live: watch::Sender<usize>,
    aborted: watch::Sender<Option<AbortError>>,
    token: CancellationToken,
}

impl<M: Send + 'static> Tree<M> {
    pub(crate) fn new(cfg: Config, bus: Bus, loader: Arc<dyn ModuleLoader<M>>) -> Arc<Self> {
        let (live, _) = watch::channel(0);
        let (aborted, _) = watch::channel(None);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            cfg,
            bus,
            loader,
            next_id: AtomicU64::new(1),
            inner: Mutex::new(Inner {
                records: BTreeMap::new(),
                drivers: BTreeSet::new(),
                closing: false,
            }),
            live,
            aborted,
            token: CancellationToken::new(),
        })
    }

    pub(crate) fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub(crate) fn publish(&self, ev: Event) {
        self.bus.publish(ev);
    }

    // ---- spawn ----

    fn check_accepting(inner: &Inner<M>, parent: Option<TaskId>) -> Result<(), SpawnError> {
        if inner.closing {
            return Err(SpawnError::ShuttingDown);
        }
        if let Some(parent) = parent {
            match inner.records.get(&parent) {
                Some(rec) if rec.status.load().is_live() => {}
                _ => return Err(SpawnError::ParentGone { parent }),
            }
        }
        Ok(())
    }

    /// Loads `name` through the configured loader, then spawns it.
    pub(crate) async fn spawn_named(
        self: &Arc<Self>,
        parent: Option<TaskId>,
        name: &str,
    ) -> Result<TaskHandle<M>, SpawnError> {
        Self::check_accepting(&self.inner.lock(), parent)?;
        let module = self.loader.load(name).await?;
        self.spawn_module(parent, module).await
    }

    /// Creates the record and channel pair, launches the driver and waits until
    /// the entry has started.
    pub(crate) async fn spawn_module(
        self: &Arc<Self>,
        parent: Option<TaskId>,
        module: ModuleRef<M>,
    ) -> Result<TaskHandle<M>, SpawnError> {
        let (task_ports, parent_ports) = duplex(self.cfg.high_water_mark);
        let status = Arc::new(StatusCell::new());
        let pulse = Pulse::new();
        let cancel = self.token.child_token();

        let id = {
            let mut inner = self.inner.lock();
            Self::check_accepting(&inner, parent)?;
            let id = TaskId::new(self.next_id.fetch_add(1, AtomicOrdering::Relaxed));
            if let Some(parent) = parent {
                if let Some(rec) = inner.records.get_mut(&parent) {
                    rec.children.insert(id);
                }
            }
            inner.records.insert(
                id,
                Record {
                    parent,
                    children: BTreeSet::new(),
                    status: Arc::clone(&status),
                    pulse: Arc::clone(&pulse),
                    cancel: cancel.clone(),
                    requests: Arc::clone(task_ports.inbound.side()),
                    replies: Arc::clone(task_ports.outbound.side()),
                },
            );
            inner.drivers.insert(id);
            self.live.send_replace(inner.drivers.len());
            id
        };
        self.publish(
            Event::new(EventKind::TaskSpawned)
                .with_task(id)
                .with_parent(parent)
                .with_module(module.name()),
        );

        let ctx = TaskContext::new(Arc::clone(self), id, Arc::clone(&module), cancel.clone());
        let (launched_tx, launched_rx) = oneshot::channel();
        tokio::spawn(driver::drive(
            Arc::clone(self),
            driver::Launch {
                id,
                module,
                ctx,
                ports: task_ports,
                status: Arc::clone(&status),
                pulse,
                cancel,
                launched: launched_tx,
            },
        ));
        let _ = launched_rx.await;

        Ok(TaskHandle::new(Arc::clone(self), id, status, parent_ports))
    }

    pub(crate) fn driver_exited(&self, id: TaskId) {
        let mut inner = self.inner.lock();
        inner.drivers.remove(&id);
        self.live.send_replace(inner.drivers.len());
    }

    // ---- introspection ----

    pub(crate) fn state(&self, id: TaskId) -> Option<TaskState> {
        self.inner.lock().records.get(&id).map(|rec| rec.status.load())
    }

    pub(crate) fn parent_of(&self, id: TaskId) -> Option<TaskId> {
        self.inner.lock().records.get(&id).and_then(|rec| rec.parent)
    }

    pub(crate) fn children_of(&self, id: TaskId) -> Vec<TaskId> {
        self.inner
            .lock()
            .records
            .get(&id)
            .map(|rec| rec.children.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn ids(&self) -> Vec<TaskId> {
        self.inner.lock().records.keys().copied().collect()
    }

    /// Drivers that have not exited yet.
    pub(crate) fn stuck(&self) -> Vec<TaskId> {
        self.inner.lock().drivers.iter().copied().collect()
    }

    /// The side `id` reads from, if the task is still present.
    pub(crate) fn requests_of(&self, id: TaskId) -> Option<Arc<Side<M>>> {
        self.inner
            .lock()
            .records
            .get(&id)
            .map(|rec| Arc::clone(&rec.requests))
    }

    pub(crate) fn aborted(&self) -> Option<AbortError> {
        self.aborted.borrow().clone()
    }

    /// Resolves once every driver has exited.
    pub(crate) async fn wait_idle(&self) {
        let mut live = self.live.subscribe();
        let _ = live.wait_for(|n| *n == 0).await;
    }

    // ---- termination ----

    /// Removes `root` and its descendants from the arena; root first.
    fn remove_subtree(inner: &mut Inner<M>, root: TaskId) -> Vec<(TaskId, Record<M>)> {
        let mut removed = Vec::new();
        let Some(rec) = inner.records.remove(&root) else {
            return removed;
        };
        if let Some(parent) = rec.parent {
            if let Some(parent) = inner.records.get_mut(&parent) {
                parent.children.remove(&root);
            }
        }
        let mut stack: Vec<TaskId> = rec.children.iter().rev().copied().collect();
        removed.push((root, rec));
        while let Some(id) = stack.pop() {
            if let Some(rec) = inner.records.remove(&id) {
                stack.extend(rec.children.iter().rev().copied());
                removed.push((id, rec));
            }
        }
        removed
    }

    fn finish(&self, root: TaskId, how: Finish) {
        let removed = Self::remove_subtree(&mut self.inner.lock(), root);
        let mut removed = removed.into_iter();
        let Some((_, rec)) = removed.next() else {
            return;
        };
        // descendants first: a closed task never has live children
        for (id, child) in removed.rev() {
            let parent = child.parent.unwrap_or(root);
            Self::shut(child, Fault::Orphan(OrphanShutdown { task: id, parent }));
            self.publish(
                Event::new(EventKind::OrphanShutdown)
                    .with_task(id)
                    .with_parent(Some(parent)),
            );
            self.publish(
                Event::new(EventKind::TaskClosed)
                    .with_task(id)
                    .with_reason("orphaned"),
            );
        }

        let reason = match how {
            Finish::Completed => {
                rec.status.close();
                let _ = rec.requests.close();
                let _ = rec.replies.close();
                "completed"
            }
            Finish::Aborted => {
                rec.status.close();
                rec.cancel.cancel();
                "aborted"
            }
            Finish::Shutdown => {
                Self::shut(rec, Fault::Shutdown { task: root });
                "shutdown"
            }
            Finish::Orphaned { parent } => {
                Self::shut(rec, Fault::Orphan(OrphanShutdown { task: root, parent }));
                self.publish(
                    Event::new(EventKind::OrphanShutdown)
                        .with_task(root)
                        .with_parent(Some(parent)),
                );
                "orphaned"
            }
        };
        self.publish(
            Event::new(EventKind::TaskClosed)
                .with_task(root)
                .with_reason(reason),
        );
    }

    fn shut(rec: Record<M>, fault: Fault) {
        rec.status.close();
        rec.cancel.cancel();
        rec.requests.error(fault.clone());
        rec.replies.error(fault);
    }

    /// Normal exit: both sides closed, remaining children force-closed.
    pub(crate) fn complete(&self, id: TaskId) {
        self.finish(id, Finish::Completed);
    }

    /// Orderly shutdown of `id` and its descendants; idempotent.
    pub(crate) fn close(&self, id: TaskId) {
        self.finish(id, Finish::Shutdown);
    }

    /// Enters Aborting and snapshots the children as orphans.
    ///
    /// Returns `None` if the task is gone or already aborting/closed.
    pub(crate) fn begin_abort(&self, id: TaskId) -> Option<AbortHop<M>> {
        let inner = self.inner.lock();
        let rec = inner.records.get(&id)?;
        if !rec.status.begin_abort() {
            return None;
        }
        rec.cancel.cancel();
        let handler = rec
            .parent
            .and_then(|parent| inner.records.get(&parent))
            .map(|parent| Arc::clone(&parent.pulse));
        let closer: Weak<dyn OrphanCloser> = self.me.clone();
        Some(AbortHop {
            parent: rec.parent,
            handler,
            status: Arc::clone(&rec.status),
            requests: Arc::clone(&rec.requests),
            replies: Arc::clone(&rec.replies),
            orphans: Orphans::new(id, rec.children.iter().copied().collect(), closer),
        })
    }

    /// Aborting → Closed once the orphans are settled.
    pub(crate) fn finish_abort(&self, id: TaskId) {
        self.finish(id, Finish::Aborted);
    }

    /// Moves `child` out of `orphans` under `supervisor` (`None`: the host).
    pub(crate) fn adopt(
        self: &Arc<Self>,
        supervisor: Option<TaskId>,
        orphans: &Orphans,
        child: TaskId,
    ) -> Result<TaskHandle<M>, SuperviseError> {
        orphans.claim(child)?;
        let moved = {
            let mut inner = self.inner.lock();
            Self::move_edge(&mut inner, supervisor, child)
        };
        let (status, requests, replies) = match moved {
            Ok(parts) => parts,
            Err(err) => {
                orphans.unclaim(child);
                return Err(err);
            }
        };
        self.publish(
            Event::new(EventKind::ChildAdopted)
                .with_task(child)
                .with_parent(supervisor),
        );
        let ports = Ports {
            inbound: Inbound::from_side(replies),
            outbound: Outbound::from_side(requests),
        };
        Ok(TaskHandle::new(Arc::clone(self), child, status, ports))
    }

    #[allow(clippy::type_complexity)]
    fn move_edge(
        inner: &mut Inner<M>,
        supervisor: Option<TaskId>,
        child: TaskId,
    ) -> Result<(Arc<StatusCell>, Arc<Side<M>>, Arc<Side<M>>), SuperviseError> {
        if let Some(sup) = supervisor {
            match inner.records.get(&sup) {
                Some(rec) if rec.status.load().is_live() => {}
                _ => return Err(SuperviseError::SupervisorGone { task: sup }),
            }
            // the supervisor must not sit inside the child's own subtree
            let mut cursor = Some(sup);
            while let Some(id) = cursor {
                if id == child {
                    return Err(SuperviseError::NotOrphan { task: child });
                }
                cursor = inner.records.get(&id).and_then(|rec| rec.parent);
            }
        }

        let rec = inner
            .records
            .get_mut(&child)
            .ok_or(SuperviseError::NotOrphan { task: child })?;
        let previous = std::mem::replace(&mut rec.parent, supervisor);
        let parts = (
            Arc::clone(&rec.status),
            Arc::clone(&rec.requests),
            Arc::clone(&rec.replies),
        );
        if let Some(old) = previous {
            if let Some(old) = inner.records.get_mut(&old) {
                old.children.remove(&child);
            }
        }
        if let Some(new) = supervisor {
            if let Some(new) = inner.records.get_mut(&new) {
                new.children.insert(child);
            }
        }
        Ok(parts)
    }

    /// Stops admitting tasks and closes every root subtree.
    pub(crate) fn shutdown_all(&self) {
        let roots: Vec<TaskId> = {
            let mut inner = self.inner.lock();
            inner.closing = true;
            inner
                .records
                .iter()
                .filter(|(_, rec)| rec.parent.is_none())
                .map(|(id, _)| *id)
                .collect()
        };
        for root in roots {
            self.close(root);
        }
        self.token.cancel();
    }

    /// An abort reached a root unhandled: record it and shut everything down.
    pub(crate) fn abort_process(&self, abort: AbortError) {
        let first = self.aborted.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(abort.clone());
            true
        });
        if !first {
            return;
        }
        self.publish(
            Event::new(EventKind::ProcessAborted)
                .with_task(abort.task())
                .with_reason(abort.root_cause().to_string()),
        );
        self.shutdown_all();
    }
}

impl<M: Send + 'static> OrphanCloser for Tree<M> {
    fn shutdown_child(&self, child: TaskId) {
        self.close(child);
    }

    fn close_orphan(&self, child: TaskId, parent: TaskId) {
        self.finish(child, Finish::Orphaned { parent });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::tasks::{ModuleFn, ModuleTable};

    fn tree() -> Arc<Tree<u8>> {
        Tree::new(
            Config::default(),
            Bus::new(64),
            Arc::new(ModuleTable::<u8>::new()),
        )
    }

    fn idle() -> ModuleRef<u8> {
        ModuleFn::arc("idle", |ctx: TaskContext<u8>, _ports: Ports<u8>| async move {
            ctx.cancelled().await;
            Ok::<_, TaskError>(())
        })
    }

    #[tokio::test]
    async fn spawn_links_parent_and_child() {
        let tree = tree();
        let root = tree.spawn_module(None, idle()).await.unwrap();
        let child = tree.spawn_module(Some(root.id()), idle()).await.unwrap();

        assert_eq!(tree.parent_of(child.id()), Some(root.id()));
        assert_eq!(tree.children_of(root.id()), vec![child.id()]);
        assert_eq!(tree.ids(), vec![root.id(), child.id()]);
        assert_eq!(tree.stuck().len(), 2);
    }

    #[tokio::test]
    async fn close_removes_the_whole_subtree() {
        let tree = tree();
        let root = tree.spawn_module(None, idle()).await.unwrap();
        let child = tree.spawn_module(Some(root.id()), idle()).await.unwrap();
        let grandchild = tree.spawn_module(Some(child.id()), idle()).await.unwrap();

        tree.close(child.id());
        assert_eq!(tree.ids(), vec![root.id()]);
        assert!(tree.children_of(root.id()).is_empty());
        assert_eq!(grandchild.state(), TaskState::Closed);
        assert!(matches!(
            child.inbound().status(),
            crate::channel::SideStatus::Errored(Fault::Shutdown { .. })
        ));
        assert!(matches!(
            grandchild.inbound().status(),
            crate::channel::SideStatus::Errored(Fault::Orphan(_))
        ));

        tree.wait_idle_for(&[child.id(), grandchild.id()]).await;
    }

    #[tokio::test]
    async fn closed_parent_refuses_children() {
        let tree = tree();
        let root = tree.spawn_module(None, idle()).await.unwrap();
        tree.close(root.id());
        assert!(matches!(
            tree.spawn_module(Some(root.id()), idle()).await,
            Err(SpawnError::ParentGone { .. })
        ));

        tree.shutdown_all();
        assert!(matches!(
            tree.spawn_module(None, idle()).await,
            Err(SpawnError::ShuttingDown)
        ));
        tree.wait_idle().await;
    }

    impl<M: Send + 'static> Tree<M> {
        async fn wait_idle_for(&self, ids: &[TaskId]) {
            while self.stuck().iter().any(|id| ids.contains(id)) {
                tokio::task::yield_now().await;
            }
        }
    }
}
