//! # Parent-side handles.
//!
//! [`TaskHandle`] is what a spawn (or an adoption) returns: the task's identity
//! plus the parent's ends of its channels. [`TaskControl`] is the cloneable,
//! channel-less part of it.

use std::fmt;
use std::sync::Arc;

use crate::channel::{Inbound, Outbound, Ports};
use crate::core::tree::Tree;
use crate::tasks::{StatusCell, TaskId, TaskState};

/// Identity and lifecycle control of one task.
pub struct TaskControl<M> {
    tree: Arc<Tree<M>>,
    id: TaskId,
    status: Arc<StatusCell>,
}

impl<M> Clone for TaskControl<M> {
    fn clone(&self) -> Self {
        Self {
            tree: Arc::clone(&self.tree),
            id: self.id,
            status: Arc::clone(&self.status),
        }
    }
}

impl<M: Send + 'static> TaskControl<M> {
    /// Id of the controlled task.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Current lifecycle state; stays readable after the task left the tree.
    pub fn state(&self) -> TaskState {
        self.status.load()
    }

    /// True once the task reached `Closed`.
    pub fn is_closed(&self) -> bool {
        self.state() == TaskState::Closed
    }

    /// Closes the task and its descendants; their sides error with a shutdown fault.
    ///
    /// Idempotent; closing a closed task does nothing.
    pub fn close(&self) {
        self.tree.close(self.id);
    }
}

impl<M> fmt::Debug for TaskControl<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskControl")
            .field("id", &self.id)
            .field("state", &self.status.load())
            .finish()
    }
}

/// A spawned (or adopted) task as seen from its parent.
///
/// Writes to [`outbound`](Self::outbound) arrive on the task's inbound; the
/// task's writes arrive on [`inbound`](Self::inbound).
pub struct TaskHandle<M> {
    control: TaskControl<M>,
    ports: Ports<M>,
}

impl<M: Send + 'static> TaskHandle<M> {
    pub(crate) fn new(tree: Arc<Tree<M>>, id: TaskId, status: Arc<StatusCell>, ports: Ports<M>) -> Self {
        Self {
            control: TaskControl { tree, id, status },
            ports,
        }
    }

    /// Id of the task.
    pub fn id(&self) -> TaskId {
        self.control.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.control.state()
    }

    /// Current parent; `None` for roots and for tasks adopted by the host.
    pub fn parent(&self) -> Option<TaskId> {
        self.control.tree.parent_of(self.control.id)
    }

    /// Current children of the task, in spawn order.
    pub fn children(&self) -> Vec<TaskId> {
        self.control.tree.children_of(self.control.id)
    }

    /// Parent's end for sending requests to the task.
    pub fn outbound(&self) -> &Outbound<M> {
        &self.ports.outbound
    }

    /// Parent's end for reading the task's results.
    pub fn inbound(&self) -> &Inbound<M> {
        &self.ports.inbound
    }

    /// See [`TaskControl::close`].
    pub fn close(&self) {
        self.control.close();
    }

    /// A cloneable control for the task, without the channel ends.
    pub fn control(&self) -> TaskControl<M> {
        self.control.clone()
    }

    /// Gives up the handle, keeping only the channel ends.
    pub fn into_ports(self) -> Ports<M> {
        self.ports
    }
}

impl<M> fmt::Debug for TaskHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.control.id)
            .field("state", &self.control.status.load())
            .finish()
    }
}
