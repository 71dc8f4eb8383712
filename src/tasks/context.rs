//! # What a running task sees of the runtime.
//!
//! A [`TaskContext`] is passed to every module entry. Through it a task spawns
//! children, adopts orphans after handling an abort, and observes its own
//! cancellation.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::orphans::Orphans;
use crate::core::tree::Tree;
use crate::error::{SpawnError, SuperviseError};
use crate::tasks::{ModuleRef, TaskHandle, TaskId, TaskState};

/// Handle to the runtime scoped to one task.
pub struct TaskContext<M> {
    tree: Arc<Tree<M>>,
    id: TaskId,
    module: ModuleRef<M>,
    cancel: CancellationToken,
}

impl<M> Clone for TaskContext<M> {
    fn clone(&self) -> Self {
        Self {
            tree: Arc::clone(&self.tree),
            id: self.id,
            module: Arc::clone(&self.module),
            cancel: self.cancel.clone(),
        }
    }
}

impl<M: Send + 'static> TaskContext<M> {
    pub(crate) fn new(
        tree: Arc<Tree<M>>,
        id: TaskId,
        module: ModuleRef<M>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tree,
            id,
            module,
            cancel,
        }
    }

    /// Id of this task.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Name of the module this task runs.
    pub fn module_name(&self) -> &str {
        self.module.name()
    }

    /// The module this task runs; [`spawn_self`](Self::spawn_self) reuses it.
    pub fn module(&self) -> &ModuleRef<M> {
        &self.module
    }

    /// Spawns a child running the module registered as `name`.
    ///
    /// Resolves once the child's entry has started. The returned handle holds
    /// the parent's ends of the child's channels.
    pub async fn spawn(&self, name: &str) -> Result<TaskHandle<M>, SpawnError> {
        self.tree.spawn_named(Some(self.id), name).await
    }

    /// Spawns a child running `module` without going through the loader.
    pub async fn spawn_module(&self, module: ModuleRef<M>) -> Result<TaskHandle<M>, SpawnError> {
        self.tree.spawn_module(Some(self.id), module).await
    }

    /// Spawns a child running this task's own module.
    pub async fn spawn_self(&self) -> Result<TaskHandle<M>, SpawnError> {
        self.spawn_module(Arc::clone(&self.module)).await
    }

    /// Takes `child` out of `orphans` and makes this task its parent.
    ///
    /// The child keeps running; the returned handle talks to it.
    pub fn adopt(&self, orphans: &Orphans, child: TaskId) -> Result<TaskHandle<M>, SuperviseError> {
        self.tree.adopt(Some(self.id), orphans, child)
    }

    /// Current children, in spawn order.
    pub fn children(&self) -> Vec<TaskId> {
        self.tree.children_of(self.id)
    }

    /// Current lifecycle state; `Closed` once the task left the tree.
    pub fn state(&self) -> TaskState {
        self.tree.state(self.id).unwrap_or(TaskState::Closed)
    }

    /// True once the task was closed or started aborting.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the task is closed or starts aborting.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

impl<M: 'static> fmt::Debug for TaskContext<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.id)
            .field("module", &self.module.name())
            .finish()
    }
}
