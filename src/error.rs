//! Error types used by the tasklane runtime, its channels and task code.
//!
//! - [`ChannelError`] - outcome of a channel operation that did not yield a message.
//! - [`Fault`] - the terminal cause carried by an errored channel side.
//! - [`AbortError`] - a task abort, possibly wrapping the abort of a descendant.
//! - [`TaskError`] - what a task's entry function returns on failure.
//! - [`SpawnError`] / [`LoadError`] - spawn and module resolution failures.
//! - [`SuperviseError`] - adoption/orphan handling failures.
//! - [`RuntimeError`] - failures of the runtime as a whole.
//!
//! Most types provide `as_label` for logs/metrics.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::core::Orphans;
use crate::tasks::TaskId;

/// # Errors produced by channel operations.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ChannelError {
    /// The end is already held by a reader, writer or pipe.
    #[error("channel side is already locked")]
    AlreadyLocked,

    /// The side was closed; no further writes are accepted.
    #[error("channel side is closed")]
    Closed,

    /// The side was errored; every pending and future operation resolves to the fault.
    #[error("channel side errored: {0}")]
    Failed(Fault),
}

impl ChannelError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ChannelError::AlreadyLocked => "channel_already_locked",
            ChannelError::Closed => "channel_closed",
            ChannelError::Failed(_) => "channel_failed",
        }
    }

    /// Returns the fault if the side errored.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            ChannelError::Failed(fault) => Some(fault),
            _ => None,
        }
    }

    /// Returns the abort carried by the fault, if any.
    pub fn abort(&self) -> Option<&AbortError> {
        match self.fault() {
            Some(Fault::Abort(abort)) => Some(abort),
            _ => None,
        }
    }
}

/// # Terminal cause placed on an errored channel side.
///
/// Cheap to clone: every suspended operation on the side receives its own copy.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum Fault {
    /// Uncaught failure raised inside task code.
    #[error(transparent)]
    Producer(#[from] ProducerFailure),

    /// A task aborted; see [`AbortError`].
    #[error(transparent)]
    Abort(#[from] AbortError),

    /// The task was shut down through its handle.
    #[error("{task} was shut down")]
    Shutdown { task: TaskId },

    /// The task was left unadopted after its parent aborted.
    #[error(transparent)]
    Orphan(#[from] OrphanShutdown),

    /// The consumer of an event channel dropped its last handle.
    #[error("channel consumer went away")]
    Detached,

    /// Cause supplied by user code through `error()`.
    #[error("{reason}")]
    Custom { reason: Arc<str> },
}

impl Fault {
    /// Creates a user-supplied fault.
    pub fn custom(reason: impl Into<Arc<str>>) -> Self {
        Fault::Custom {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Fault::Producer(_) => "producer_failure",
            Fault::Abort(_) => "task_aborted",
            Fault::Shutdown { .. } => "task_shutdown",
            Fault::Orphan(_) => "orphan_shutdown",
            Fault::Detached => "consumer_detached",
            Fault::Custom { .. } => "custom",
        }
    }
}

/// Uncaught failure raised inside a task's entry function.
#[derive(Error, Debug, Clone)]
#[error("{task} failed: {message}")]
pub struct ProducerFailure {
    /// Task whose code failed.
    pub task: TaskId,
    /// Rendered failure.
    pub message: Arc<str>,
}

impl ProducerFailure {
    /// Failure of `task` described by `message`.
    pub fn new(task: TaskId, message: impl Into<Arc<str>>) -> Self {
        Self {
            task,
            message: message.into(),
        }
    }
}

/// Forced close of a child that nobody adopted after its parent aborted or finished.
#[derive(Error, Debug, Clone)]
#[error("{task} shut down as an orphan of {parent}")]
pub struct OrphanShutdown {
    /// The child that was closed.
    pub task: TaskId,
    /// The parent that left it behind.
    pub parent: TaskId,
}

/// # A task abort.
///
/// Each time an unhandled failure crosses a task boundary a new layer is added, so a
/// failure raised three levels down reaches the handler as
/// `AbortError(top) -> AbortError(mid) -> AbortError(origin) -> ProducerFailure`.
///
/// The payload also carries the aborting task's children as [`Orphans`]; the handler
/// may adopt them during its handling step, otherwise they are shut down.
#[derive(Error, Debug, Clone)]
#[error("{task} aborted")]
pub struct AbortError {
    task: TaskId,
    #[source]
    cause: Box<Fault>,
    orphans: Orphans,
}

impl AbortError {
    pub(crate) fn new(task: TaskId, cause: Fault, orphans: Orphans) -> Self {
        Self {
            task,
            cause: Box::new(cause),
            orphans,
        }
    }

    /// Task that aborted at this layer.
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// The wrapped cause.
    pub fn cause(&self) -> &Fault {
        &self.cause
    }

    /// Children the aborting task left behind.
    pub fn orphans(&self) -> &Orphans {
        &self.orphans
    }

    /// Iterates the abort layers from this one down to the originating task.
    pub fn layers(&self) -> impl Iterator<Item = &AbortError> {
        std::iter::successors(Some(self), |layer| match layer.cause.as_ref() {
            Fault::Abort(inner) => Some(inner),
            _ => None,
        })
    }

    /// Task where the failure originated (the innermost layer).
    pub fn origin(&self) -> TaskId {
        self.layers().last().map_or(self.task, |layer| layer.task)
    }

    /// Task ids innermost-first: origin, then each task the abort crossed.
    pub fn chain(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.layers().map(|layer| layer.task).collect();
        ids.reverse();
        ids
    }

    /// The first cause that is not itself an abort.
    pub fn root_cause(&self) -> &Fault {
        let innermost = self.layers().last().unwrap_or(self);
        innermost.cause.as_ref()
    }
}

/// # Errors produced by task execution.
///
/// Returned from a module's entry function. Anything other than `Canceled` that
/// escapes the entry is an unhandled failure and aborts the task.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// Task code failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// A channel operation failed and the task did not recover.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Spawning a child failed and the task did not recover.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// Adoption failed and the task did not recover.
    #[error(transparent)]
    Supervise(#[from] SuperviseError),

    /// Task observed cancellation and returned early; treated as a normal exit.
    #[error("context cancelled")]
    Canceled,
}

impl TaskError {
    /// Shorthand for [`TaskError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use tasklane::TaskError;
    ///
    /// let err = TaskError::fail("boom");
    /// assert_eq!(err.as_label(), "task_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Channel(_) => "task_channel",
            TaskError::Spawn(_) => "task_spawn",
            TaskError::Supervise(_) => "task_supervise",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// Converts an escaped failure of `task` into the cause of its abort.
    ///
    /// A re-raised abort or producer failure keeps its identity, so aborts
    /// received from children nest instead of being flattened into a message.
    /// Every other fault (shutdown, orphan, detach, custom) becomes a
    /// [`ProducerFailure`] of `task` carrying the fault's text.
    pub(crate) fn into_fault(self, task: TaskId) -> Fault {
        match self {
            TaskError::Channel(ChannelError::Failed(
                fault @ (Fault::Abort(_) | Fault::Producer(_)),
            )) => fault,
            other => Fault::Producer(ProducerFailure::new(task, other.to_string())),
        }
    }
}

/// # Module resolution failures.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum LoadError {
    /// No module is registered under this name.
    #[error("module {module:?} not found")]
    NotFound { module: String },

    /// The loader found the module but could not prepare it.
    #[error("module {module:?} failed to load: {reason}")]
    Failed { module: String, reason: String },
}

/// # Spawn failures.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum SpawnError {
    /// The module could not be resolved.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// The spawning task is aborting or closed.
    #[error("parent {parent} is no longer running")]
    ParentGone { parent: TaskId },

    /// The runtime is shutting down or the process aborted.
    #[error("runtime is shutting down")]
    ShuttingDown,
}

impl SpawnError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SpawnError::Load(_) => "spawn_load",
            SpawnError::ParentGone { .. } => "spawn_parent_gone",
            SpawnError::ShuttingDown => "spawn_shutting_down",
        }
    }
}

/// # Adoption and orphan handling failures.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum SuperviseError {
    /// The task is not (or no longer) a pending orphan of this abort.
    #[error("{task} is not a pending orphan")]
    NotOrphan { task: TaskId },

    /// The handling window closed; remaining orphans were already shut down.
    #[error("orphans already settled")]
    Settled,

    /// The would-be supervisor is no longer running.
    #[error("supervisor {task} is no longer running")]
    SupervisorGone { task: TaskId },
}

/// # Errors produced by the tasklane runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// An abort reached a root without being handled; the whole tree was shut down.
    #[error("process aborted: {0}")]
    Aborted(AbortError),

    /// Shutdown grace period was exceeded; some tasks remained stuck.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Tasks whose drivers had not exited in time.
        stuck: Vec<TaskId>,
    },

    /// The root task could not be started.
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Aborted(_) => "runtime_aborted",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Spawn(_) => "runtime_spawn",
        }
    }
}

/// Renders a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
