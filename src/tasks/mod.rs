//! # Tasks: identity, state, modules and handles.
//!
//! This module provides the task-related types:
//! - [`Module`] - trait for the code a task runs
//! - [`ModuleFn`] - function-based module implementation
//! - [`ModuleRef`] - shared reference to a module (`Arc<dyn Module<M>>`)
//! - [`ModuleLoader`] / [`ModuleTable`] - resolving module names
//! - [`TaskContext`] - the runtime as seen by a running task
//! - [`TaskHandle`] / [`TaskControl`] - a task as seen by its parent

mod context;
mod handle;
mod id;
mod loader;
mod module;
pub(crate) mod pulse;
mod state;

pub use context::TaskContext;
pub use handle::{TaskControl, TaskHandle};
pub use id::TaskId;
pub use loader::{ModuleLoader, ModuleTable};
pub use module::{BoxTaskFuture, Module, ModuleFn, ModuleRef};
pub(crate) use pulse::{Beat, Pulse};
pub(crate) use state::StatusCell;
pub use state::TaskState;
