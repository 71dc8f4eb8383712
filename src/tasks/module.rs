//! # Module contract and function-backed modules.
//!
//! A [`Module`] is the code a task runs. Its entry receives a [`TaskContext`] and
//! the task's [`Ports`] (requests in, results out) and returns a future that
//! resolves when the task's work is done:
//! - `Ok(())` or `Err(TaskError::Canceled)` ends the task normally;
//! - any other `Err`, or a panic, aborts it.
//!
//! [`ModuleFn`] wraps a closure, producing a fresh future per spawn.
//!
//! ## Example
//! ```rust
//! use tasklane::{ModuleFn, ModuleRef, Ports, TaskContext, TaskError};
//!
//! let echo: ModuleRef<String> = ModuleFn::arc("echo", |_ctx: TaskContext<String>, ports: Ports<String>| async move {
//!     let mut requests = ports.inbound.acquire()?;
//!     let replies = ports.outbound.acquire()?;
//!     while let Some(msg) = requests.read().await? {
//!         replies.write(msg).await?;
//!     }
//!     Ok::<_, TaskError>(())
//! });
//!
//! assert_eq!(echo.name(), "echo");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::channel::Ports;
use crate::error::TaskError;
use crate::tasks::TaskContext;

/// Boxed entry future.
pub type BoxTaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'static>>;

/// Shared handle to a module.
pub type ModuleRef<M> = Arc<dyn Module<M>>;

/// # Code run by a task.
///
/// `M` is the message type of the task's channels.
pub trait Module<M>: Send + Sync + 'static {
    /// Name the module is registered and reported under.
    fn name(&self) -> &str;

    /// Creates the entry future for one task.
    fn entry(&self, ctx: TaskContext<M>, ports: Ports<M>) -> BoxTaskFuture;
}

/// Function-backed module.
///
/// Wraps a closure that *creates* a new entry future per spawn.
#[derive(Debug)]
pub struct ModuleFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> ModuleFn<F> {
    /// Creates a new function-backed module.
    ///
    /// Prefer [`ModuleFn::arc`] when you immediately need a [`ModuleRef`].
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the module and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<M, F, Fut> Module<M> for ModuleFn<F>
where
    M: Send + 'static,
    F: Fn(TaskContext<M>, Ports<M>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn entry(&self, ctx: TaskContext<M>, ports: Ports<M>) -> BoxTaskFuture {
        Box::pin((self.f)(ctx, ports))
    }
}
