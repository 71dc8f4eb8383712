//! # tasklane
//!
//! **Tasklane** is a structured-concurrency runtime for Rust.
//!
//! Work runs in isolated *tasks*, each wired to its parent by a pair of
//! flow-controlled channels. An uncaught failure inside a task becomes an
//! [`AbortError`] that climbs the supervision tree until some reader handles it;
//! the handler may adopt the children the failed task left behind.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                    ┌───────────────────────────────────────────┐
//!                    │  Runtime (host)                           │
//!                    │  - Tree (arena of task records)           │
//!                    │  - Bus (broadcast lifecycle events)       │
//!                    │  - SubscriberSet / lifecycle EventSource  │
//!                    └──────┬────────────────────────────────────┘
//!                           │ spawn(name) ─► ModuleLoader ─► driver
//!                           ▼
//!                    ┌──────────────┐  requests ─►  ┌──────────────┐
//!                    │   task R     │               │   task A     │
//!                    │ TaskHandle(A)│  ◄─ replies   │  Ports       │
//!                    └──────────────┘               └──────┬───────┘
//!                                                          │ TaskContext::spawn
//!                                                          ▼
//!                                                   ┌──────────────┐
//!                                                   │   task B     │
//!                                                   └──────────────┘
//! ```
//!
//! ### Abort path
//! ```text
//! B fails ──► B: Aborting
//!   ├─► AbortError(B) on B.replies   ── read by A in time? ──► handled, A adopts / shuts down B's children
//!   ├─► AbortError(B) on A.requests  ── read by A in time? ──► handled
//!   └─► A aborts with AbortError(A) ─► AbortError(B) ... up to the root
//!          root unhandled ──► every task shut down, Runtime::wait() = Err(Aborted)
//! ```
//!
//! ## Features
//! | Area              | Description                                                          | Key types / traits                            |
//! |-------------------|----------------------------------------------------------------------|-----------------------------------------------|
//! | **Channels**      | Lockable sides with backpressure, close/error, pipes and transfer.   | [`Inbound`], [`Outbound`], [`pipe`]           |
//! | **Tasks**         | Modules run as tasks; handles talk to them from the parent side.     | [`Module`], [`ModuleFn`], [`TaskHandle`]      |
//! | **Supervision**   | Abort propagation, orphan adoption, graceful shutdown.               | [`Runtime`], [`AbortError`], [`Orphans`]      |
//! | **Event sources** | Recurring notifications as channels, with cancelable defaults.       | [`EventSource`], [`Notice`]                   |
//! | **Subscriber API**| Hook into runtime lifecycle events (logging, metrics, custom).       | [`Subscribe`]                                 |
//! | **Errors**        | Typed errors for channels, spawning, adoption and the runtime.       | [`ChannelError`], [`Fault`], [`RuntimeError`] |
//! | **Configuration** | Centralize runtime settings.                                         | [`Config`]                                    |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] subscriber writing through `tracing`.
//!
//! ## Example
//! ```rust
//! use tasklane::{ChannelError, Config, Fault, ModuleFn, ModuleTable, Ports, Runtime, TaskContext, TaskError};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let worker = ModuleFn::arc("worker", |_ctx: TaskContext<u64>, _ports: Ports<u64>| async move {
//!         Err::<(), _>(TaskError::fail("disk full"))
//!     });
//!     let manager = ModuleFn::arc("manager", |ctx: TaskContext<u64>, _ports: Ports<u64>| async move {
//!         let worker = ctx.spawn("worker").await?;
//!         let mut results = worker.inbound().acquire()?;
//!         match results.read().await {
//!             Err(ChannelError::Failed(Fault::Abort(abort))) => {
//!                 assert_eq!(abort.origin(), worker.id());
//!                 Ok(())
//!             }
//!             other => Err(TaskError::fail(format!("unexpected: {other:?}"))),
//!         }
//!     });
//!
//!     let rt = Runtime::<u64>::builder(Config::default())
//!         .with_loader(ModuleTable::<u64>::new().with(worker).with(manager))
//!         .build();
//!
//!     rt.spawn("manager").await?;
//!     rt.wait().await?;
//!     Ok(())
//! }
//! ```
mod channel;
mod core;
mod error;
mod events;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use self::core::{Config, Orphans, Runtime, RuntimeBuilder};
pub use channel::{
    Holder, Inbound, Outbound, Piping, Ports, Reader, SideStatus, Writer, channel, duplex, pipe,
};
pub use error::{
    AbortError, ChannelError, Fault, LoadError, OrphanShutdown, ProducerFailure, RuntimeError,
    SpawnError, SuperviseError, TaskError,
};
pub use events::{Bus, DefaultAction, Delivery, Dispatch, Event, EventKind, EventSource, Notice};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::{
    BoxTaskFuture, Module, ModuleFn, ModuleLoader, ModuleRef, ModuleTable, TaskContext,
    TaskControl, TaskHandle, TaskId, TaskState,
};

// Optional: expose a simple built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
