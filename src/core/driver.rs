//! # Task driver: runs one entry future to its end.
//!
//! ```text
//! drive(launch)
//!   ├─► build entry future (panics caught) ──► Running, TaskRunning, signal "launched"
//!   ├─► select (biased):
//!   │     cancel.cancelled()            ──► closed from outside; nothing left to do
//!   │     entry (catch_unwind, tracked) ──► Ok / Canceled ──► Tree::complete
//!   │                                   ──► Err / panic   ──► abort::propagate
//!   └─► Tree::driver_exited
//! ```
//!
//! ## Rules
//! - every poll of the entry marks the task `Running`; a pending poll marks it `Suspended`;
//! - every poll is a beat of the task's [`Pulse`], which handling windows wait on;
//! - `TaskError::Canceled` is a normal exit;
//! - a panic becomes a `ProducerFailure` carrying the panic message.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::abort;
use super::tree::Tree;
use crate::channel::Ports;
use crate::error::{Fault, ProducerFailure, TaskError, panic_message};
use crate::events::{Event, EventKind};
use crate::tasks::{Beat, BoxTaskFuture, ModuleRef, Pulse, StatusCell, TaskContext, TaskId};

/// Everything a driver needs to start a task.
pub(crate) struct Launch<M> {
    pub id: TaskId,
    pub module: ModuleRef<M>,
    pub ctx: TaskContext<M>,
    pub ports: Ports<M>,
    pub status: Arc<StatusCell>,
    pub pulse: Arc<Pulse>,
    pub cancel: CancellationToken,
    pub launched: oneshot::Sender<()>,
}

enum Outcome {
    Completed,
    Failed(Fault),
    Cancelled,
}

/// Entry future that mirrors its poll state into the task status and pulse.
struct Tracked {
    fut: BoxTaskFuture,
    status: Arc<StatusCell>,
    beat: Arc<Beat>,
}

impl Future for Tracked {
    type Output = Result<(), TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.status.enter_running();
        let res = this.beat.poll(&mut this.fut, cx);
        if res.is_pending() {
            this.status.suspend();
        }
        res
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.beat.pulse().retire();
    }
}

fn failure(id: TaskId, payload: &(dyn std::any::Any + Send)) -> Fault {
    Fault::Producer(ProducerFailure::new(id, panic_message(payload)))
}

pub(crate) async fn drive<M: Send + 'static>(tree: Arc<Tree<M>>, launch: Launch<M>) {
    let Launch {
        id,
        module,
        ctx,
        ports,
        status,
        pulse,
        cancel,
        launched,
    } = launch;

    let entry = std::panic::catch_unwind(AssertUnwindSafe(|| module.entry(ctx, ports)));
    status.enter_running();
    tree.publish(
        Event::new(EventKind::TaskRunning)
            .with_task(id)
            .with_module(module.name()),
    );
    let _ = launched.send(());

    let outcome = match entry {
        Err(payload) => {
            pulse.retire();
            Outcome::Failed(failure(id, &*payload))
        }
        Ok(fut) => {
            let tracked = AssertUnwindSafe(Tracked {
                fut,
                status: Arc::clone(&status),
                beat: Beat::new(pulse),
            });
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Outcome::Cancelled,
                res = tracked.catch_unwind() => match res {
                    Ok(Ok(())) | Ok(Err(TaskError::Canceled)) => Outcome::Completed,
                    Ok(Err(err)) => Outcome::Failed(err.into_fault(id)),
                    Err(payload) => Outcome::Failed(failure(id, &*payload)),
                },
            }
        }
    };

    match outcome {
        Outcome::Completed => tree.complete(id),
        Outcome::Failed(fault) => abort::propagate(&tree, id, fault).await,
        Outcome::Cancelled => {}
    }
    tree.driver_exited(id);
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::super::{Config, Runtime};
    use super::*;
    use crate::channel::SideStatus;
    use crate::error::{AbortError, ChannelError, OrphanShutdown};
    use crate::tasks::{Module, ModuleFn, ModuleTable, TaskState};

    struct Broken;

    impl Module<u32> for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn entry(&self, _ctx: TaskContext<u32>, _ports: Ports<u32>) -> BoxTaskFuture {
            panic!("no entry")
        }
    }

    fn explode() -> Result<(), TaskError> {
        panic!("kaboom")
    }

    fn runtime(table: ModuleTable<u32>) -> Runtime<u32> {
        let idle = ModuleFn::arc("idle", |ctx: TaskContext<u32>, _ports: Ports<u32>| async move {
            ctx.cancelled().await;
            Ok::<_, TaskError>(())
        });
        Runtime::builder(Config::default())
            .with_loader(table.with(idle))
            .build()
    }

    fn producer_abort(res: Result<Option<u32>, ChannelError>) -> (AbortError, ProducerFailure) {
        match res {
            Err(ChannelError::Failed(Fault::Abort(abort))) => match abort.cause().clone() {
                Fault::Producer(failure) => (abort, failure),
                other => panic!("unexpected cause {other:?}"),
            },
            other => panic!("expected an abort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn panicking_entry_becomes_a_producer_failure() {
        let kaboom = ModuleFn::arc("kaboom", |_ctx: TaskContext<u32>, _ports: Ports<u32>| async move {
            explode()
        });
        let rt = runtime(ModuleTable::<u32>::new().with(kaboom));

        let task = rt.spawn("kaboom").await.unwrap();
        let mut replies = task.inbound().acquire().unwrap();
        let (abort, failure) = producer_abort(replies.read().await);

        assert_eq!(abort.origin(), task.id());
        assert_eq!(failure.task, task.id());
        assert_eq!(&*failure.message, "kaboom");
        let _ = rt.wait().await;
        assert!(rt.tasks().is_empty());
    }

    #[tokio::test]
    async fn panicking_constructor_aborts_the_task() {
        let rt = runtime(ModuleTable::<u32>::new().with(Arc::new(Broken)));

        let task = rt.spawn("broken").await.unwrap();
        let mut replies = task.inbound().acquire().unwrap();
        let (_, failure) = producer_abort(replies.read().await);

        assert_eq!(&*failure.message, "no entry");
        let _ = rt.wait().await;
        assert_eq!(task.state(), TaskState::Closed);
    }

    #[tokio::test]
    async fn state_follows_the_entry_polls() {
        let seen: Arc<Mutex<Option<TaskState>>> = Arc::default();
        let observer = {
            let seen = seen.clone();
            ModuleFn::arc("observer", move |ctx: TaskContext<u32>, ports: Ports<u32>| {
                let seen = seen.clone();
                async move {
                    *seen.lock() = Some(ctx.state());
                    let mut requests = ports.inbound.acquire()?;
                    while requests.read().await?.is_some() {}
                    Ok::<_, TaskError>(())
                }
            })
        };
        let rt = runtime(ModuleTable::<u32>::new().with(observer));

        let task = rt.spawn("observer").await.unwrap();
        for _ in 0..10 {
            if task.state() == TaskState::Suspended {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(task.state(), TaskState::Suspended);
        assert_eq!(*seen.lock(), Some(TaskState::Running));

        task.outbound().acquire().unwrap().close().unwrap();
        rt.wait().await.unwrap();
        assert_eq!(task.state(), TaskState::Closed);
    }

    #[tokio::test]
    async fn canceled_is_a_normal_exit() {
        let quitter = ModuleFn::arc("quitter", |_ctx: TaskContext<u32>, _ports: Ports<u32>| async move {
            Err::<(), _>(TaskError::Canceled)
        });
        let rt = runtime(ModuleTable::<u32>::new().with(quitter));

        let task = rt.spawn("quitter").await.unwrap();
        let mut replies = task.inbound().acquire().unwrap();
        assert_eq!(replies.read().await.unwrap(), None);
        rt.wait().await.unwrap();
        assert!(rt.aborted().is_none());
    }

    #[tokio::test]
    async fn completion_force_closes_remaining_children() {
        let slot: Arc<Mutex<Option<(TaskId, Ports<u32>)>>> = Arc::default();
        let leaver = {
            let slot = slot.clone();
            ModuleFn::arc("leaver", move |ctx: TaskContext<u32>, _ports: Ports<u32>| {
                let slot = slot.clone();
                async move {
                    let child = ctx.spawn("idle").await?;
                    *slot.lock() = Some((child.id(), child.into_ports()));
                    Ok::<_, TaskError>(())
                }
            })
        };
        let rt = runtime(ModuleTable::<u32>::new().with(leaver));

        let parent = rt.spawn("leaver").await.unwrap();
        rt.wait().await.unwrap();

        let (child, ports) = slot.lock().take().unwrap();
        match ports.inbound.status() {
            SideStatus::Errored(Fault::Orphan(OrphanShutdown { task, parent: by })) => {
                assert_eq!(task, child);
                assert_eq!(by, parent.id());
            }
            other => panic!("unexpected status {other:?}"),
        }
        assert!(rt.tasks().is_empty());
    }
}
