//! # Runtime: owns the supervision tree, the event bus and graceful shutdown.
//!
//! The [`Runtime`] is the host's side of a task tree. It spawns root tasks,
//! adopts orphans on the host's behalf, exposes lifecycle events as a channel,
//! and waits for the tree to finish, abort or shut down.
//!
//! ## High-level architecture
//! ```text
//! Runtime::builder(cfg).with_loader(..).with_subscribers(..).build()
//!   ├─ Bus                       (broadcast of lifecycle events)
//!   ├─ SubscriberSet             Bus ─► listener ─► emit(&Event) ─► [queue S1] .. [queue SN]
//!   ├─ EventSource<Event>        Bus ─► mirror   ─► lifecycle() channels (best effort)
//!   └─ Tree                      arena of task records
//!
//! spawn(name) ──► ModuleLoader::load ──► Tree::spawn_module ──► driver (tokio task)
//!
//! wait():
//!   all drivers exited ──► Ok(()) | Err(Aborted) if an abort reached a root
//!
//! Shutdown path (shutdown / run on OS signal):
//!   Bus.publish(ShutdownRequested)
//!   Tree::shutdown_all()          ──► every root closed, cascading; no new spawns
//!   wait up to grace:
//!     ├─ all drivers exited ──► Bus.publish(AllStoppedWithin)
//!     └─ timeout            ──► Bus.publish(GraceExceeded), Err(GraceExceeded { stuck })
//! ```
//!
//! ## Example
//! ```rust
//! use tasklane::{Config, ModuleFn, ModuleTable, Ports, Runtime, TaskContext, TaskError};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let echo = ModuleFn::arc("echo", |_ctx: TaskContext<String>, ports: Ports<String>| async move {
//!         let mut requests = ports.inbound.acquire()?;
//!         let replies = ports.outbound.acquire()?;
//!         while let Some(msg) = requests.read().await? {
//!             replies.write(msg.to_uppercase()).await?;
//!         }
//!         Ok::<_, TaskError>(())
//!     });
//!
//!     let rt = Runtime::<String>::builder(Config::default())
//!         .with_loader(ModuleTable::<String>::new().with(echo))
//!         .build();
//!
//!     let task = rt.spawn("echo").await?;
//!     let writer = task.outbound().acquire()?;
//!     writer.write("hi".to_string()).await?;
//!     writer.close()?;
//!
//!     let mut reader = task.inbound().acquire()?;
//!     assert_eq!(reader.read().await?, Some("HI".to_string()));
//!
//!     rt.wait().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use super::builder::RuntimeBuilder;
use super::config::Config;
use super::orphans::Orphans;
use super::shutdown;
use super::tree::Tree;
use crate::channel::Inbound;
use crate::error::{AbortError, RuntimeError, SpawnError, SuperviseError};
use crate::events::{Bus, Event, EventKind, EventSource};
use crate::tasks::{ModuleRef, TaskHandle, TaskId, TaskState};

/// Host handle to a task tree.
pub struct Runtime<M> {
    cfg: Config,
    bus: Bus,
    tree: Arc<Tree<M>>,
    lifecycle: Arc<EventSource<Event>>,
}

impl<M: Send + 'static> Runtime<M> {
    /// Starts building a runtime with `cfg`.
    pub fn builder(cfg: Config) -> RuntimeBuilder<M> {
        RuntimeBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: Config,
        bus: Bus,
        tree: Arc<Tree<M>>,
        lifecycle: Arc<EventSource<Event>>,
    ) -> Self {
        Self {
            cfg,
            bus,
            tree,
            lifecycle,
        }
    }

    /// Configuration the runtime was built with.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Spawns a root task running the module registered as `name`.
    ///
    /// Resolves once the entry has started. The host is the task's parent: it
    /// holds the returned handle's channel ends.
    pub async fn spawn(&self, name: &str) -> Result<TaskHandle<M>, SpawnError> {
        self.tree.spawn_named(None, name).await
    }

    /// Spawns a root task running `module` without going through the loader.
    pub async fn spawn_module(&self, module: ModuleRef<M>) -> Result<TaskHandle<M>, SpawnError> {
        self.tree.spawn_module(None, module).await
    }

    /// Adopts `child` out of `orphans` as a root owned by the host.
    pub fn adopt(&self, orphans: &Orphans, child: TaskId) -> Result<TaskHandle<M>, SuperviseError> {
        self.tree.adopt(None, orphans, child)
    }

    /// Returns a new best-effort channel of lifecycle events.
    ///
    /// Events are delivered only while the channel's read end is held; each call
    /// returns an independent channel.
    pub fn lifecycle(&self) -> Inbound<Event> {
        self.lifecycle.channel()
    }

    /// State of a task still in the tree; `None` once it was reclaimed.
    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.tree.state(id)
    }

    /// Ids of every task in the tree, ascending.
    pub fn tasks(&self) -> Vec<TaskId> {
        self.tree.ids()
    }

    /// The abort that took the process down, if any.
    pub fn aborted(&self) -> Option<AbortError> {
        self.tree.aborted()
    }

    /// Waits until every task driver has exited.
    ///
    /// Returns [`RuntimeError::Aborted`] if an unhandled abort reached a root.
    pub async fn wait(&self) -> Result<(), RuntimeError> {
        self.tree.wait_idle().await;
        match self.tree.aborted() {
            Some(abort) => Err(RuntimeError::Aborted(abort)),
            None => Ok(()),
        }
    }

    /// Closes every task and waits up to [`Config::grace`] for the drivers to exit.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.shutdown_with_grace(self.cfg.grace).await
    }

    /// Closes every task and waits up to `grace` for the drivers to exit.
    ///
    /// No task can be spawned afterwards.
    pub async fn shutdown_with_grace(&self, grace: Duration) -> Result<(), RuntimeError> {
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.tree.shutdown_all();

        match tokio::time::timeout(grace, self.tree.wait_idle()).await {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                self.bus.publish(Event::new(EventKind::GraceExceeded));
                Err(RuntimeError::GraceExceeded {
                    grace,
                    stuck: self.tree.stuck(),
                })
            }
        }
    }

    /// Spawns a root running `name` and drives the tree until either:
    /// - every task has finished (`Ok`, or `Aborted` after an unhandled abort), or
    /// - a termination signal arrives → graceful shutdown (may end with `GraceExceeded`).
    ///
    /// The root's results are discarded as they arrive, so a root never blocks on
    /// backpressure toward the host. Discarding is not reading: an abort of the
    /// root stays unhandled. Use [`spawn`](Self::spawn) and [`wait`](Self::wait)
    /// to consume the results.
    pub async fn run(&self, name: &str) -> Result<(), RuntimeError> {
        let root = self.spawn(name).await?;
        let finished = async {
            let (res, ()) = tokio::join!(self.wait(), root.inbound().side().discard());
            res
        };
        tokio::select! {
            res = finished => res,
            _ = shutdown::signalled() => self.shutdown().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    use super::*;
    use crate::channel::{Ports, SideStatus};
    use crate::error::{ChannelError, Fault, LoadError, TaskError};
    use crate::events::{Delivery, Notice};
    use crate::tasks::{ModuleFn, ModuleTable, TaskContext};

    type Seen = Arc<Mutex<Vec<(TaskId, AbortError)>>>;

    fn idle() -> ModuleRef<u32> {
        ModuleFn::arc("idle", |ctx: TaskContext<u32>, _ports: Ports<u32>| async move {
            ctx.cancelled().await;
            Ok::<_, TaskError>(())
        })
    }

    fn failing() -> ModuleRef<u32> {
        ModuleFn::arc("failing", |_ctx: TaskContext<u32>, _ports: Ports<u32>| async move {
            Err::<(), _>(TaskError::fail("boom"))
        })
    }

    /// Spawns two idle children, then fails.
    fn failing_parent() -> ModuleRef<u32> {
        ModuleFn::arc("failing_parent", |ctx: TaskContext<u32>, _ports: Ports<u32>| async move {
            ctx.spawn("idle").await?;
            ctx.spawn("idle").await?;
            Err::<(), _>(TaskError::fail("parent boom"))
        })
    }

    fn runtime(cfg: Config, table: ModuleTable<u32>) -> Runtime<u32> {
        Runtime::builder(cfg)
            .with_loader(table.with(idle()).with(failing()).with(failing_parent()))
            .build()
    }

    async fn eventually(mut cond: impl FnMut() -> bool) {
        for _ in 0..1_000 {
            if cond() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition never became true");
    }

    fn abort_of(res: Result<Option<u32>, ChannelError>) -> AbortError {
        match res {
            Err(ChannelError::Failed(Fault::Abort(abort))) => abort,
            other => panic!("expected an abort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn parent_reads_child_abort() {
        let seen: Seen = Arc::default();
        let reader = {
            let seen = seen.clone();
            ModuleFn::arc("reader", move |ctx: TaskContext<u32>, _ports: Ports<u32>| {
                let seen = seen.clone();
                async move {
                    let child = ctx.spawn("failing").await?;
                    let mut replies = child.inbound().acquire()?;
                    match replies.read().await {
                        Err(ChannelError::Failed(Fault::Abort(abort))) => {
                            seen.lock().push((child.id(), abort));
                            Ok(())
                        }
                        other => Err(TaskError::fail(format!("unexpected {other:?}"))),
                    }
                }
            })
        };
        let rt = runtime(Config::default(), ModuleTable::<u32>::new().with(reader));

        rt.spawn("reader").await.unwrap();
        rt.wait().await.unwrap();

        let seen = seen.lock();
        let (child, abort) = &seen[0];
        assert_eq!(abort.origin(), *child);
        assert_eq!(abort.chain(), vec![*child]);
        assert!(matches!(abort.cause(), Fault::Producer(p) if p.message.contains("boom")));
        assert!(rt.tasks().is_empty());
        assert!(rt.aborted().is_none());
    }

    #[tokio::test]
    async fn parked_parent_handles_and_adopts_one_orphan() {
        let (tx, rx) = oneshot::channel::<(TaskId, TaskId)>();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let supervisor = {
            let tx = tx.clone();
            ModuleFn::arc("supervisor", move |ctx: TaskContext<u32>, ports: Ports<u32>| {
                let tx = tx.clone();
                async move {
                    let _child = ctx.spawn("failing_parent").await?;
                    let mut requests = ports.inbound.acquire()?;
                    let abort = abort_of(requests.read().await);
                    let orphans = abort.orphans().clone();
                    let (keep, lost) = (orphans.ids()[0], orphans.ids()[1]);
                    let _kept = ctx.adopt(&orphans, keep)?;
                    if let Some(tx) = tx.lock().take() {
                        let _ = tx.send((keep, lost));
                    }
                    ctx.cancelled().await;
                    Ok::<_, TaskError>(())
                }
            })
        };
        let cfg = Config {
            handler_turns: 4,
            ..Config::default()
        };
        let rt = runtime(cfg, ModuleTable::<u32>::new().with(supervisor));

        let root = rt.spawn("supervisor").await.unwrap();
        let (keep, lost) = rx.await.unwrap();
        eventually(|| rt.state(lost).is_none()).await;

        assert_eq!(rt.state(keep), Some(TaskState::Suspended));
        assert_eq!(root.children(), vec![keep]);
        assert_eq!(root.state(), TaskState::Suspended);
        assert!(rt.aborted().is_none());

        rt.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn unhandled_abort_climbs_to_the_root() {
        let middle = ModuleFn::arc("middle", |ctx: TaskContext<u32>, _ports: Ports<u32>| async move {
            let _child = ctx.spawn("failing").await?;
            ctx.cancelled().await;
            Ok::<_, TaskError>(())
        });
        let top = ModuleFn::arc("top", |ctx: TaskContext<u32>, _ports: Ports<u32>| async move {
            let _child = ctx.spawn("middle").await?;
            ctx.cancelled().await;
            Ok::<_, TaskError>(())
        });
        let rt = runtime(Config::default(), ModuleTable::<u32>::new().with(middle).with(top));

        let root = rt.spawn("top").await.unwrap();
        let err = rt.wait().await.unwrap_err();

        let RuntimeError::Aborted(abort) = err else {
            panic!("expected a process abort");
        };
        let chain = abort.chain();
        assert_eq!(chain.len(), 3);
        assert_eq!(abort.task(), root.id());
        assert_eq!(chain[2], root.id());
        assert_eq!(abort.origin(), chain[0]);
        assert!(matches!(abort.root_cause(), Fault::Producer(_)));
        assert!(rt.tasks().is_empty());
        assert!(matches!(
            rt.spawn("idle").await,
            Err(SpawnError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn host_adopts_one_orphan_and_the_other_is_closed() {
        let cfg = Config {
            handler_turns: 4,
            ..Config::default()
        };
        let rt = runtime(cfg, ModuleTable::<u32>::new());

        let parent = rt.spawn("failing_parent").await.unwrap();
        let mut replies = parent.inbound().acquire().unwrap();
        let abort = abort_of(replies.read().await);
        let orphans = abort.orphans();
        assert_eq!(orphans.parent(), parent.id());
        let (keep, lost) = (orphans.ids()[0], orphans.ids()[1]);

        let kept = rt.adopt(orphans, keep).unwrap();
        eventually(|| rt.state(lost).is_none()).await;

        assert_eq!(kept.state(), TaskState::Suspended);
        assert_eq!(kept.parent(), None);
        assert_eq!(rt.tasks(), vec![keep]);
        assert!(orphans.is_settled());
        assert!(matches!(
            rt.adopt(orphans, lost),
            Err(SuperviseError::Settled)
        ));

        kept.close();
        rt.wait().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_module_fails_to_load() {
        let rt = runtime(Config::default(), ModuleTable::<u32>::new());
        assert!(matches!(
            rt.spawn("missing").await,
            Err(SpawnError::Load(LoadError::NotFound { module })) if module == "missing"
        ));
        assert!(rt.tasks().is_empty());
    }

    #[tokio::test]
    async fn spawn_self_recurses_through_channels() {
        let countdown = ModuleFn::arc("countdown", |ctx: TaskContext<u32>, ports: Ports<u32>| async move {
            let mut requests = ports.inbound.acquire()?;
            let replies = ports.outbound.acquire()?;
            let Some(n) = requests.read().await? else {
                return Ok(());
            };
            let depth = if n == 0 {
                0
            } else {
                let child = ctx.spawn_self().await?;
                child.outbound().acquire()?.write(n - 1).await?;
                child.inbound().acquire()?.read().await?.unwrap_or(0) + 1
            };
            replies.write(depth).await?;
            Ok::<_, TaskError>(())
        });
        let rt = runtime(Config::default(), ModuleTable::<u32>::new().with(countdown));

        let root = rt.spawn("countdown").await.unwrap();
        root.outbound().acquire().unwrap().write(3).await.unwrap();
        let mut replies = root.inbound().acquire().unwrap();

        assert_eq!(replies.read().await.unwrap(), Some(3));
        assert_eq!(replies.read().await.unwrap(), None);
        rt.wait().await.unwrap();
        assert!(rt.tasks().is_empty());
    }

    #[tokio::test]
    async fn shutdown_closes_tasks_and_refuses_spawns() {
        let rt = runtime(Config::default(), ModuleTable::<u32>::new());
        let task = rt.spawn("idle").await.unwrap();
        eventually(|| task.state() == TaskState::Suspended).await;

        rt.shutdown().await.unwrap();
        assert_eq!(task.state(), TaskState::Closed);
        assert!(matches!(
            task.inbound().status(),
            SideStatus::Errored(Fault::Shutdown { .. })
        ));
        assert!(matches!(rt.spawn("idle").await, Err(SpawnError::ShuttingDown)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocked_driver_exceeds_grace() {
        let blocking = ModuleFn::arc("blocking", |_ctx: TaskContext<u32>, _ports: Ports<u32>| async move {
            std::thread::sleep(Duration::from_millis(300));
            Ok::<_, TaskError>(())
        });
        let rt = runtime(Config::default(), ModuleTable::<u32>::new().with(blocking));
        let task = rt.spawn("blocking").await.unwrap();

        match rt.shutdown_with_grace(Duration::from_millis(50)).await {
            Err(RuntimeError::GraceExceeded { stuck, .. }) => assert_eq!(stuck, vec![task.id()]),
            other => panic!("expected GraceExceeded, got {other:?}"),
        }
        rt.wait().await.unwrap();
    }

    #[tokio::test]
    async fn lifecycle_reports_spawn_and_close() {
        let rt = runtime(Config::default(), ModuleTable::<u32>::new());
        let events = rt.lifecycle();
        let mut reader = events.acquire().unwrap();

        let task = rt.spawn("idle").await.unwrap();
        task.close();

        let mut kinds = Vec::new();
        while let Some(ev) = reader.read().await.unwrap() {
            if ev.task == Some(task.id()) {
                kinds.push(ev.kind);
            }
            if ev.kind == EventKind::TaskClosed {
                assert_eq!(ev.reason.as_deref(), Some("shutdown"));
                break;
            }
        }
        assert_eq!(
            kinds,
            vec![
                EventKind::TaskSpawned,
                EventKind::TaskRunning,
                EventKind::TaskClosed
            ]
        );
    }

    #[tokio::test]
    async fn run_returns_once_the_root_completes() {
        let once = ModuleFn::arc("once", |_ctx: TaskContext<u32>, ports: Ports<u32>| async move {
            ports.outbound.acquire()?.write(1).await?;
            Ok::<_, TaskError>(())
        });
        let rt = runtime(Config::default(), ModuleTable::<u32>::new().with(once));
        rt.run("once").await.unwrap();
        assert!(rt.tasks().is_empty());
    }

    #[tokio::test]
    async fn run_discards_results_past_the_high_water_mark() {
        let chatty = ModuleFn::arc("chatty", |_ctx: TaskContext<u32>, ports: Ports<u32>| async move {
            let replies = ports.outbound.acquire()?;
            for n in 0..40 {
                replies.write(n).await?;
            }
            Ok::<_, TaskError>(())
        });
        let cfg = Config {
            high_water_mark: 4,
            ..Config::default()
        };
        let rt = runtime(cfg, ModuleTable::<u32>::new().with(chatty));
        rt.run("chatty").await.unwrap();
        assert!(rt.tasks().is_empty());
    }

    #[tokio::test]
    async fn run_leaves_a_root_abort_unhandled() {
        let rt = runtime(Config::default(), ModuleTable::<u32>::new());
        assert!(matches!(rt.run("failing").await, Err(RuntimeError::Aborted(_))));
    }

    #[tokio::test]
    async fn handler_shuts_down_an_orphan_with_its_subtree() {
        let nest = ModuleFn::arc("nest", |ctx: TaskContext<u32>, _ports: Ports<u32>| async move {
            let _child = ctx.spawn("idle").await?;
            ctx.cancelled().await;
            Ok::<_, TaskError>(())
        });
        let slot: Arc<Mutex<Option<Ports<u32>>>> = Arc::default();
        let leaving = {
            let slot = slot.clone();
            ModuleFn::arc("leaving", move |ctx: TaskContext<u32>, _ports: Ports<u32>| {
                let slot = slot.clone();
                async move {
                    let nest = ctx.spawn("nest").await?;
                    *slot.lock() = Some(nest.into_ports());
                    Err::<(), _>(TaskError::fail("leaving"))
                }
            })
        };
        let cfg = Config {
            handler_turns: 4,
            ..Config::default()
        };
        let rt = runtime(cfg, ModuleTable::<u32>::new().with(nest).with(leaving));

        let parent = rt.spawn("leaving").await.unwrap();
        let mut replies = parent.inbound().acquire().unwrap();
        let abort = abort_of(replies.read().await);
        let orphans = abort.orphans();
        let nest_id = orphans.ids()[0];
        assert_eq!(rt.tree.children_of(nest_id).len(), 1);

        orphans.shutdown(nest_id).unwrap();
        assert!(matches!(
            orphans.shutdown(nest_id),
            Err(SuperviseError::NotOrphan { .. })
        ));
        assert!(orphans.pending().is_empty());
        assert_eq!(rt.state(nest_id), None);

        let nest_ports = slot.lock().take().unwrap();
        assert!(matches!(
            nest_ports.inbound.status(),
            SideStatus::Errored(Fault::Shutdown { task }) if task == nest_id
        ));
        rt.wait().await.unwrap();
        assert!(rt.tasks().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn busy_parent_handles_child_abort_on_multi_thread() {
        for _ in 0..10 {
            let slow_reader = ModuleFn::arc("slow_reader", |ctx: TaskContext<u32>, _ports: Ports<u32>| async move {
                let child = ctx.spawn("failing").await?;
                // same unit of work as the spawn: no suspension before the read
                std::thread::sleep(Duration::from_millis(20));
                let mut replies = child.inbound().acquire()?;
                match replies.read().await {
                    Err(ChannelError::Failed(Fault::Abort(abort))) if abort.origin() == child.id() => Ok(()),
                    other => Err(TaskError::fail(format!("unexpected {other:?}"))),
                }
            });
            let rt = runtime(Config::default(), ModuleTable::<u32>::new().with(slow_reader));

            rt.spawn("slow_reader").await.unwrap();
            rt.wait().await.unwrap();
            assert!(rt.aborted().is_none());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn busy_consumer_prevents_default_on_multi_thread() {
        let source = Arc::new(EventSource::<Notice<u32>>::new("submit", Delivery::BestEffort));
        let listener = {
            let source = source.clone();
            ModuleFn::arc("listener", move |_ctx: TaskContext<u32>, _ports: Ports<u32>| {
                let notices = source.channel();
                async move {
                    let mut reader = notices.acquire()?;
                    let notice = reader
                        .read()
                        .await?
                        .ok_or_else(|| TaskError::fail("closed early"))?;
                    std::thread::sleep(Duration::from_millis(20));
                    notice.prevent();
                    let _ = reader.read().await;
                    Ok::<_, TaskError>(())
                }
            })
        };
        let rt = runtime(Config::default(), ModuleTable::<u32>::new().with(listener));
        let task = rt.spawn("listener").await.unwrap();
        eventually(|| task.state() == TaskState::Suspended).await;

        let outcome = source.dispatch(7).await;
        assert_eq!(outcome.delivered, 1);
        assert!(outcome.prevented);

        source.close();
        rt.wait().await.unwrap();
    }
}
