use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;

use super::runtime::Runtime;
use super::tree::Tree;
use crate::{
    core::Config,
    events::{Bus, Delivery, Event, EventSource},
    subscribers::{Subscribe, SubscriberSet},
    tasks::{ModuleLoader, ModuleTable},
};

/// Builder for constructing a [`Runtime`].
pub struct RuntimeBuilder<M> {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    loader: Option<Arc<dyn ModuleLoader<M>>>,
}

impl<M: Send + 'static> RuntimeBuilder<M> {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            loader: None,
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (task lifecycle, aborts, adoption)
    /// through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Sets the loader used to resolve module names on spawn.
    ///
    /// Defaults to an empty [`ModuleTable`].
    pub fn with_loader(mut self, loader: impl ModuleLoader<M>) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Builds the runtime.
    ///
    /// Must be called inside a tokio runtime: the subscriber listener and the
    /// lifecycle mirror are spawned here.
    pub fn build(self) -> Runtime<M> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        let lifecycle = Arc::new(
            EventSource::new("lifecycle", Delivery::BestEffort)
                .with_high_water_mark(self.cfg.lifecycle_high_water_mark),
        );
        subscriber_listener(&bus, &subs);
        lifecycle_mirror(&bus, &lifecycle);

        let loader: Arc<dyn ModuleLoader<M>> = match self.loader {
            Some(loader) => loader,
            None => Arc::new(ModuleTable::<M>::new()),
        };
        let tree = Tree::new(self.cfg.clone(), bus.clone(), loader);
        Runtime::new_internal(self.cfg, bus, tree, lifecycle)
    }
}

/// Subscribes to the bus and forwards events to the subscriber set (fire-and-forget).
fn subscriber_listener(bus: &Bus, subs: &Arc<SubscriberSet>) {
    let mut rx = bus.subscribe();
    let set = Arc::clone(subs);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => set.emit(&ev),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Copies bus events into the lifecycle source until the runtime is dropped.
fn lifecycle_mirror(bus: &Bus, source: &Arc<EventSource<Event>>) {
    let mut rx = bus.subscribe();
    let source = Arc::downgrade(source);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => {
                    let Some(source) = source.upgrade() else {
                        break;
                    };
                    source.emit(ev).await;
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
}
