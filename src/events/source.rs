//! # Event sources: recurring notifications as channels.
//!
//! An [`EventSource`] hands out a **fresh, independent** [`Inbound`] on every
//! [`channel`](EventSource::channel) call. Each channel has its own lock state and
//! buffer, so two consumers never alias one stream.
//!
//! ```text
//! emit(value)
//!   ├─► channel 1 (reader attached)  ──► write with backpressure
//!   ├─► channel 2 (nobody reading)   ──► Queue: write with backpressure
//!   │                                    BestEffort: dropped
//!   └─► channel 3 (consumer dropped) ──► pruned
//! ```
//!
//! ## Registered interest
//! A channel is *registered* while its consumer end is held by a
//! [`Reader`](crate::Reader) or a running [`pipe`](crate::pipe). The
//! [`Delivery`] policy fixed at construction decides what unregistered channels
//! receive.
//!
//! ## Default actions
//! Sources of [`Notice<T>`] can [`dispatch`](EventSource::dispatch) a value tied to
//! a [`DefaultAction`]. Consumers may [`prevent`](Notice::prevent) it while the
//! window is open: until every registered consumer that received the notice is
//! suspended on a read again, or the source's `window_turns` scheduler turns pass.
//! A turn waits for every consumer task of the runtime that is busy to finish its
//! current poll, so a consumer that prevents within the poll that received the
//! notice is on time on any runtime flavor.
//!
//! ## Example
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use tasklane::{Delivery, EventSource};
//!
//! let ticks = EventSource::<u32>::new("ticks", Delivery::Queue).with_high_water_mark(4);
//! let rx = ticks.channel();
//! assert_eq!(ticks.emit(1).await, 1);
//!
//! let mut reader = rx.acquire().unwrap();
//! assert_eq!(reader.read().await.unwrap(), Some(1));
//! # }
//! ```

use std::sync::atomic::{AtomicU8, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use futures::future::join_all;
use parking_lot::Mutex;

use crate::channel::{Inbound, Side};
use crate::tasks::pulse::{self, Pulse};

/// What an unregistered channel receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Buffer under backpressure until somebody reads.
    Queue,
    /// Silently drop.
    BestEffort,
}

/// Source of recurring notifications.
pub struct EventSource<T> {
    name: &'static str,
    delivery: Delivery,
    high_water_mark: usize,
    window_turns: usize,
    channels: Mutex<Vec<Weak<Side<T>>>>,
}

impl<T> EventSource<T> {
    /// Default backpressure threshold of every handed-out channel.
    pub const DEFAULT_HIGH_WATER_MARK: usize = 16;
    /// Default number of scheduler turns a dispatched default action stays preventable.
    pub const DEFAULT_WINDOW_TURNS: usize = 4;

    /// Creates a source with the given policy.
    pub fn new(name: &'static str, delivery: Delivery) -> Self {
        Self {
            name,
            delivery,
            high_water_mark: Self::DEFAULT_HIGH_WATER_MARK,
            window_turns: Self::DEFAULT_WINDOW_TURNS,
            channels: Mutex::new(Vec::new()),
        }
    }

    /// Sets the backpressure threshold of channels handed out from now on.
    #[must_use]
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }

    /// Sets how many scheduler turns a dispatched default action stays preventable.
    #[must_use]
    pub fn with_window_turns(mut self, turns: usize) -> Self {
        self.window_turns = turns;
        self
    }

    /// Name given at construction.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Delivery policy for unregistered channels.
    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    /// Returns a new channel that receives every subsequent emission.
    ///
    /// Dropping the returned inbound (and any reader taken from it) detaches the
    /// channel: pending emissions to it fail and it is pruned.
    pub fn channel(&self) -> Inbound<T> {
        let side = Side::new(self.high_water_mark);
        side.detach_when_abandoned();
        self.channels.lock().push(Arc::downgrade(&side));
        Inbound::from_side(side)
    }

    /// Number of channels still attached.
    pub fn channel_count(&self) -> usize {
        let mut channels = self.channels.lock();
        channels.retain(|side| side.strong_count() > 0);
        channels.len()
    }

    /// Closes every attached channel; readers drain what is buffered, then see `None`.
    pub fn close(&self) {
        for side in self.live() {
            let _ = side.close();
        }
    }

    /// Snapshot of attached, non-terminal channels; prunes the rest.
    fn live(&self) -> Vec<Arc<Side<T>>> {
        let mut channels = self.channels.lock();
        let mut live = Vec::with_capacity(channels.len());
        channels.retain(|weak| match weak.upgrade() {
            Some(side) if !side.status().is_terminal() => {
                live.push(side);
                true
            }
            _ => false,
        });
        live
    }
}

impl<T: Clone> EventSource<T> {
    /// Emits `value` to every attached channel according to the delivery policy.
    ///
    /// Suspends while any receiving channel is at its high-water mark. Returns the
    /// number of channels the value was written to.
    pub async fn emit(&self, value: T) -> usize {
        self.deliver(value).await.len()
    }

    /// Writes `value` to every receiving channel; returns the sides that accepted it.
    async fn deliver(&self, value: T) -> Vec<Arc<Side<T>>> {
        let targets: Vec<Arc<Side<T>>> = self
            .live()
            .into_iter()
            .filter(|side| side.has_interest() || self.delivery == Delivery::Queue)
            .collect();

        let writes = targets.iter().map(|side| side.write(value.clone()));
        let results = join_all(writes).await;

        targets
            .into_iter()
            .zip(results)
            .filter_map(|(side, res)| res.is_ok().then_some(side))
            .collect()
    }
}

impl<T> Drop for EventSource<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> std::fmt::Debug for EventSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource")
            .field("name", &self.name)
            .field("delivery", &self.delivery)
            .field("high_water_mark", &self.high_water_mark)
            .finish()
    }
}

const PENDING: u8 = 0;
const PREVENTED: u8 = 1;
const COMMITTED: u8 = 2;

/// A default action that consumers of a notice may prevent before it commits.
///
/// Clones share one state.
#[derive(Clone, Debug)]
pub struct DefaultAction {
    state: Arc<AtomicU8>,
}

impl DefaultAction {
    fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(PENDING)),
        }
    }

    /// Prevents the action. Returns false if it already committed.
    pub fn prevent(&self) -> bool {
        match self.state.compare_exchange(
            PENDING,
            PREVENTED,
            AtomicOrdering::AcqRel,
            AtomicOrdering::Acquire,
        ) {
            Ok(_) => true,
            Err(current) => current == PREVENTED,
        }
    }

    /// True once a consumer prevented the action.
    pub fn is_prevented(&self) -> bool {
        self.state.load(AtomicOrdering::Acquire) == PREVENTED
    }

    /// True once the window closed without a prevent.
    pub fn is_committed(&self) -> bool {
        self.state.load(AtomicOrdering::Acquire) == COMMITTED
    }

    /// Closes the window. Returns true if the action was not prevented.
    fn commit(&self) -> bool {
        self.state
            .compare_exchange(
                PENDING,
                COMMITTED,
                AtomicOrdering::AcqRel,
                AtomicOrdering::Acquire,
            )
            .is_ok()
    }
}

/// A dispatched value with its cancelable default action.
#[derive(Clone, Debug)]
pub struct Notice<T> {
    value: T,
    action: DefaultAction,
}

impl<T> Notice<T> {
    /// The dispatched value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Consumes the notice, returning the value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// The default action tied to this notice.
    pub fn action(&self) -> &DefaultAction {
        &self.action
    }

    /// Shorthand for `self.action().prevent()`.
    pub fn prevent(&self) -> bool {
        self.action.prevent()
    }
}

/// Outcome of [`EventSource::dispatch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dispatch {
    /// Channels the notice was written to.
    pub delivered: usize,
    /// A consumer prevented the default action.
    pub prevented: bool,
}

impl<T: Clone> EventSource<Notice<T>> {
    /// Delivers `value` as a [`Notice`] and waits for its window to close.
    ///
    /// The caller performs the default action iff `prevented` is false.
    pub async fn dispatch(&self, value: T) -> Dispatch {
        let action = DefaultAction::new();
        let notice = Notice {
            value,
            action: action.clone(),
        };
        let delivered = self.deliver(notice).await;
        let watching: Vec<_> = delivered
            .iter()
            .filter(|side| side.has_interest())
            .collect();

        let mut turns = 0;
        while turns < self.window_turns && !action.is_prevented() {
            if watching
                .iter()
                .all(|side| side.is_idle() || side.status().is_terminal())
            {
                break;
            }
            let pulses: Vec<Arc<Pulse>> = watching
                .iter()
                .filter_map(|side| side.reader_pulse())
                .collect();
            pulse::turn(&pulses).await;
            turns += 1;
        }

        Dispatch {
            delivered: delivered.len(),
            prevented: !action.commit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::channel::SideStatus;
    use crate::error::{ChannelError, Fault};

    #[tokio::test]
    async fn every_call_returns_an_independent_channel() {
        let source = EventSource::<u8>::new("clicks", Delivery::Queue);
        let a = source.channel();
        let b = source.channel();

        let _reader = a.acquire().unwrap();
        assert!(a.is_locked());
        assert!(!b.is_locked());
        assert!(b.acquire().is_ok());

        assert_eq!(source.emit(7).await, 2);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[tokio::test]
    async fn best_effort_drops_for_unregistered_channels() {
        let source = EventSource::<u8>::new("ticks", Delivery::BestEffort);
        let idle = source.channel();
        let watched = source.channel();
        let mut reader = watched.acquire().unwrap();

        assert_eq!(source.emit(1).await, 1);
        assert!(idle.is_empty());
        assert_eq!(reader.read().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn queue_policy_backpressures_the_eleventh_notification() {
        let source = Arc::new(EventSource::<usize>::new("jobs", Delivery::Queue).with_high_water_mark(10));
        let rx = source.channel();
        let emitted = Arc::new(AtomicUsize::new(0));

        let producer = {
            let source = source.clone();
            let emitted = emitted.clone();
            tokio::spawn(async move {
                for n in 0..15 {
                    source.emit(n).await;
                    emitted.fetch_add(1, AtomicOrdering::SeqCst);
                }
            })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(emitted.load(AtomicOrdering::SeqCst), 10);
        assert_eq!(rx.len(), 10);

        let mut reader = rx.acquire().unwrap();
        assert_eq!(reader.read().await.unwrap(), Some(0));
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(emitted.load(AtomicOrdering::SeqCst), 11);

        for expected in 1..15 {
            assert_eq!(reader.read().await.unwrap(), Some(expected));
        }
        producer.await.unwrap();
        assert_eq!(emitted.load(AtomicOrdering::SeqCst), 15);
    }

    #[tokio::test]
    async fn dropping_the_consumer_detaches_pending_emits() {
        let source = Arc::new(EventSource::<u8>::new("jobs", Delivery::Queue).with_high_water_mark(1));
        let rx = source.channel();
        assert_eq!(source.emit(1).await, 1);

        let blocked = {
            let source = source.clone();
            tokio::spawn(async move { source.emit(2).await })
        };
        tokio::task::yield_now().await;
        drop(rx);

        assert_eq!(blocked.await.unwrap(), 0);
        assert_eq!(source.channel_count(), 0);
    }

    #[tokio::test]
    async fn close_ends_every_channel() {
        let source = EventSource::<u8>::new("jobs", Delivery::Queue);
        let rx = source.channel();
        source.emit(3).await;
        source.close();

        assert!(matches!(rx.status(), SideStatus::Closed));
        let mut reader = rx.acquire().unwrap();
        assert_eq!(reader.read().await.unwrap(), Some(3));
        assert_eq!(reader.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn consumer_can_prevent_while_window_is_open() {
        let source = EventSource::<Notice<&'static str>>::new("submit", Delivery::BestEffort);
        let rx = source.channel();
        let mut reader = rx.acquire().unwrap();

        let consumer = tokio::spawn(async move {
            let notice = reader.read().await.unwrap().unwrap();
            let prevented = notice.prevent();
            // park again so the window can close early
            let _ = reader.read().await;
            prevented
        });
        tokio::task::yield_now().await;

        let outcome = source.dispatch("form").await;
        assert_eq!(outcome.delivered, 1);
        assert!(outcome.prevented);
        source.close();
        assert!(consumer.await.unwrap());
    }

    #[tokio::test]
    async fn window_commits_once_consumer_is_idle_again() {
        let source = EventSource::<Notice<u8>>::new("submit", Delivery::BestEffort);
        let rx = source.channel();
        let mut reader = rx.acquire().unwrap();

        let (tx_notice, rx_notice) = tokio::sync::oneshot::channel();
        let consumer = tokio::spawn(async move {
            let notice = reader.read().await.unwrap().unwrap();
            let _ = tx_notice.send(notice);
            reader.read().await
        });
        tokio::task::yield_now().await;

        let outcome = source.dispatch(1).await;
        assert!(!outcome.prevented);

        let notice = rx_notice.await.unwrap();
        assert!(notice.action().is_committed());
        assert!(!notice.prevent());

        drop(source);
        assert!(matches!(consumer.await.unwrap(), Ok(None)));
    }

    #[tokio::test]
    async fn dispatch_without_consumers_commits_immediately() {
        let source = EventSource::<Notice<u8>>::new("submit", Delivery::BestEffort);
        let outcome = source.dispatch(1).await;
        assert_eq!(
            outcome,
            Dispatch {
                delivered: 0,
                prevented: false
            }
        );
    }

    #[test]
    fn detached_fault_is_labelled() {
        let err = ChannelError::Failed(Fault::Detached);
        assert_eq!(err.fault().map(Fault::as_label), Some("consumer_detached"));
    }
}
