//! # Poll pulse of a task entry.
//!
//! A [`Pulse`] counts the finished polls of one entry future and tells whether
//! the task is *busy*: being polled right now, or woken and waiting for its next
//! poll. The driver installs a [`Beat`] around every poll of the entry, which
//! wraps the waker so wake-ups are visible to the pulse.
//!
//! Handling windows (abort delivery, default actions) are measured in
//! [`turn`]s. A turn yields once and then waits until every task that was busy
//! when the turn started has finished one more poll. A reader that gets to its
//! read within the same unit of work is therefore on time on any tokio runtime
//! flavor, not only on the current-thread one.
//!
//! ```text
//! turn(pulses)
//!   ├─► mark every busy pulse (polls so far)
//!   ├─► yield_now
//!   └─► wait until each marked pulse polled past its mark (or retired)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};

use futures::task::{ArcWake, waker_ref};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::BoxTaskFuture;
use crate::error::TaskError;

tokio::task_local! {
    static CURRENT: Arc<Pulse>;
}

/// Poll bookkeeping of one task entry.
#[derive(Debug, Default)]
pub(crate) struct Pulse {
    polls: AtomicU64,
    running: AtomicBool,
    woken: AtomicBool,
    retired: AtomicBool,
    ticked: Notify,
}

impl Pulse {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pulse of the entry being polled on this thread, if any.
    pub(crate) fn current() -> Option<Arc<Pulse>> {
        CURRENT.try_with(Arc::clone).ok()
    }

    /// Polls finished so far, if the task is busy.
    fn mark(&self) -> Option<u64> {
        // polls first: a poll ending after this load still moves past the mark
        let polls = self.polls.load(Ordering::SeqCst);
        if self.retired.load(Ordering::SeqCst) {
            return None;
        }
        let busy = self.running.load(Ordering::SeqCst) || self.woken.load(Ordering::SeqCst);
        busy.then_some(polls)
    }

    async fn polled_past(&self, mark: u64) {
        loop {
            let notified = self.ticked.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.polls.load(Ordering::SeqCst) > mark {
                return;
            }
            notified.await;
        }
    }

    fn begin_poll(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.woken.store(false, Ordering::SeqCst);
    }

    fn end_poll(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.ticked.notify_waiters();
    }

    /// The entry finished or was dropped; it is never busy again.
    pub(crate) fn retire(&self) {
        if self.retired.swap(true, Ordering::SeqCst) {
            return;
        }
        self.end_poll();
    }

    #[cfg(test)]
    pub(crate) fn polls(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }
}

/// One scheduler turn as seen by the tasks behind `pulses`.
pub(crate) async fn turn(pulses: &[Arc<Pulse>]) {
    let marks: Vec<(&Arc<Pulse>, u64)> = pulses
        .iter()
        .filter_map(|pulse| pulse.mark().map(|mark| (pulse, mark)))
        .collect();
    tokio::task::yield_now().await;
    for (pulse, mark) in marks {
        pulse.polled_past(mark).await;
    }
}

/// Waker shim installed around every poll of an entry.
pub(crate) struct Beat {
    pulse: Arc<Pulse>,
    waker: Mutex<Option<Waker>>,
}

impl Beat {
    pub(crate) fn new(pulse: Arc<Pulse>) -> Arc<Self> {
        Arc::new(Self {
            pulse,
            waker: Mutex::new(None),
        })
    }

    pub(crate) fn pulse(&self) -> &Arc<Pulse> {
        &self.pulse
    }

    /// Polls `fut` once, with this pulse as the current one.
    pub(crate) fn poll(
        self: &Arc<Self>,
        fut: &mut BoxTaskFuture,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), TaskError>> {
        {
            let mut slot = self.waker.lock();
            match slot.as_ref() {
                Some(waker) if waker.will_wake(cx.waker()) => {}
                _ => *slot = Some(cx.waker().clone()),
            }
        }
        self.pulse.begin_poll();
        let waker = waker_ref(self);
        let mut inner = Context::from_waker(&waker);
        let res = CURRENT.sync_scope(Arc::clone(&self.pulse), || fut.as_mut().poll(&mut inner));
        match res {
            Poll::Pending => self.pulse.end_poll(),
            Poll::Ready(_) => self.pulse.retire(),
        }
        res
    }
}

impl ArcWake for Beat {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.pulse.woken.store(true, Ordering::SeqCst);
        let waker = arc_self.waker.lock().clone();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}
