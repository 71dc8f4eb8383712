//! # Shared state of one channel side.
//!
//! A [`Side`] is a single-direction FIFO with a consumer end and a producer end.
//! Each end has its own exclusive lock slot; the buffer, the terminal flag and the
//! waiter queues are shared.
//!
//! ## Waiters
//! ```text
//! write(msg) ──► room (len < hwm, nobody queued) ──► buffer.push_back ──► notify reader
//!            └─► no room ──► writers.push_back(PendingWrite{msg, done}) ──► await done
//!
//! read() ──► buffer.pop_front ──► admit one queued writer (FIFO)
//!        └─► empty & open ──► park on `readable`
//! ```
//!
//! ## Rules
//! - a message is owned by exactly one place: the buffer, a queued writer, or the reader;
//! - one drained message admits at most one queued writer;
//! - close admits every queued writer, then reads drain the buffer and resolve to `None`;
//! - error discards the buffer and fails every queued writer; the first error wins;
//! - a read counts toward handling the fault only until the window is closed
//!   with [`Side::close_fault_window`];
//! - the mutex is never held across an `.await`.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot, watch};

use crate::error::{ChannelError, Fault};
use crate::tasks::Pulse;

/// Who holds an end of a side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Holder {
    /// A [`Reader`](super::Reader) holds the consumer end.
    Reader,
    /// A [`Writer`](super::Writer) holds the producer end.
    Writer,
    /// A running [`pipe`](super::pipe) holds the end.
    Pipe,
}

/// Terminal flag of a side.
#[derive(Clone, Debug)]
pub enum SideStatus {
    /// Accepting writes.
    Open,
    /// Closed; buffered messages are still readable.
    Closed,
    /// Errored with a fault; everything resolves to it.
    Errored(Fault),
}

impl SideStatus {
    /// Returns true for `Closed` and `Errored`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SideStatus::Open)
    }
}

/// Result of placing a fault on a side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Placement {
    /// The fault became the side's terminal state (false if it was already errored).
    pub placed: bool,
    /// A read was suspended on the side at the moment of placement.
    pub observed: bool,
}

struct PendingWrite<T> {
    ticket: u64,
    msg: T,
    done: oneshot::Sender<Result<(), ChannelError>>,
}

struct State<T> {
    buffer: VecDeque<T>,
    high_water_mark: usize,
    status: SideStatus,
    read_holder: Option<Holder>,
    write_holder: Option<Holder>,
    writers: VecDeque<PendingWrite<T>>,
    next_ticket: u64,
    reader_parked: bool,
    /// Pulse of the task that issued the latest read.
    reader_pulse: Option<Arc<Pulse>>,
    fault_seen: bool,
    fault_window_open: bool,
    consumers: usize,
    detach_when_abandoned: bool,
}

impl<T> State<T> {
    /// Dequeues the next message, admitting one queued writer into the freed slot.
    fn take(&mut self) -> Option<T> {
        let msg = match self.buffer.pop_front() {
            Some(msg) => msg,
            None => {
                // rendezvous (hwm = 0): hand the oldest queued message straight over
                let pending = self.writers.pop_front()?;
                let _ = pending.done.send(Ok(()));
                pending.msg
            }
        };
        if self.buffer.len() < self.high_water_mark {
            if let Some(pending) = self.writers.pop_front() {
                self.buffer.push_back(pending.msg);
                let _ = pending.done.send(Ok(()));
            }
        }
        Some(msg)
    }

    fn ensure_writable(&self) -> Result<(), ChannelError> {
        match &self.status {
            SideStatus::Open => Ok(()),
            SideStatus::Closed => Err(ChannelError::Closed),
            SideStatus::Errored(fault) => Err(ChannelError::Failed(fault.clone())),
        }
    }

    fn has_room(&self) -> bool {
        self.writers.is_empty() && self.buffer.len() < self.high_water_mark
    }

    /// Marks the side errored; returns whether a read was suspended.
    fn fail(&mut self, fault: Fault) -> Option<bool> {
        if matches!(self.status, SideStatus::Errored(_)) {
            return None;
        }
        self.status = SideStatus::Errored(fault.clone());
        self.buffer.clear();
        for pending in self.writers.drain(..) {
            let _ = pending.done.send(Err(ChannelError::Failed(fault.clone())));
        }
        let observed = self.reader_parked;
        self.fault_seen = observed;
        self.fault_window_open = !observed;
        Some(observed)
    }
}

/// Shared state of one channel side.
pub(crate) struct Side<T> {
    state: Mutex<State<T>>,
    readable: Notify,
    terminated: watch::Sender<bool>,
}

impl<T> Side<T> {
    pub(crate) fn new(high_water_mark: usize) -> Arc<Self> {
        let (terminated, _) = watch::channel(false);
        Arc::new(Self {
            state: Mutex::new(State {
                buffer: VecDeque::new(),
                high_water_mark,
                status: SideStatus::Open,
                read_holder: None,
                write_holder: None,
                writers: VecDeque::new(),
                next_ticket: 0,
                reader_parked: false,
                reader_pulse: None,
                fault_seen: false,
                fault_window_open: false,
                consumers: 0,
                detach_when_abandoned: false,
            }),
            readable: Notify::new(),
            terminated,
        })
    }

    /// Errors the side with [`Fault::Detached`] once its last consumer handle drops.
    pub(crate) fn detach_when_abandoned(&self) {
        self.state.lock().detach_when_abandoned = true;
    }

    // ---- locks ----

    pub(crate) fn lock_read(&self, holder: Holder) -> Result<(), ChannelError> {
        let mut st = self.state.lock();
        if st.read_holder.is_some() {
            return Err(ChannelError::AlreadyLocked);
        }
        st.read_holder = Some(holder);
        Ok(())
    }

    pub(crate) fn unlock_read(&self, holder: Holder) {
        let mut st = self.state.lock();
        if st.read_holder == Some(holder) {
            st.read_holder = None;
        }
    }

    pub(crate) fn lock_write(&self, holder: Holder) -> Result<(), ChannelError> {
        let mut st = self.state.lock();
        if st.write_holder.is_some() {
            return Err(ChannelError::AlreadyLocked);
        }
        st.write_holder = Some(holder);
        Ok(())
    }

    pub(crate) fn unlock_write(&self, holder: Holder) {
        let mut st = self.state.lock();
        if st.write_holder == Some(holder) {
            st.write_holder = None;
        }
    }

    /// Atomically locks `source`'s consumer end and `destination`'s producer end for a pipe.
    ///
    /// Either both ends are taken or neither is.
    pub(crate) fn lock_pipe(source: &Side<T>, destination: &Side<T>) -> Result<(), ChannelError> {
        if std::ptr::eq(source, destination) {
            let mut st = source.state.lock();
            if st.read_holder.is_some() || st.write_holder.is_some() {
                return Err(ChannelError::AlreadyLocked);
            }
            st.read_holder = Some(Holder::Pipe);
            st.write_holder = Some(Holder::Pipe);
            return Ok(());
        }

        // fixed acquisition order keeps concurrent pipes deadlock-free
        let source_first = (source as *const Side<T>) < (destination as *const Side<T>);
        let (mut src, mut dst) = if source_first {
            let src = source.state.lock();
            let dst = destination.state.lock();
            (src, dst)
        } else {
            let dst = destination.state.lock();
            let src = source.state.lock();
            (src, dst)
        };
        if src.read_holder.is_some() || dst.write_holder.is_some() {
            return Err(ChannelError::AlreadyLocked);
        }
        src.read_holder = Some(Holder::Pipe);
        dst.write_holder = Some(Holder::Pipe);
        Ok(())
    }

    // ---- consumer handle accounting ----

    pub(crate) fn retain_consumer(&self) {
        self.state.lock().consumers += 1;
    }

    pub(crate) fn release_consumer(&self) {
        let abandoned = {
            let mut st = self.state.lock();
            st.consumers = st.consumers.saturating_sub(1);
            st.consumers == 0 && st.detach_when_abandoned
        };
        if abandoned {
            self.error(Fault::Detached);
        }
    }

    // ---- operations ----

    /// Reads the next message, suspending while the side is open and empty.
    pub(crate) async fn read(&self) -> Result<Option<T>, ChannelError> {
        let pulse = Pulse::current();
        loop {
            {
                let mut st = self.state.lock();
                if pulse.is_some() {
                    st.reader_pulse.clone_from(&pulse);
                }
                if let Some(msg) = st.take() {
                    return Ok(Some(msg));
                }
                if let SideStatus::Errored(fault) = &st.status {
                    let fault = fault.clone();
                    if st.fault_window_open {
                        st.fault_seen = true;
                    }
                    return Err(ChannelError::Failed(fault));
                }
                if matches!(st.status, SideStatus::Closed) {
                    return Ok(None);
                }
                st.reader_parked = true;
            }
            let parked = Parked { side: self };
            self.readable.notified().await;
            drop(parked);
        }
    }

    /// Enqueues a message, suspending under backpressure.
    pub(crate) async fn write(&self, msg: T) -> Result<(), ChannelError> {
        let (ticket, done) = {
            let mut st = self.state.lock();
            st.ensure_writable()?;
            if st.has_room() {
                st.buffer.push_back(msg);
                drop(st);
                self.readable.notify_one();
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            let ticket = st.next_ticket;
            st.next_ticket += 1;
            st.writers.push_back(PendingWrite {
                ticket,
                msg,
                done: tx,
            });
            (ticket, rx)
        };
        self.readable.notify_one();

        let blocked = Blocked { side: self, ticket };
        let res = done.await.unwrap_or(Err(ChannelError::Closed));
        drop(blocked);
        res
    }

    /// Consumes and drops messages until the side terminates.
    ///
    /// Never parks as a reader, so a fault placed meanwhile is not observed.
    pub(crate) async fn discard(&self) {
        loop {
            let notified = self.readable.notified();
            {
                let mut st = self.state.lock();
                while st.take().is_some() {}
                if st.status.is_terminal() {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Closes the side; idempotent.
    pub(crate) fn close(&self) -> Result<(), ChannelError> {
        {
            let mut st = self.state.lock();
            match &st.status {
                SideStatus::Open => {}
                SideStatus::Closed => return Ok(()),
                SideStatus::Errored(fault) => return Err(ChannelError::Failed(fault.clone())),
            }
            st.status = SideStatus::Closed;
            while let Some(pending) = st.writers.pop_front() {
                st.buffer.push_back(pending.msg);
                let _ = pending.done.send(Ok(()));
            }
        }
        self.readable.notify_one();
        self.terminated.send_replace(true);
        Ok(())
    }

    /// Errors the side. A closed side can still be errored (its buffer is discarded).
    pub(crate) fn error(&self, fault: Fault) -> Placement {
        let observed = self.state.lock().fail(fault);
        match observed {
            None => Placement {
                placed: false,
                observed: false,
            },
            Some(observed) => {
                self.readable.notify_one();
                self.terminated.send_replace(true);
                Placement {
                    placed: true,
                    observed,
                }
            }
        }
    }

    // ---- introspection ----

    /// True once a read has observed (or was suspended for) the current fault.
    pub(crate) fn fault_seen(&self) -> bool {
        self.state.lock().fault_seen
    }

    /// Ends the handling window of the current fault and returns the verdict.
    ///
    /// Reads after this call still fail with the fault but no longer count.
    pub(crate) fn close_fault_window(&self) -> bool {
        let mut st = self.state.lock();
        st.fault_window_open = false;
        st.fault_seen
    }

    pub(crate) fn reader_pulse(&self) -> Option<Arc<Pulse>> {
        self.state.lock().reader_pulse.clone()
    }

    /// Everything written so far was consumed and a read is suspended again.
    pub(crate) fn is_idle(&self) -> bool {
        let st = self.state.lock();
        st.reader_parked && st.buffer.is_empty() && st.writers.is_empty()
    }

    /// Registered interest: the consumer end is held by a reader or a pipe.
    pub(crate) fn has_interest(&self) -> bool {
        self.state.lock().read_holder.is_some()
    }

    pub(crate) fn read_holder(&self) -> Option<Holder> {
        self.state.lock().read_holder
    }

    pub(crate) fn write_holder(&self) -> Option<Holder> {
        self.state.lock().write_holder
    }

    pub(crate) fn status(&self) -> SideStatus {
        self.state.lock().status.clone()
    }

    /// Buffered messages (queued writers not included).
    pub(crate) fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub(crate) fn high_water_mark(&self) -> usize {
        self.state.lock().high_water_mark
    }

    /// Subscribes to the terminal flag; the value flips to `true` once.
    pub(crate) fn watch_terminated(&self) -> watch::Receiver<bool> {
        self.terminated.subscribe()
    }
}

/// Clears the parked flag when a suspended read resumes or is dropped.
struct Parked<'a, T> {
    side: &'a Side<T>,
}

impl<T> Drop for Parked<'_, T> {
    fn drop(&mut self) {
        self.side.state.lock().reader_parked = false;
    }
}

/// Withdraws a queued write whose future was dropped before admission.
struct Blocked<'a, T> {
    side: &'a Side<T>,
    ticket: u64,
}

impl<T> Drop for Blocked<'_, T> {
    fn drop(&mut self) {
        let ticket = self.ticket;
        self.side
            .state
            .lock()
            .writers
            .retain(|pending| pending.ticket != ticket);
    }
}
