//! # Producer end of a side.
//!
//! [`Outbound`] is the move-only handle to the producer end; [`Writer`] is the
//! exclusive lock on it and the only way to write, close or error the side.

use std::fmt;
use std::sync::Arc;

use super::side::{Holder, Side, SideStatus};
use crate::error::{ChannelError, Fault};

/// Producer end of a channel side.
///
/// Not `Clone`: handing it to another task moves it.
pub struct Outbound<T> {
    side: Arc<Side<T>>,
}

impl<T> Outbound<T> {
    pub(crate) fn from_side(side: Arc<Side<T>>) -> Self {
        Self { side }
    }

    pub(crate) fn side(&self) -> &Arc<Side<T>> {
        &self.side
    }

    /// Takes the exclusive write lock.
    ///
    /// Fails with [`ChannelError::AlreadyLocked`] if a writer or pipe holds it; never queues.
    pub fn acquire(&self) -> Result<Writer<T>, ChannelError> {
        self.side.lock_write(Holder::Writer)?;
        Ok(Writer::new(Arc::clone(&self.side), Holder::Writer))
    }

    /// Returns true while a writer or a pipe holds the end.
    pub fn is_locked(&self) -> bool {
        self.side.write_holder().is_some()
    }

    /// Current terminal flag.
    pub fn status(&self) -> SideStatus {
        self.side.status()
    }
}

impl<T> fmt::Debug for Outbound<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbound")
            .field("status", &self.side.status())
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Exclusive write lock on an [`Outbound`]. Released on drop.
///
/// `write` takes `&self`, so one writer may have several writes in flight
/// (e.g. from a `join!`); under backpressure they are admitted in the order they
/// suspended.
pub struct Writer<T> {
    side: Arc<Side<T>>,
    holder: Holder,
}

impl<T> Writer<T> {
    pub(crate) fn new(side: Arc<Side<T>>, holder: Holder) -> Self {
        Self { side, holder }
    }

    /// Enqueues `msg`.
    ///
    /// Suspends while the buffer is at its high-water mark; fails with
    /// [`ChannelError::Closed`] after close and with the fault after error.
    pub async fn write(&self, msg: T) -> Result<(), ChannelError> {
        self.side.write(msg).await
    }

    /// Closes the side. Buffered and suspended writes are still delivered; idempotent.
    pub fn close(&self) -> Result<(), ChannelError> {
        self.side.close()
    }

    /// Errors the side: buffered messages are discarded and every pending and
    /// future operation resolves to `fault`.
    pub fn error(&self, fault: Fault) {
        self.side.error(fault);
    }

    /// Returns the lock; dropping the writer does the same.
    pub fn release(self) {}
}

impl<T> Drop for Writer<T> {
    fn drop(&mut self) {
        self.side.unlock_write(self.holder);
    }
}

impl<T> fmt::Debug for Writer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("holder", &self.holder)
            .field("status", &self.side.status())
            .finish()
    }
}
