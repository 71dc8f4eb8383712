//! # Consumer end of a side.
//!
//! [`Inbound`] is the move-only handle to the consumer end; [`Reader`] is the
//! exclusive lock on it and the only way to read.

use std::fmt;
use std::sync::Arc;

use super::side::{Holder, Side, SideStatus};
use crate::error::{ChannelError, Fault};

/// Consumer end of a channel side.
///
/// Not `Clone`: handing it to another task moves it.
pub struct Inbound<T> {
    side: Arc<Side<T>>,
}

impl<T> Inbound<T> {
    pub(crate) fn from_side(side: Arc<Side<T>>) -> Self {
        side.retain_consumer();
        Self { side }
    }

    /// Second handle onto the same side, for runtime bookkeeping.
    pub(crate) fn side(&self) -> &Arc<Side<T>> {
        &self.side
    }

    /// Takes the exclusive read lock.
    ///
    /// Fails with [`ChannelError::AlreadyLocked`] if a reader or pipe holds it; never queues.
    pub fn acquire(&self) -> Result<Reader<T>, ChannelError> {
        self.side.lock_read(Holder::Reader)?;
        Ok(Reader::new(Arc::clone(&self.side), Holder::Reader))
    }

    /// Returns true while a reader or a pipe holds the end.
    pub fn is_locked(&self) -> bool {
        self.side.read_holder().is_some()
    }

    /// Current terminal flag.
    pub fn status(&self) -> SideStatus {
        self.side.status()
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.side.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Backpressure threshold of the side.
    pub fn high_water_mark(&self) -> usize {
        self.side.high_water_mark()
    }
}

impl<T> Drop for Inbound<T> {
    fn drop(&mut self) {
        self.side.release_consumer();
    }
}

impl<T> fmt::Debug for Inbound<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbound")
            .field("status", &self.side.status())
            .field("len", &self.side.len())
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Exclusive read lock on an [`Inbound`]. Released on drop.
pub struct Reader<T> {
    side: Arc<Side<T>>,
    holder: Holder,
}

impl<T> Reader<T> {
    pub(crate) fn new(side: Arc<Side<T>>, holder: Holder) -> Self {
        side.retain_consumer();
        Self { side, holder }
    }

    /// Reads the next message.
    ///
    /// - `Ok(Some(msg))`: the oldest buffered message;
    /// - `Ok(None)`: the side was closed and fully drained;
    /// - `Err(Failed(fault))`: the side was errored.
    ///
    /// Suspends while the side is open and empty.
    pub async fn read(&mut self) -> Result<Option<T>, ChannelError> {
        self.side.read().await
    }

    /// Errors the side from the consumer end, failing the producer's pending and future writes.
    pub fn error(&self, fault: Fault) {
        self.side.error(fault);
    }

    /// Returns the lock; dropping the reader does the same.
    pub fn release(self) {}
}

impl<T> Drop for Reader<T> {
    fn drop(&mut self) {
        self.side.unlock_read(self.holder);
        self.side.release_consumer();
    }
}

impl<T> fmt::Debug for Reader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("holder", &self.holder)
            .field("status", &self.side.status())
            .finish()
    }
}
