//! Flow-controlled channel sides.
//!
//! A *side* is one direction of a channel: a FIFO buffer with a high-water mark,
//! a terminal flag and two independently lockable ends.
//!
//! ```text
//!            Outbound<T> ──acquire──► Writer<T>          Reader<T> ◄──acquire── Inbound<T>
//!                                        │ write()           ▲ read()
//!                                        ▼                   │
//!                         ┌──────────────────────────────────────────┐
//!                         │ Side: buffer · hwm · Open/Closed/Errored │
//!                         └──────────────────────────────────────────┘
//! ```
//!
//! A task's channel pair is two sides built by [`duplex`]: the task reads its
//! requests from one and writes its results to the other; its parent holds the
//! opposite ends.
//!
//! ## Contents
//! - [`Inbound`] / [`Reader`]: consumer end and its exclusive lock
//! - [`Outbound`] / [`Writer`]: producer end and its exclusive lock
//! - [`pipe`] / [`Piping`]: move messages between two sides without touching them
//! - [`SideStatus`], [`Holder`]: introspection

mod inbound;
mod outbound;
mod pipe;
mod side;

pub use inbound::{Inbound, Reader};
pub use outbound::{Outbound, Writer};
pub use pipe::{Piping, pipe};
pub use side::{Holder, SideStatus};

pub(crate) use side::Side;

/// The two ends a task (or its parent) operates on.
#[derive(Debug)]
pub struct Ports<T> {
    /// Where messages arrive.
    pub inbound: Inbound<T>,
    /// Where messages are sent.
    pub outbound: Outbound<T>,
}

/// Creates a single side and returns its producer and consumer ends.
///
/// # Example
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), tasklane::ChannelError> {
/// let (tx, rx) = tasklane::channel::<&str>(8);
/// let writer = tx.acquire()?;
/// writer.write("hello").await?;
/// writer.close()?;
///
/// let mut reader = rx.acquire()?;
/// assert_eq!(reader.read().await?, Some("hello"));
/// assert_eq!(reader.read().await?, None);
/// # Ok(())
/// # }
/// ```
pub fn channel<T>(high_water_mark: usize) -> (Outbound<T>, Inbound<T>) {
    let side = Side::new(high_water_mark);
    (Outbound::from_side(side.clone()), Inbound::from_side(side))
}

/// Creates a duplex channel pair.
///
/// Returns `(near, far)`: whatever is written to `near.outbound` is read from
/// `far.inbound` and vice versa.
pub fn duplex<T>(high_water_mark: usize) -> (Ports<T>, Ports<T>) {
    let (a_tx, a_rx) = channel(high_water_mark);
    let (b_tx, b_rx) = channel(high_water_mark);
    (
        Ports {
            inbound: b_rx,
            outbound: a_tx,
        },
        Ports {
            inbound: a_rx,
            outbound: b_tx,
        },
    )
}
