//! # Pipe: connect a consumer end to a producer end.
//!
//! ```text
//! pipe(source, destination)
//!   ├─► lock source(read) + destination(write) atomically (locked-by-pipe)
//!   └─► spawn transfer loop:
//!         source.read() ──► destination.write()      (backpressure applies)
//!         source closed     ──► destination.close()
//!         source errored    ──► destination.error(fault)
//!         destination ended ──► source closed / errored to match
//! ```
//!
//! While the pipe runs both ends stay locked, so no other holder can observe the
//! messages in flight. Neither end has to be touched by the task that set the pipe
//! up; it may drop its handles right after.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::inbound::{Inbound, Reader};
use super::outbound::{Outbound, Writer};
use super::side::{Holder, Side, SideStatus};
use crate::error::{ChannelError, Fault};

/// Handle to a running pipe.
#[derive(Debug)]
pub struct Piping {
    join: JoinHandle<Result<u64, ChannelError>>,
}

impl Piping {
    /// Waits for the pipe to finish.
    ///
    /// Returns the number of messages moved when the source closed normally, or the
    /// error that ended the transfer.
    pub async fn finished(self) -> Result<u64, ChannelError> {
        match self.join.await {
            Ok(res) => res,
            Err(_join) => Err(ChannelError::Failed(Fault::custom("pipe transfer panicked"))),
        }
    }

    /// Returns true once the transfer loop has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Pipes every message from `source` into `destination` until either terminates.
///
/// Fails with [`ChannelError::AlreadyLocked`] (acquiring nothing) if either end is
/// already held.
pub fn pipe<T>(source: &Inbound<T>, destination: &Outbound<T>) -> Result<Piping, ChannelError>
where
    T: Send + 'static,
{
    Side::lock_pipe(source.side(), destination.side())?;
    let reader = Reader::new(Arc::clone(source.side()), Holder::Pipe);
    let writer = Writer::new(Arc::clone(destination.side()), Holder::Pipe);
    let source = Arc::clone(source.side());
    let destination = Arc::clone(destination.side());

    let join = tokio::spawn(async move {
        let res = transfer(&source, &destination).await;
        drop(reader);
        drop(writer);
        res
    });
    Ok(Piping { join })
}

enum Step<T> {
    Read(Result<Option<T>, ChannelError>),
    DestinationEnded,
}

async fn transfer<T>(source: &Side<T>, destination: &Side<T>) -> Result<u64, ChannelError> {
    let mut ended = destination.watch_terminated();
    let mut moved = 0u64;

    loop {
        let step = tokio::select! {
            biased;
            _ = terminated(&mut ended) => Step::DestinationEnded,
            res = source.read() => Step::Read(res),
        };

        match step {
            Step::Read(Ok(Some(msg))) => {
                if let Err(err) = destination.write(msg).await {
                    mirror_destination(source, destination);
                    return Err(err);
                }
                moved += 1;
            }
            Step::Read(Ok(None)) => {
                destination.close()?;
                return Ok(moved);
            }
            Step::Read(Err(err)) => {
                if let ChannelError::Failed(fault) = &err {
                    destination.error(fault.clone());
                }
                return Err(err);
            }
            Step::DestinationEnded => {
                return match mirror_destination(source, destination) {
                    Some(fault) => Err(ChannelError::Failed(fault)),
                    None => Err(ChannelError::Closed),
                };
            }
        }
    }
}

async fn terminated(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|done| *done).await;
}

/// Propagates the destination's terminal state back onto the source.
fn mirror_destination<T>(source: &Side<T>, destination: &Side<T>) -> Option<Fault> {
    match destination.status() {
        SideStatus::Errored(fault) => {
            source.error(fault.clone());
            Some(fault)
        }
        SideStatus::Closed => {
            let _ = source.close();
            None
        }
        SideStatus::Open => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel;

    #[tokio::test]
    async fn moves_everything_then_closes_destination() {
        let (src_tx, src_rx) = channel::<u32>(4);
        let (dst_tx, dst_rx) = channel::<u32>(4);

        let piping = pipe(&src_rx, &dst_tx).unwrap();
        assert!(src_rx.is_locked());
        assert!(dst_tx.is_locked());
        assert!(matches!(src_rx.acquire(), Err(ChannelError::AlreadyLocked)));

        let writer = src_tx.acquire().unwrap();
        for n in 0..6 {
            writer.write(n).await.unwrap();
        }
        writer.close().unwrap();

        let mut reader = dst_rx.acquire().unwrap();
        let mut got = Vec::new();
        while let Some(n) = reader.read().await.unwrap() {
            got.push(n);
        }
        assert_eq!(got, (0..6).collect::<Vec<_>>());
        assert_eq!(piping.finished().await.unwrap(), 6);
        assert!(!src_rx.is_locked());
    }

    #[tokio::test]
    async fn source_error_reaches_destination() {
        let (src_tx, src_rx) = channel::<u32>(4);
        let (dst_tx, dst_rx) = channel::<u32>(4);
        let piping = pipe(&src_rx, &dst_tx).unwrap();

        src_tx.acquire().unwrap().error(Fault::custom("upstream broke"));

        let mut reader = dst_rx.acquire().unwrap();
        let err = reader.read().await.unwrap_err();
        assert!(matches!(err, ChannelError::Failed(Fault::Custom { .. })));
        assert!(piping.finished().await.is_err());
    }

    #[tokio::test]
    async fn destination_error_cancels_source() {
        let (src_tx, src_rx) = channel::<u32>(4);
        let (dst_tx, dst_rx) = channel::<u32>(4);
        let piping = pipe(&src_rx, &dst_tx).unwrap();

        let reader = dst_rx.acquire().unwrap();
        reader.error(Fault::custom("downstream gave up"));

        let err = piping.finished().await.unwrap_err();
        assert!(matches!(err, ChannelError::Failed(_)));
        let writer = src_tx.acquire().unwrap();
        assert!(matches!(
            writer.write(1).await,
            Err(ChannelError::Failed(Fault::Custom { .. }))
        ));
    }

    #[test]
    fn refuses_locked_ends_without_side_effects() {
        let (_src_tx, src_rx) = channel::<u32>(1);
        let (dst_tx, _dst_rx) = channel::<u32>(1);
        let _writer = dst_tx.acquire().unwrap();

        assert!(matches!(
            pipe(&src_rx, &dst_tx),
            Err(ChannelError::AlreadyLocked)
        ));
        assert!(!src_rx.is_locked());
    }
}
