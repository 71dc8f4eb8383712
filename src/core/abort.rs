//! # Abort propagation.
//!
//! An uncaught failure turns into an [`AbortError`] that climbs the tree until
//! somebody reads it:
//!
//! ```text
//! propagate(task, cause)
//!   loop:
//!     task ──► Aborting; abort = AbortError { task, cause, orphans: children }
//!     error task.requests with abort               (parent's writes fail)
//!     deliver(task.replies)        handled? ──► settle orphans after the window, Closed
//!     no parent?                   ──► settle, Closed, process abort
//!     deliver(parent.requests)     handled? ──► settle orphans after the window, Closed
//!     settle, Closed; task = parent, cause = abort (one more layer)
//! ```
//!
//! ## Handled
//! A fault placed on a side is *handled* iff a read was suspended on the side when
//! it was placed, or a read observes it within `Config::handler_turns` scheduler
//! turns. A turn is a `pulse::turn` over the side's latest reader and the
//! aborting task's parent: it ends once each of them that was busy has finished
//! its current poll, so the verdict does not depend on the runtime flavor. The
//! window is closed on the side before the verdict is returned; a later read still
//! fails with the fault but does not count. A side that was already errored cannot
//! take a new fault, so delivery to it is never handled.

use std::sync::Arc;

use super::tree::Tree;
use crate::channel::Side;
use crate::error::{AbortError, Fault};
use crate::events::{Event, EventKind};
use crate::tasks::pulse::{self, Pulse};
use crate::tasks::{TaskId, TaskState};

/// Places `fault` on `side` and reports whether a reader saw it in time.
///
/// `handler` is the task expected to read the side when no read was issued on
/// it yet.
pub(crate) async fn deliver<M>(
    side: &Side<M>,
    fault: Fault,
    turns: usize,
    handler: Option<&Arc<Pulse>>,
) -> bool {
    let placement = side.error(fault);
    if !placement.placed {
        return false;
    }
    if placement.observed {
        return true;
    }
    let pulses = watchers(side, handler);
    for _ in 0..turns {
        pulse::turn(&pulses).await;
        if side.fault_seen() {
            break;
        }
    }
    side.close_fault_window()
}

/// The side's latest reader and the expected handler, without duplicates.
fn watchers<M>(side: &Side<M>, handler: Option<&Arc<Pulse>>) -> Vec<Arc<Pulse>> {
    let mut pulses: Vec<Arc<Pulse>> = side.reader_pulse().into_iter().collect();
    if let Some(handler) = handler {
        if !pulses.iter().any(|pulse| Arc::ptr_eq(pulse, handler)) {
            pulses.push(Arc::clone(handler));
        }
    }
    pulses
}

/// Runs the abort of `origin` (and of every ancestor it drags along).
pub(crate) async fn propagate<M: Send + 'static>(tree: &Arc<Tree<M>>, origin: TaskId, cause: Fault) {
    let turns = tree.cfg().handler_turns_clamped();
    let mut id = origin;
    let mut cause = cause;

    loop {
        let Some(hop) = tree.begin_abort(id) else {
            return;
        };
        tree.publish(
            Event::new(EventKind::TaskAborting)
                .with_task(id)
                .with_parent(hop.parent)
                .with_reason(cause.to_string()),
        );

        let abort = AbortError::new(id, cause, hop.orphans.clone());
        let fault = Fault::Abort(abort.clone());
        hop.requests.error(fault.clone());

        if deliver(&hop.replies, fault.clone(), turns, hop.handler.as_ref()).await {
            tree.publish(Event::new(EventKind::AbortHandled).with_task(id));
            let pulses = watchers(&hop.replies, hop.handler.as_ref());
            settle_after_window(tree, id, &abort, turns, &pulses).await;
            return;
        }
        if hop.status.load() == TaskState::Closed {
            return;
        }

        let Some(parent) = hop.parent else {
            hop.orphans.settle();
            tree.finish_abort(id);
            tree.abort_process(abort);
            return;
        };

        tree.publish(
            Event::new(EventKind::AbortPropagated)
                .with_task(id)
                .with_parent(Some(parent)),
        );
        let mut pulses = Vec::new();
        let handled = match tree.requests_of(parent) {
            Some(side) => {
                let handled = deliver(&side, fault.clone(), turns, hop.handler.as_ref()).await;
                pulses = watchers(&side, hop.handler.as_ref());
                handled
            }
            None => false,
        };
        if handled {
            tree.publish(
                Event::new(EventKind::AbortHandled)
                    .with_task(id)
                    .with_parent(Some(parent)),
            );
            settle_after_window(tree, id, &abort, turns, &pulses).await;
            return;
        }
        if hop.status.load() == TaskState::Closed {
            return;
        }

        hop.orphans.settle();
        tree.finish_abort(id);
        id = parent;
        cause = fault;
    }
}

/// Gives the handler `turns` more turns to adopt, then closes what is left.
async fn settle_after_window<M: Send + 'static>(
    tree: &Tree<M>,
    id: TaskId,
    abort: &AbortError,
    turns: usize,
    pulses: &[Arc<Pulse>],
) {
    for _ in 0..turns {
        pulse::turn(pulses).await;
    }
    abort.orphans().settle();
    tree.finish_abort(id);
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;
    use crate::channel::SideStatus;

    #[tokio::test]
    async fn parked_reader_handles_immediately() {
        let side: Arc<Side<u8>> = Side::new(1);
        let reader = {
            let side = side.clone();
            tokio::spawn(async move { side.read().await })
        };
        tokio::task::yield_now().await;

        let handled = deliver(&side, Fault::custom("boom"), 1, None)
            .now_or_never()
            .expect("parked reader needs no extra turn");
        assert!(handled);
        assert!(reader.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn late_reader_within_window_handles() {
        let side: Arc<Side<u8>> = Side::new(1);
        let reader = {
            let side = side.clone();
            tokio::spawn(async move { side.read().await })
        };

        assert!(deliver(&side, Fault::custom("boom"), 1, None).await);
        assert!(reader.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn nobody_reading_is_unhandled() {
        let side: Arc<Side<u8>> = Side::new(1);
        assert!(!deliver(&side, Fault::custom("boom"), 3, None).await);
        assert!(matches!(side.status(), SideStatus::Errored(_)));
    }

    #[tokio::test]
    async fn late_read_after_the_verdict_does_not_count() {
        let side: Arc<Side<u8>> = Side::new(1);
        assert!(!deliver(&side, Fault::custom("boom"), 2, None).await);
        assert!(side.read().await.is_err());
        assert!(!side.fault_seen());
    }

    #[tokio::test]
    async fn already_errored_side_is_unhandled() {
        let side: Arc<Side<u8>> = Side::new(1);
        side.error(Fault::custom("first"));
        side.read().await.unwrap_err();
        assert!(!deliver(&side, Fault::custom("second"), 1, None).await);
    }
}
