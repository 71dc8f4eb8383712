//! # LogWriter: runtime events as `tracing` records
//!
//! A minimal subscriber that forwards incoming [`Event`]s to `tracing`.
//! Failures are logged at `warn`, everything else at `info`/`debug`.
//!
//! ## Example output (with a fmt subscriber installed)
//! ```text
//! INFO  tasklane: spawned task=task#2 parent=task#1 module="worker"
//! WARN  tasklane: aborting task=task#2 reason="task#2 failed: boom"
//! INFO  tasklane: abort handled task=task#2 by=task#1
//! INFO  tasklane: closed task=task#2 reason="aborted"
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber (feature `logging`).
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let task = e.task.map(|id| id.to_string()).unwrap_or_default();
        let parent = e.parent.map(|id| id.to_string()).unwrap_or_default();
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::TaskSpawned => {
                info!(target: "tasklane", %task, %parent, module = ?e.module, "spawned");
            }
            EventKind::TaskRunning => {
                debug!(target: "tasklane", %task, "running");
            }
            EventKind::TaskClosed => {
                info!(target: "tasklane", %task, reason, "closed");
            }
            EventKind::TaskAborting => {
                warn!(target: "tasklane", %task, reason, "aborting");
            }
            EventKind::AbortPropagated => {
                warn!(target: "tasklane", %task, to = %parent, "abort propagated");
            }
            EventKind::AbortHandled => {
                info!(target: "tasklane", %task, by = %parent, "abort handled");
            }
            EventKind::ProcessAborted => {
                warn!(target: "tasklane", %task, reason, "process aborted");
            }
            EventKind::ChildAdopted => {
                info!(target: "tasklane", %task, supervisor = %parent, "adopted");
            }
            EventKind::OrphanShutdown => {
                info!(target: "tasklane", %task, %parent, "orphan shut down");
            }
            EventKind::ShutdownRequested => {
                info!(target: "tasklane", "shutdown requested");
            }
            EventKind::AllStoppedWithin => {
                info!(target: "tasklane", "all stopped within grace");
            }
            EventKind::GraceExceeded => {
                warn!(target: "tasklane", "grace exceeded");
            }
            EventKind::SubscriberPanicked => {
                warn!(target: "tasklane", subscriber = ?e.subscriber, reason, "subscriber panicked");
            }
            EventKind::SubscriberOverflow => {
                warn!(target: "tasklane", subscriber = ?e.subscriber, reason, "subscriber dropped event");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
