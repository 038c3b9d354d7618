//! # LogWriter: events rendered through `tracing`
//!
//! A minimal subscriber that turns incoming [`Event`]s into `tracing` records.
//! Lifecycle transitions log at `debug`, failures at `error`, teardown problems at `warn`.
//!
//! ## Example output (with a fmt subscriber)
//! ```text
//! DEBUG servisor: service starting service="api"
//! DEBUG servisor: task spawned service="api" task="accept"
//! ERROR servisor: failure captured service="api" task="accept" reason="boom"
//!  INFO servisor: shutdown requested
//!  WARN servisor: task did not stop within grace service="api" task="accept"
//! DEBUG servisor: service stopped service="api"
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
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
        let service = e.service.as_deref().unwrap_or("-");
        let task = e.task.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");

        match e.kind {
            EventKind::ServiceStarting => tracing::debug!(service, "service starting"),
            EventKind::ServiceRunning => tracing::debug!(service, "service running"),
            EventKind::ServiceStopping => tracing::debug!(service, "service stopping"),
            EventKind::ServiceStopped => tracing::debug!(service, "service stopped"),
            EventKind::ChildAdded => tracing::debug!(service, child = task, "child added"),
            EventKind::TaskSpawned => tracing::debug!(service, task, "task spawned"),
            EventKind::TaskCompleted => tracing::debug!(service, task, "task completed"),
            EventKind::TaskCancelled => tracing::debug!(service, task, "task cancelled"),
            EventKind::TaskFailed => tracing::error!(service, task, reason, "task failed"),
            EventKind::FailureCaptured => {
                tracing::error!(service, task, reason, "failure captured")
            }
            EventKind::ShutdownError => {
                tracing::warn!(service, task, reason, "error during shutdown")
            }
            EventKind::GraceExceeded => {
                tracing::warn!(service, task, "task did not stop within grace")
            }
            EventKind::ShutdownRequested => tracing::info!("shutdown requested"),
            EventKind::SubscriberOverflow => {
                tracing::warn!(subscriber = service, reason, "subscriber overflow")
            }
            EventKind::SubscriberPanicked => {
                tracing::warn!(subscriber = service, reason, "subscriber panicked")
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
