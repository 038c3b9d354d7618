//! # Runtime events emitted by service nodes and the supervisor.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Service lifecycle**: node state transitions and tree composition
//! - **Task lifecycle**: spawn and terminal status of tasks
//! - **Failure / shutdown**: captured failures, teardown diagnostics, interrupts
//! - **Subscriber events**: overflow and panics inside subscribers
//!
//! The [`Event`] struct carries additional metadata such as timestamps, service and
//! task names, and reasons.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use servisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TaskFailed)
//!     .with_service("api")
//!     .with_task("accept")
//!     .with_reason("boom");
//!
//! assert_eq!(ev.kind, EventKind::TaskFailed);
//! assert_eq!(ev.service.as_deref(), Some("api"));
//! assert_eq!(ev.reason.as_deref(), Some("boom"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Service lifecycle ===
    /// Node moved to `starting`; `on_start` is about to run.
    ///
    /// Sets: `service`
    ServiceStarting,

    /// Node moved to `running`; children start next.
    ///
    /// Sets: `service`
    ServiceRunning,

    /// Node moved to `stopping`.
    ///
    /// Sets: `service`
    ServiceStopping,

    /// Node reached `stopped`.
    ///
    /// Sets: `service`
    ServiceStopped,

    /// A child was attached.
    ///
    /// Sets: `service` (parent), `task` (child name)
    ChildAdded,

    // === Task lifecycle ===
    /// Task spawned and registered under its node.
    ///
    /// Sets: `service`, `task`
    TaskSpawned,

    /// Task returned `Ok` without being cancelled.
    ///
    /// Sets: `service`, `task`
    TaskCompleted,

    /// Task finished after its cancellation was requested (or was aborted).
    ///
    /// Sets: `service`, `task`
    TaskCancelled,

    /// Task returned an error or panicked.
    ///
    /// Sets: `service`, `task`, `reason`
    TaskFailed,

    // === Failure / shutdown ===
    /// A failure was captured into a node; the tree is shutting down.
    ///
    /// Sets: `service`, `task` (for task failures), `reason`
    FailureCaptured,

    /// Non-fatal error during a stop sequence.
    ///
    /// Sets: `service`, `task` (if any), `reason`
    ShutdownError,

    /// A task ignored cancellation for the whole grace period and was aborted.
    ///
    /// Sets: `service`, `task`
    GraceExceeded,

    /// Shutdown requested (OS signal observed or explicit request).
    ShutdownRequested,

    // === Subscriber events ===
    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `service` (subscriber name), `reason`
    SubscriberOverflow,

    /// Subscriber panicked during event processing.
    ///
    /// Sets: `service` (subscriber name), `reason` (panic message)
    SubscriberPanicked,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Name of the service node, if applicable.
    pub service: Option<Arc<str>>,
    /// Name of the task (or child), if applicable.
    pub task: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            service: None,
            task: None,
            reason: None,
        }
    }

    /// Attaches a service name.
    #[inline]
    pub fn with_service(mut self, service: impl Into<Arc<str>>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Attaches a task name.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_service(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_service(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }
}
