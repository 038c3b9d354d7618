//! # Service lifecycle states.
//!
//! ```text
//! Created ──► Starting ──► Running ──► Stopping ──► Stopped
//!    │            │                       ▲
//!    │            └── on_start failed ────┘
//!    └──────────── stop() before start() ────────────► Stopped
//! ```
//!
//! States are totally ordered; a node only ever moves forward.

use std::fmt;

/// Lifecycle state of a [`ServiceNode`](crate::ServiceNode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceState {
    /// Constructed, not yet started.
    Created,
    /// `on_start` is running.
    Starting,
    /// `on_start` finished; children have been (or are being) started.
    Running,
    /// Stop sequence in progress.
    Stopping,
    /// Terminal.
    Stopped,
}

impl ServiceState {
    /// Returns `true` while tasks may be spawned.
    #[inline]
    pub fn accepts_tasks(self) -> bool {
        matches!(self, ServiceState::Starting | ServiceState::Running)
    }

    /// Returns `true` while children may be added.
    #[inline]
    pub fn accepts_children(self) -> bool {
        matches!(self, ServiceState::Created | ServiceState::Starting)
    }

    /// Returns `true` once a stop sequence has begun or finished.
    #[inline]
    pub fn is_stopping(self) -> bool {
        self >= ServiceState::Stopping
    }

    /// Short lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::Created => "created",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
