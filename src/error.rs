//! Error types used by the servisor runtime, hooks and tasks.
//!
//! This module defines two main error enums:
//!
//! - [`ServiceError`]: the outcome of lifecycle operations and of [`join`](crate::ServiceNode::join).
//! - [`ShutdownError`]: non-fatal diagnostics collected while a node stops.
//!
//! Both types provide helper methods (`as_label`, `as_message`) for logging/metrics.
//! Hooks and tasks report failures as a [`BoxError`], so any user error type can flow
//! through unchanged and be recovered with [`ServiceError::cause`].

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::core::ServiceState;

/// Error type returned by [`Service`](crate::Service) hooks and spawned tasks.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared form of a user error, kept so a captured failure can be handed out many times.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// # Errors produced by service lifecycle operations.
///
/// `InvalidState` and `AlreadyAttached` are programmer errors returned directly to the
/// caller of the violating operation; they never become tree failures.
/// `StartupFailure` and `TaskFailure` are captured into a node and later surface from
/// [`join`](crate::ServiceNode::join).
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ServiceError {
    /// An operation was attempted in a state that does not permit it.
    #[error("service {service:?}: cannot {op} while {state}")]
    InvalidState {
        /// Name of the node the operation was attempted on.
        service: Arc<str>,
        /// The rejected operation (`spawn`, `add_child`, ...).
        op: &'static str,
        /// State of the node at the time of the call.
        state: ServiceState,
    },

    /// The child already belongs to a tree, or attaching it would form a cycle.
    #[error("service {child:?} cannot be attached to {service:?}: already owned or an ancestor")]
    AlreadyAttached {
        /// Name of the would-be parent.
        service: Arc<str>,
        /// Name of the rejected child.
        child: Arc<str>,
    },

    /// `on_start` returned an error (or panicked).
    #[error("service {service:?} failed to start: {source}")]
    StartupFailure {
        /// Name of the failing node.
        service: Arc<str>,
        /// The error returned by the hook.
        #[source]
        source: SharedError,
    },

    /// A spawned task returned an error (or panicked).
    #[error("task {task:?} of service {service:?} failed: {source}")]
    TaskFailure {
        /// Name of the owning node.
        service: Arc<str>,
        /// Name the task was spawned with.
        task: Arc<str>,
        /// The error returned by the task.
        #[source]
        source: SharedError,
    },
}

impl ServiceError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use servisor::{ServiceError, ServiceState};
    ///
    /// let err = ServiceError::InvalidState {
    ///     service: "api".into(),
    ///     op: "spawn",
    ///     state: ServiceState::Stopped,
    /// };
    /// assert_eq!(err.as_label(), "service_invalid_state");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceError::InvalidState { .. } => "service_invalid_state",
            ServiceError::AlreadyAttached { .. } => "service_already_attached",
            ServiceError::StartupFailure { .. } => "service_startup_failure",
            ServiceError::TaskFailure { .. } => "service_task_failure",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            ServiceError::InvalidState { service, op, state } => {
                format!("invalid state: {op} on {service} while {state}")
            }
            ServiceError::AlreadyAttached { service, child } => {
                format!("already attached: {child} -> {service}")
            }
            ServiceError::StartupFailure { service, source } => {
                format!("startup failure: {service}: {source}")
            }
            ServiceError::TaskFailure {
                service,
                task,
                source,
            } => format!("task failure: {service}/{task}: {source}"),
        }
    }

    /// Returns the user error behind a captured failure, suitable for downcasting.
    ///
    /// `None` for misuse errors, which carry no user error.
    ///
    /// # Example
    /// ```
    /// use std::sync::Arc;
    /// use servisor::ServiceError;
    ///
    /// let io = std::io::Error::other("boom");
    /// let err = ServiceError::TaskFailure {
    ///     service: "api".into(),
    ///     task: "accept".into(),
    ///     source: Arc::new(io),
    /// };
    /// let cause = err.cause().unwrap();
    /// assert!(cause.downcast_ref::<std::io::Error>().is_some());
    /// assert_eq!(cause.to_string(), "boom");
    /// ```
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            ServiceError::StartupFailure { source, .. }
            | ServiceError::TaskFailure { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }

    /// Indicates whether this error is a captured failure (as opposed to API misuse).
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ServiceError::StartupFailure { .. } | ServiceError::TaskFailure { .. }
        )
    }
}

/// # Diagnostics collected during a stop sequence.
///
/// Shutdown never aborts on these; they are logged, published as
/// [`EventKind::ShutdownError`](crate::EventKind::ShutdownError) and kept on the node
/// (see [`ServiceNode::shutdown_errors`](crate::ServiceNode::shutdown_errors)).
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ShutdownError {
    /// `on_stop` returned an error or panicked.
    #[error("on_stop of service {service:?} failed: {source}")]
    Hook {
        service: Arc<str>,
        #[source]
        source: SharedError,
    },

    /// A task failed after its cancellation had been requested.
    #[error("task {task:?} of service {service:?} failed while stopping: {source}")]
    Task {
        service: Arc<str>,
        task: Arc<str>,
        #[source]
        source: SharedError,
    },

    /// A task ignored cancellation for longer than the grace period and was aborted.
    #[error("task {task:?} of service {service:?} did not stop within {grace:?}; aborted")]
    GraceExceeded {
        service: Arc<str>,
        task: Arc<str>,
        grace: Duration,
    },
}

impl ShutdownError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ShutdownError::Hook { .. } => "shutdown_hook_failed",
            ShutdownError::Task { .. } => "shutdown_task_failed",
            ShutdownError::GraceExceeded { .. } => "shutdown_grace_exceeded",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            ShutdownError::Hook { service, source } => format!("on_stop: {service}: {source}"),
            ShutdownError::Task {
                service,
                task,
                source,
            } => format!("task while stopping: {service}/{task}: {source}"),
            ShutdownError::GraceExceeded {
                service,
                task,
                grace,
            } => format!("grace exceeded after {grace:?}: {service}/{task}"),
        }
    }
}

/// A hook or task panicked; the panic payload is kept as the message.
#[derive(Error, Debug, Clone)]
#[error("panicked: {0}")]
pub struct Panicked(pub String);

impl Panicked {
    /// Extracts a printable message from a `catch_unwind` payload.
    pub(crate) fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let any = &*payload;
        let msg = if let Some(msg) = any.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = any.downcast_ref::<String>() {
            msg.clone()
        } else {
            "unknown panic".to_string()
        };
        Panicked(msg)
    }
}
