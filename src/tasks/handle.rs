//! # Task handles.
//!
//! A [`TaskHandle`] refers to one unit of work spawned with
//! [`ServiceNode::spawn`](crate::ServiceNode::spawn). It exposes:
//! - the current [`TaskStatus`] (`running` until exactly one terminal status is set),
//! - cooperative cancellation ([`TaskHandle::cancel`]) through the task's
//!   [`CancellationToken`],
//! - completion observation ([`TaskHandle::wait`]).
//!
//! ## Status transitions
//! ```text
//! Running ──► Completed   (returned Ok, not cancelled)
//!         ├─► Cancelled   (finished after cancellation, or aborted after grace)
//!         └─► Failed      (returned Err or panicked)
//! ```
//! The first terminal status wins; later writes are ignored.

use std::fmt;
use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::{NodeInner, ServiceNode};

/// Status of a spawned task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Still executing.
    Running,
    /// Returned `Ok` without being cancelled.
    Completed,
    /// Returned an error or panicked.
    Failed,
    /// Finished after cancellation was requested, or was aborted.
    Cancelled,
}

impl TaskStatus {
    /// Returns `true` for every status except [`TaskStatus::Running`].
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

struct TaskShared {
    id: u64,
    name: Arc<str>,
    service: Arc<str>,
    token: CancellationToken,
    status: watch::Sender<TaskStatus>,
    owner: Weak<NodeInner>,
}

/// Shared reference to a spawned task.
///
/// Cloning is cheap; all clones observe the same status.
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl TaskHandle {
    pub(crate) fn new(
        id: u64,
        name: Arc<str>,
        service: Arc<str>,
        token: CancellationToken,
        owner: Weak<NodeInner>,
    ) -> Self {
        let (status, _rx) = watch::channel(TaskStatus::Running);
        Self {
            shared: Arc::new(TaskShared {
                id,
                name,
                service,
                token,
                status,
                owner,
            }),
        }
    }

    /// Identifier unique within the owning node.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Name the task was spawned with.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Name of the owning service node.
    pub fn service(&self) -> &str {
        &self.shared.service
    }

    /// Current status.
    pub fn status(&self) -> TaskStatus {
        *self.shared.status.borrow()
    }

    /// Returns `true` once a terminal status is set.
    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Requests cooperative cancellation.
    ///
    /// The task observes it through its token at its own suspension points; there is
    /// no guarantee of immediacy. A task that exits after this call ends as
    /// [`TaskStatus::Cancelled`] and never counts as a failure of its node.
    pub fn cancel(&self) {
        self.shared.token.cancel();
    }

    /// Returns `true` if cancellation was requested (by this handle or by a node stop).
    pub fn is_cancel_requested(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// Returns the owning node while it is still alive.
    pub fn owner(&self) -> Option<ServiceNode> {
        self.shared.owner.upgrade().map(ServiceNode::from_inner)
    }

    /// Waits until the task reaches a terminal status and returns it.
    pub async fn wait(&self) -> TaskStatus {
        let mut rx = self.shared.status.subscribe();
        rx.wait_for(|s| s.is_terminal())
            .await
            .map(|s| *s)
            .unwrap_or_else(|_| self.status())
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.shared.token
    }

    /// Sets a terminal status; returns `false` if one was already set.
    pub(crate) fn finish(&self, status: TaskStatus) -> bool {
        self.shared.status.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = status;
            true
        })
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.shared.id)
            .field("service", &self.shared.service)
            .field("name", &self.shared.name)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached(name: &str) -> TaskHandle {
        TaskHandle::new(
            7,
            name.into(),
            "svc".into(),
            CancellationToken::new(),
            Weak::new(),
        )
    }

    #[test]
    fn test_first_terminal_status_wins() {
        let h = detached("worker");
        assert_eq!(h.status(), TaskStatus::Running);
        assert!(h.finish(TaskStatus::Cancelled));
        assert!(!h.finish(TaskStatus::Failed));
        assert_eq!(h.status(), TaskStatus::Cancelled);
        assert!(h.is_finished());
    }

    #[test]
    fn test_cancel_marks_token() {
        let h = detached("worker");
        assert!(!h.is_cancel_requested());
        h.clone().cancel();
        assert!(h.is_cancel_requested());
        assert!(h.token().is_cancelled());
        assert!(h.owner().is_none());
    }

    #[tokio::test]
    async fn test_wait_observes_finish_from_another_task() {
        let h = detached("worker");
        let finisher = h.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            finisher.finish(TaskStatus::Completed);
        });
        assert_eq!(h.wait().await, TaskStatus::Completed);
    }
}
