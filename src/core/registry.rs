//! # Per-node task registry.
//!
//! Every [`ServiceNode`](crate::ServiceNode) keeps the tasks it spawned in a
//! `Registry`, guarded by the node's mutex:
//! - `spawn` inserts the entry in the same critical section that starts the task,
//!   so a task that exits immediately always finds its own entry,
//! - a task removes itself when it exits,
//! - the stop sequence drains whatever is left and runs [`cancel_and_join`].
//!
//! ## Architecture
//! ```text
//! spawn ──► Registry.insert(handle, join)
//!                 │
//! task exit ──────┼──► Registry.remove(id)
//!                 │
//! stop ───────────┴──► Registry.drain() ──► cancel_and_join(entries, grace)
//!                                              ├─► cancel every token
//!                                              ├─► join until the shared deadline
//!                                              └─► abort stragglers → returned
//! ```

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::tasks::{TaskHandle, TaskStatus};

/// A registered task: its public handle plus the runtime join handle.
pub(crate) struct Entry {
    pub(crate) handle: TaskHandle,
    pub(crate) join: JoinHandle<()>,
}

/// Tasks currently owned by one node, keyed by task id.
#[derive(Default)]
pub(crate) struct Registry {
    next_id: u64,
    entries: HashMap<u64, Entry>,
}

impl Registry {
    /// Reserves the next task id.
    pub(crate) fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn insert(&mut self, handle: TaskHandle, join: JoinHandle<()>) {
        self.entries.insert(handle.id(), Entry { handle, join });
    }

    pub(crate) fn remove(&mut self, id: u64) -> Option<Entry> {
        self.entries.remove(&id)
    }

    /// Takes every entry out, in spawn order.
    pub(crate) fn drain(&mut self) -> Vec<Entry> {
        let mut entries: Vec<Entry> = self.entries.drain().map(|(_, e)| e).collect();
        entries.sort_unstable_by_key(|e| e.handle.id());
        entries
    }

    /// Handles of the live tasks, in spawn order.
    pub(crate) fn handles(&self) -> Vec<TaskHandle> {
        let mut handles: Vec<TaskHandle> =
            self.entries.values().map(|e| e.handle.clone()).collect();
        handles.sort_unstable_by_key(TaskHandle::id);
        handles
    }
}

/// Cancels every entry, then waits for all of them until `grace` elapses.
///
/// Tasks still running at the deadline are aborted and marked
/// [`TaskStatus::Cancelled`]; their handles are returned. With `grace == 0`
/// anything that has not already finished is aborted right away.
pub(crate) async fn cancel_and_join(entries: Vec<Entry>, grace: Duration) -> Vec<TaskHandle> {
    for entry in &entries {
        entry.handle.cancel();
    }

    let deadline = Instant::now() + grace;
    let mut aborted = Vec::new();

    for mut entry in entries {
        if tokio::time::timeout_at(deadline, &mut entry.join)
            .await
            .is_ok()
        {
            continue;
        }
        entry.join.abort();
        let _ = entry.join.await;
        // The task may have finished between the deadline and the abort.
        if entry.handle.finish(TaskStatus::Cancelled) {
            aborted.push(entry.handle);
        }
    }
    aborted
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use tokio_util::sync::CancellationToken;

    use super::*;

    fn handle(reg: &mut Registry, name: &str) -> TaskHandle {
        TaskHandle::new(
            reg.next_id(),
            name.into(),
            "svc".into(),
            CancellationToken::new(),
            Weak::new(),
        )
    }

    #[tokio::test]
    async fn test_drain_keeps_spawn_order() {
        let mut reg = Registry::default();
        for name in ["a", "b", "c"] {
            let h = handle(&mut reg, name);
            reg.insert(h, tokio::spawn(async {}));
        }
        assert_eq!(reg.handles().len(), 3);
        let names: Vec<String> = reg.handles().iter().map(|h| h.name().to_string()).collect();
        assert_eq!(names, ["a", "b", "c"]);

        assert!(reg.remove(1).is_some());
        let drained: Vec<u64> = reg.drain().iter().map(|e| e.handle.id()).collect();
        assert_eq!(drained, [0, 2]);
        assert!(reg.handles().is_empty());
    }

    #[tokio::test]
    async fn test_cooperative_task_is_not_aborted() {
        let mut reg = Registry::default();
        let h = handle(&mut reg, "polite");
        let token = h.token().clone();
        let marker = h.clone();
        let join = tokio::spawn(async move {
            token.cancelled().await;
            marker.finish(TaskStatus::Cancelled);
        });
        reg.insert(h.clone(), join);

        let aborted = cancel_and_join(reg.drain(), Duration::from_secs(5)).await;
        assert!(aborted.is_empty());
        assert_eq!(h.status(), TaskStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stubborn_task_is_aborted_after_grace() {
        let mut reg = Registry::default();
        let h = handle(&mut reg, "stubborn");
        let join = tokio::spawn(std::future::pending::<()>());
        reg.insert(h.clone(), join);

        let aborted = cancel_and_join(reg.drain(), Duration::from_millis(50)).await;
        assert_eq!(aborted.len(), 1);
        assert_eq!(aborted[0].name(), "stubborn");
        assert_eq!(h.status(), TaskStatus::Cancelled);
    }
}
