//! # Supervisor: the process-level root controller.
//!
//! The [`Supervisor`] owns the root [`ServiceNode`] of a tree and is the only thing
//! interrupt handling touches. It:
//! - forwards every event of the tree to the configured subscribers,
//! - runs the tree through [`ServiceNode::join`],
//! - maps the first interrupt to a stop of the root (later interrupts are ignored),
//! - turns the outcome into a process exit status.
//!
//! ## Architecture
//! ```text
//! ServiceNode ... ── publish(Event) ──► root Bus ──► Supervisor listener ──► SubscriberSet::emit
//!
//! Supervisor::run_until(interrupt)
//!     ├─► root.join()  (starts the tree, waits for `stopped`)
//!     └─► interrupt fires first
//!             ├─► publish(ShutdownRequested)
//!             ├─► root.stop()  (in the background)
//!             └─► keep waiting on root.join()
//!                    ├─ Ok            → exit code 0
//!                    └─ Err(failure)  → exit code 1
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use servisor::{ServiceNode, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> std::process::ExitCode {
//!     let root = ServiceNode::group("app");
//!     // root.add_child(...)
//!
//!     let sup = Supervisor::builder(root).build();
//!     let outcome = sup.run().await;
//!     Supervisor::exit_code(&outcome)
//! }
//! ```

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::{node::ServiceNode, shutdown};
use crate::error::ServiceError;
use crate::events::{Event, EventKind};
use crate::subscribers::{Subscribe, SubscriberSet};

use super::builder::SupervisorBuilder;

/// Root controller: runs a tree, handles interrupts, forwards events to subscribers.
pub struct Supervisor {
    root: ServiceNode,
    subs: Mutex<Option<SubscriberSet>>,
    listener: Mutex<Option<JoinHandle<SubscriberSet>>>,
    listener_stop: CancellationToken,
    requested: AtomicBool,
}

impl Supervisor {
    /// Creates a supervisor for `root` with the given subscribers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(root: ServiceNode, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        Self::builder(root).with_subscribers(subscribers).build()
    }

    /// Returns a builder for a supervisor around `root`.
    pub fn builder(root: ServiceNode) -> SupervisorBuilder {
        SupervisorBuilder::new(root)
    }

    pub(crate) fn new_internal(root: ServiceNode, subs: SubscriberSet) -> Self {
        Self {
            root,
            subs: Mutex::new(Some(subs)),
            listener: Mutex::new(None),
            listener_stop: CancellationToken::new(),
            requested: AtomicBool::new(false),
        }
    }

    /// Root node of the supervised tree.
    pub fn root(&self) -> &ServiceNode {
        &self.root
    }

    /// Runs the tree until it stops on its own, fails, or the process is interrupted.
    ///
    /// Interrupts are `SIGINT`/`SIGTERM`/`SIGQUIT` on unix and Ctrl-C elsewhere. If
    /// signal handlers cannot be registered the tree still runs; only failures or an
    /// explicit [`request_shutdown`](Self::request_shutdown) end it.
    pub async fn run(&self) -> Result<(), ServiceError> {
        self.run_until(async {
            match shutdown::wait_for_shutdown_signal().await {
                Ok(signal) => info!(signal, "shutdown signal received"),
                Err(err) => {
                    warn!(error = %err, "cannot listen for shutdown signals");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
    }

    /// Runs the tree until it stops, treating completion of `interrupt` as a shutdown
    /// request.
    ///
    /// Returns the outcome of [`ServiceNode::join`] on the root. Events are delivered
    /// to subscribers until the tree has stopped; the subscriber workers are drained
    /// before this returns.
    pub async fn run_until<F>(&self, interrupt: F) -> Result<(), ServiceError>
    where
        F: Future<Output = ()>,
    {
        self.start_listener();

        let join = self.root.join();
        tokio::pin!(join);

        let outcome = tokio::select! {
            res = &mut join => res,
            _ = interrupt => {
                info!(root = self.root.name(), "interrupt received");
                self.request_shutdown();
                join.await
            }
        };

        self.stop_listener().await;
        outcome
    }

    /// Asks the tree to stop.
    ///
    /// The first call publishes [`EventKind::ShutdownRequested`] and stops the root in
    /// the background; it returns `true`. Later calls do nothing and return `false`.
    pub fn request_shutdown(&self) -> bool {
        if self.requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.root
            .tree_bus()
            .publish(Event::new(EventKind::ShutdownRequested).with_service(self.root.name()));

        let root = self.root.clone();
        tokio::spawn(async move { root.stop().await });
        true
    }

    /// Returns `true` once [`request_shutdown`](Self::request_shutdown) has been called.
    pub fn shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Raw exit status for an outcome of [`run`](Self::run): `0` or `1`.
    pub fn exit_status(outcome: &Result<(), ServiceError>) -> u8 {
        match outcome {
            Ok(()) => 0,
            Err(_) => 1,
        }
    }

    /// Process exit code for an outcome of [`run`](Self::run).
    pub fn exit_code(outcome: &Result<(), ServiceError>) -> ExitCode {
        ExitCode::from(Self::exit_status(outcome))
    }

    /// Subscribes to the tree bus and forwards events to the subscriber set.
    ///
    /// Only the first run forwards events; the set is drained when that run ends.
    fn start_listener(&self) {
        let Some(set) = self.subs.lock().take() else {
            return;
        };
        if set.is_empty() {
            return;
        }

        let mut rx = self.root.tree_bus().subscribe();
        let stop = self.listener_stop.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    msg = rx.recv() => match msg {
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(n)) => {
                            warn!(skipped = n, "subscriber listener lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = stop.cancelled() => {
                        while let Ok(ev) = rx.try_recv() {
                            set.emit(&ev);
                        }
                        break;
                    }
                }
            }
            set
        });
        *self.listener.lock() = Some(handle);
    }

    async fn stop_listener(&self) {
        self.listener_stop.cancel();
        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            if let Ok(set) = handle.await {
                set.shutdown().await;
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.listener_stop.cancel();
    }
}

/// Runs `root` under a supervisor without subscribers, stopping it on interrupt.
///
/// Shorthand for `Supervisor::new(root, vec![]).run()`.
pub async fn run(root: ServiceNode) -> Result<(), ServiceError> {
    Supervisor::new(root, Vec::new()).run().await
}
