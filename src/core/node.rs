//! # Service nodes: the supervision unit.
//!
//! A [`ServiceNode`] owns one [`Service`], the tasks it spawned and its child nodes.
//! Nodes compose into a tree; the tree shares one fate:
//!
//! ```text
//!                  root ──── join() waits here, returns the first captured failure
//!                 /    \
//!            child A   child B ── spawn(task) ──► task fails
//!                                                   │
//!                      capture TaskFailure ◄────────┘
//!                      stop(B)  +  stop(root)        (escalation)
//! ```
//!
//! ## Ordering
//! - start: `on_start(self)`, then children in insertion order
//! - stop: cancel own tasks and wait (up to the grace period), then children in
//!   reverse insertion order, then `on_stop(self)`, then `stopped`
//!
//! ## Rules
//! - States only move forward (see [`ServiceState`]).
//! - Every lifecycle operation is idempotent; concurrent `stop` calls merge into one
//!   in-flight stop sequence, so `on_stop` runs at most once.
//! - The per-node mutex is never held across an `.await`.
//! - Parents own children; the child's parent link is a [`Weak`].
//! - Failures are first-write-wins per node and stamped with a process-wide sequence
//!   number, so `join` can report the earliest failure of a subtree.
//! - Stop sequences run on their own tokio task. A `stop` issued from inside the
//!   subtree being stopped (one of its tasks or hooks) only requests the stop.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{Config, StopEscalation};
use crate::core::registry::{self, Registry};
use crate::core::state::ServiceState;
use crate::error::{BoxError, Panicked, ServiceError, SharedError, ShutdownError};
use crate::events::{Bus, Event, EventKind};
use crate::services::{Group, Service};
use crate::tasks::{TaskHandle, TaskStatus};

use super::builder::NodeBuilder;

/// Process-wide capture order of failures.
static FAILURE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Serializes tree attachment so two concurrent `add_child` calls cannot form a cycle.
static ATTACH_LOCK: Mutex<()> = Mutex::new(());

tokio::task_local! {
    /// Node whose task or hook is being polled.
    static CONTEXT: Weak<NodeInner>;
}

struct CapturedFailure {
    seq: u64,
    error: ServiceError,
}

/// Mutable part of a node, behind the node mutex.
struct NodeCore {
    state: ServiceState,
    stop_requested: bool,
    children: Vec<ServiceNode>,
    tasks: Registry,
    shutdown_errors: Vec<ShutdownError>,
}

pub(crate) struct NodeInner {
    name: Arc<str>,
    service: Arc<dyn Service>,
    cfg: Config,
    core: Mutex<NodeCore>,
    state_tx: watch::Sender<ServiceState>,
    parent: OnceLock<Weak<NodeInner>>,
    failure: OnceLock<CapturedFailure>,
    token: CancellationToken,
    bus: Bus,
}

/// # Handle to one node of a supervision tree.
///
/// Cloning is cheap and every clone refers to the same node.
///
/// # Example
/// ```
/// use servisor::{ServiceNode, ServiceState};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let root = ServiceNode::group("root");
/// let worker = ServiceNode::group("worker");
/// root.add_child(worker.clone()).unwrap();
///
/// root.start().await.unwrap();
/// assert_eq!(worker.state(), ServiceState::Running);
///
/// root.stop().await;
/// assert!(root.join().await.is_ok());
/// assert_eq!(worker.state(), ServiceState::Stopped);
/// # }
/// ```
#[derive(Clone)]
pub struct ServiceNode {
    inner: Arc<NodeInner>,
}

/// What `request_stop` decided while holding the lock.
enum StopPlan {
    /// Nothing was ever started.
    Skipped,
    /// This call launches the stop sequence.
    Run,
    /// Another caller owns the transition; wait for `stopped`.
    Wait,
}

impl ServiceNode {
    /// Creates a node for `service` with the default [`Config`].
    pub fn new<S: Service>(service: S) -> Self {
        Self::builder(service).build()
    }

    /// Returns a builder for a node with custom configuration or name.
    pub fn builder<S: Service>(service: S) -> NodeBuilder {
        NodeBuilder::new(Arc::new(service))
    }

    /// Creates a hook-less node used only to group children.
    pub fn group(name: impl Into<String>) -> Self {
        Self::new(Group::new(name))
    }

    pub(crate) fn from_parts(name: Arc<str>, service: Arc<dyn Service>, cfg: Config) -> Self {
        let (state_tx, _) = watch::channel(ServiceState::Created);
        let bus = Bus::new(cfg.bus_capacity_clamped());
        Self {
            inner: Arc::new(NodeInner {
                name,
                service,
                cfg,
                core: Mutex::new(NodeCore {
                    state: ServiceState::Created,
                    stop_requested: false,
                    children: Vec::new(),
                    tasks: Registry::default(),
                    shutdown_errors: Vec::new(),
                }),
                state_tx,
                parent: OnceLock::new(),
                failure: OnceLock::new(),
                token: CancellationToken::new(),
                bus,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<NodeInner>) -> Self {
        Self { inner }
    }

    /// Name of the node (the service name unless overridden by the builder).
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceState {
        *self.inner.state_tx.borrow()
    }

    /// Configuration the node was built with.
    pub fn config(&self) -> &Config {
        &self.inner.cfg
    }

    /// Children in insertion order.
    pub fn children(&self) -> Vec<ServiceNode> {
        self.inner.core.lock().children.clone()
    }

    /// Parent node, if attached and still alive.
    pub fn parent(&self) -> Option<ServiceNode> {
        self.inner
            .parent
            .get()
            .and_then(Weak::upgrade)
            .map(Self::from_inner)
    }

    /// Topmost live ancestor (the node itself when detached).
    pub fn root(&self) -> ServiceNode {
        let mut node = self.clone();
        while let Some(parent) = node.parent() {
            node = parent;
        }
        node
    }

    /// Returns `true` if both handles refer to the same node.
    pub fn ptr_eq(&self, other: &ServiceNode) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Handles of the tasks this node currently owns, in spawn order.
    pub fn tasks(&self) -> Vec<TaskHandle> {
        self.inner.core.lock().tasks.handles()
    }

    /// Failure captured by this node itself, if any.
    ///
    /// See [`join`](Self::join) for the earliest failure of the whole subtree.
    pub fn failure(&self) -> Option<ServiceError> {
        self.inner.failure.get().map(|f| f.error.clone())
    }

    /// Diagnostics collected while this node was stopping.
    pub fn shutdown_errors(&self) -> Vec<ShutdownError> {
        self.inner.core.lock().shutdown_errors.clone()
    }

    /// Token cancelled as soon as this node begins to stop.
    ///
    /// Long `on_start` hooks can watch it to bail out early.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Receives every event published anywhere in this node's tree.
    ///
    /// The tree's root is resolved now. Events go to the bus of whichever node is the
    /// root when they are published, so a receiver taken before this node is attached
    /// under a new parent no longer sees them. Subscribe once the tree is assembled.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.root().inner.bus.subscribe()
    }

    /// Bus of this node's tree (the root's bus).
    pub(crate) fn tree_bus(&self) -> Bus {
        self.root().inner.bus.clone()
    }

    /// Attaches `child` to this node.
    ///
    /// Allowed while this node is `created` or `starting`; children must be declared
    /// before the tree becomes stable. On error `children` is left unchanged.
    ///
    /// # Errors
    /// - [`ServiceError::InvalidState`] if this node is `running` or later, or `child`
    ///   is not `created`.
    /// - [`ServiceError::AlreadyAttached`] if `child` already has a parent, or is this
    ///   node or one of its ancestors.
    pub fn add_child(&self, child: ServiceNode) -> Result<(), ServiceError> {
        let _attach = ATTACH_LOCK.lock();

        let mut ancestor = Some(self.clone());
        while let Some(node) = ancestor {
            if node.ptr_eq(&child) {
                return Err(self.already_attached(&child));
            }
            ancestor = node.parent();
        }

        {
            let mut core = self.inner.core.lock();
            if !core.state.accepts_children() {
                return Err(self.invalid_state("add_child", core.state));
            }
            let child_state = child.state();
            if child_state != ServiceState::Created {
                return Err(ServiceError::InvalidState {
                    service: child.inner.name.clone(),
                    op: "attach",
                    state: child_state,
                });
            }
            if child.inner.parent.set(Arc::downgrade(&self.inner)).is_err() {
                return Err(self.already_attached(&child));
            }
            core.children.push(child.clone());
        }

        debug!(service = %self.inner.name, child = %child.inner.name, "child added");
        self.publish(
            Event::new(EventKind::ChildAdded)
                .with_service(self.inner.name.clone())
                .with_task(child.inner.name.clone()),
        );
        Ok(())
    }

    /// Spawns a task owned by this node.
    ///
    /// `f` receives the task's [`CancellationToken`] and returns the task future. The
    /// token is cancelled when the task is cancelled or the node begins to stop; the
    /// future is expected to return soon after.
    ///
    /// A task that returns `Err` (or panics) while the node is live fails the node and
    /// stops the whole tree. Returning `Ok` simply deregisters the task.
    ///
    /// # Errors
    /// [`ServiceError::InvalidState`] unless the node is `starting` or `running`.
    pub fn spawn<F, Fut>(&self, name: impl Into<Arc<str>>, f: F) -> Result<TaskHandle, ServiceError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let state = self.state();
        if !state.accepts_tasks() {
            return Err(self.invalid_state("spawn", state));
        }

        let name: Arc<str> = name.into();
        let token = self.inner.token.child_token();
        let fut = f(token.clone());

        let handle = {
            let mut core = self.inner.core.lock();
            if !core.state.accepts_tasks() {
                return Err(self.invalid_state("spawn", core.state));
            }
            let handle = TaskHandle::new(
                core.tasks.next_id(),
                name.clone(),
                self.inner.name.clone(),
                token,
                Arc::downgrade(&self.inner),
            );

            let owner = Arc::downgrade(&self.inner);
            let exited = handle.clone();
            let join = tokio::spawn(async move {
                let task = AssertUnwindSafe(fut).catch_unwind();
                let outcome = match CONTEXT.scope(owner.clone(), task).await {
                    Ok(res) => res,
                    Err(payload) => Err(Box::new(Panicked::from_payload(payload)) as BoxError),
                };
                match owner.upgrade() {
                    Some(inner) => ServiceNode::from_inner(inner).on_task_exit(&exited, outcome),
                    None => {
                        exited.finish(orphan_status(&exited, &outcome));
                    }
                }
            });
            core.tasks.insert(handle.clone(), join);
            handle
        };

        debug!(service = %self.inner.name, task = %name, id = handle.id(), "task spawned");
        self.publish(
            Event::new(EventKind::TaskSpawned)
                .with_service(self.inner.name.clone())
                .with_task(name),
        );
        Ok(handle)
    }

    /// Starts this node, then its children in insertion order.
    ///
    /// No-op unless the node is `created`. Returns once `on_start` of this node and of
    /// every child has returned. A failing `on_start` is not returned here: it is
    /// captured, the tree is stopped and [`join`](Self::join) reports it.
    ///
    /// # Errors
    /// [`ServiceError::InvalidState`] if the node is attached to a parent that is not
    /// `starting` or `running`; a child never runs ahead of its parent.
    pub async fn start(&self) -> Result<(), ServiceError> {
        if self.state() != ServiceState::Created {
            return Ok(());
        }
        if let Some(parent) = self.parent() {
            let parent_state = parent.state();
            if !parent_state.accepts_tasks() {
                return Err(ServiceError::InvalidState {
                    service: self.inner.name.clone(),
                    op: "start under parent",
                    state: parent_state,
                });
            }
        }
        self.clone().run_start().await;
        Ok(())
    }

    /// Stops this node and its subtree, returning once the node is `stopped`.
    ///
    /// Idempotent; concurrent callers share one stop sequence. A node that was never
    /// started goes straight to `stopped` without running any hook. With
    /// [`StopEscalation::Root`] the root of the tree is stopped as well.
    ///
    /// Called from a task or hook that belongs to the subtree being stopped, `stop`
    /// records the request and returns at once; waiting there would wait on the
    /// caller itself. The caller is cancelled with the rest of the subtree and should
    /// return promptly.
    pub async fn stop(&self) {
        let target = match self.inner.cfg.escalation {
            StopEscalation::Local => self.clone(),
            StopEscalation::Root => self.root(),
        };
        self.request_stop();
        if !target.ptr_eq(self) {
            target.request_stop();
        }

        if target.owns_current_context() {
            debug!(service = %self.inner.name, "stop requested from inside the stopping subtree");
            return;
        }
        self.stopped().await;
        target.stopped().await;
    }

    /// Runs the node to completion.
    ///
    /// Starts the node if it is still `created`, waits until it is `stopped`, then
    /// returns the earliest failure captured anywhere in its subtree. Calling it again
    /// returns the same outcome immediately without running any hook.
    ///
    /// # Errors
    /// The first captured [`ServiceError::StartupFailure`] or
    /// [`ServiceError::TaskFailure`], or the `InvalidState` from [`start`](Self::start).
    pub async fn join(&self) -> Result<(), ServiceError> {
        self.start().await?;
        self.stopped().await;
        match self.first_failure() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Waits until the node is `stopped`, without starting or stopping it.
    pub async fn stopped(&self) {
        let mut rx = self.inner.state_tx.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|s| *s == ServiceState::Stopped).await;
    }

    // ---------------------------
    // Lifecycle internals
    // ---------------------------

    fn run_start(self) -> BoxFuture<'static, ()> {
        async move {
            {
                let mut core = self.inner.core.lock();
                if core.state != ServiceState::Created {
                    return;
                }
                self.transition(&mut core, ServiceState::Starting);
            }
            self.publish_state(EventKind::ServiceStarting);

            let span = info_span!("service", name = %self.inner.name);
            let hook = AssertUnwindSafe(self.inner.service.on_start(&self)).catch_unwind();
            let outcome = CONTEXT
                .scope(Arc::downgrade(&self.inner), hook)
                .instrument(span)
                .await;

            if let Err(source) = flatten_hook(outcome) {
                self.capture(ServiceError::StartupFailure {
                    service: self.inner.name.clone(),
                    source,
                });
                self.inner.token.cancel();
                {
                    let mut core = self.inner.core.lock();
                    self.transition(&mut core, ServiceState::Stopping);
                }
                self.publish_state(EventKind::ServiceStopping);

                let root = self.root();
                if !root.ptr_eq(&self) {
                    root.request_stop();
                }
                self.clone().stop_sequence().await;
                return;
            }

            let stop_now = {
                let mut core = self.inner.core.lock();
                let next = if core.stop_requested {
                    ServiceState::Stopping
                } else {
                    ServiceState::Running
                };
                self.transition(&mut core, next);
                core.stop_requested
            };
            if stop_now {
                self.publish_state(EventKind::ServiceStopping);
                self.clone().stop_sequence().await;
                return;
            }

            info!(service = %self.inner.name, "service running");
            self.publish_state(EventKind::ServiceRunning);

            for child in self.children() {
                if self.state() != ServiceState::Running {
                    break;
                }
                child.run_start().await;
            }
        }
        .boxed()
    }

    /// Moves the node toward `stopped` without waiting for it.
    ///
    /// The stop sequence itself runs on a separate task.
    fn request_stop(&self) {
        let plan = {
            let mut core = self.inner.core.lock();
            let state = core.state;
            match state {
                ServiceState::Created => {
                    self.transition(&mut core, ServiceState::Stopped);
                    StopPlan::Skipped
                }
                ServiceState::Starting => {
                    core.stop_requested = true;
                    StopPlan::Wait
                }
                ServiceState::Running => {
                    self.transition(&mut core, ServiceState::Stopping);
                    StopPlan::Run
                }
                ServiceState::Stopping | ServiceState::Stopped => StopPlan::Wait,
            }
        };

        self.inner.token.cancel();
        match plan {
            StopPlan::Skipped => self.publish_state(EventKind::ServiceStopped),
            StopPlan::Run => {
                self.publish_state(EventKind::ServiceStopping);
                tokio::spawn(self.clone().stop_sequence());
            }
            StopPlan::Wait => {}
        }
    }

    async fn stop_and_wait(&self) {
        self.request_stop();
        self.stopped().await;
    }

    /// Whether the current task or hook belongs to this node or one of its descendants.
    fn owns_current_context(&self) -> bool {
        let Ok(Some(inner)) = CONTEXT.try_with(|owner| owner.upgrade()) else {
            return false;
        };
        let mut node = Some(ServiceNode::from_inner(inner));
        while let Some(current) = node {
            if current.ptr_eq(self) {
                return true;
            }
            node = current.parent();
        }
        false
    }

    /// Tasks, then children in reverse, then `on_stop`, then `stopped`.
    ///
    /// Caller must have moved the node to `stopping`.
    fn stop_sequence(self) -> BoxFuture<'static, ()> {
        async move {
            self.inner.token.cancel();

            let (entries, children) = {
                let mut core = self.inner.core.lock();
                (core.tasks.drain(), core.children.clone())
            };

            let grace = self.inner.cfg.grace;
            for handle in registry::cancel_and_join(entries, grace).await {
                warn!(service = %self.inner.name, task = handle.name(), ?grace, "task aborted after grace");
                self.publish(
                    Event::new(EventKind::GraceExceeded)
                        .with_service(self.inner.name.clone())
                        .with_task(handle.name()),
                );
                self.record_shutdown_error(ShutdownError::GraceExceeded {
                    service: self.inner.name.clone(),
                    task: handle.name().into(),
                    grace,
                });
            }

            for child in children.into_iter().rev() {
                child.stop_and_wait().await;
            }

            let span = info_span!("service", name = %self.inner.name);
            let hook = AssertUnwindSafe(self.inner.service.on_stop(&self)).catch_unwind();
            let outcome = CONTEXT
                .scope(Arc::downgrade(&self.inner), hook)
                .instrument(span)
                .await;
            if let Err(source) = flatten_hook(outcome) {
                self.record_shutdown_error(ShutdownError::Hook {
                    service: self.inner.name.clone(),
                    source,
                });
            }

            {
                let mut core = self.inner.core.lock();
                self.transition(&mut core, ServiceState::Stopped);
            }
            info!(service = %self.inner.name, "service stopped");
            self.publish_state(EventKind::ServiceStopped);
        }
        .boxed()
    }

    /// Classifies a finished task and reacts to its outcome.
    fn on_task_exit(&self, handle: &TaskHandle, outcome: Result<(), BoxError>) {
        let stopping = {
            let mut core = self.inner.core.lock();
            core.tasks.remove(handle.id());
            core.state.is_stopping()
        };
        let cancelled = handle.is_cancel_requested();

        let err = match outcome {
            Ok(()) => {
                let (status, kind) = if cancelled {
                    (TaskStatus::Cancelled, EventKind::TaskCancelled)
                } else {
                    (TaskStatus::Completed, EventKind::TaskCompleted)
                };
                handle.finish(status);
                debug!(service = %self.inner.name, task = handle.name(), ?status, "task finished");
                self.publish(
                    Event::new(kind)
                        .with_service(self.inner.name.clone())
                        .with_task(handle.name()),
                );
                return;
            }
            Err(err) => err,
        };

        let source: SharedError = Arc::from(err);
        self.publish(
            Event::new(EventKind::TaskFailed)
                .with_service(self.inner.name.clone())
                .with_task(handle.name())
                .with_reason(source.to_string()),
        );

        if cancelled || stopping {
            self.record_shutdown_error(ShutdownError::Task {
                service: self.inner.name.clone(),
                task: handle.name().into(),
                source,
            });
            handle.finish(TaskStatus::Failed);
            return;
        }

        self.capture(ServiceError::TaskFailure {
            service: self.inner.name.clone(),
            task: handle.name().into(),
            source,
        });
        handle.finish(TaskStatus::Failed);
        self.escalate();
    }

    /// Stops this node and the root of its tree in the background.
    fn escalate(&self) {
        self.request_stop();
        let root = self.root();
        if !root.ptr_eq(self) {
            root.request_stop();
        }
    }

    /// Stores `error` unless a failure was already captured; returns `true` if stored.
    fn capture(&self, error: ServiceError) -> bool {
        let seq = FAILURE_SEQ.fetch_add(1, Ordering::Relaxed);
        let message = error.as_message();
        if self
            .inner
            .failure
            .set(CapturedFailure { seq, error: error.clone() })
            .is_err()
        {
            debug!(service = %self.inner.name, %message, "failure already captured; ignoring");
            return false;
        }

        error!(service = %self.inner.name, label = error.as_label(), %message, "failure captured");
        let mut ev = Event::new(EventKind::FailureCaptured)
            .with_service(self.inner.name.clone())
            .with_reason(message);
        if let ServiceError::TaskFailure { task, .. } = &error {
            ev = ev.with_task(task.clone());
        }
        self.publish(ev);
        true
    }

    fn record_shutdown_error(&self, err: ShutdownError) {
        let message = err.as_message();
        warn!(service = %self.inner.name, label = err.as_label(), %message, "shutdown error");

        let mut ev = Event::new(EventKind::ShutdownError)
            .with_service(self.inner.name.clone())
            .with_reason(message);
        if let ShutdownError::Task { task, .. } | ShutdownError::GraceExceeded { task, .. } = &err {
            ev = ev.with_task(task.clone());
        }
        self.inner.core.lock().shutdown_errors.push(err);
        self.publish(ev);
    }

    /// Earliest captured failure in this node's subtree.
    fn first_failure(&self) -> Option<ServiceError> {
        let mut best: Option<(u64, ServiceError)> = None;
        let mut stack = vec![self.clone()];
        while let Some(node) = stack.pop() {
            if let Some(f) = node.inner.failure.get() {
                if best.as_ref().is_none_or(|(seq, _)| f.seq < *seq) {
                    best = Some((f.seq, f.error.clone()));
                }
            }
            stack.extend(node.children());
        }
        best.map(|(_, err)| err)
    }

    fn transition(&self, core: &mut NodeCore, to: ServiceState) {
        debug_assert!(to >= core.state, "state regressed: {} -> {}", core.state, to);
        core.state = to;
        self.inner.state_tx.send_replace(to);
    }

    fn publish(&self, ev: Event) {
        self.root().inner.bus.publish(ev);
    }

    fn publish_state(&self, kind: EventKind) {
        self.publish(Event::new(kind).with_service(self.inner.name.clone()));
    }

    fn invalid_state(&self, op: &'static str, state: ServiceState) -> ServiceError {
        ServiceError::InvalidState {
            service: self.inner.name.clone(),
            op,
            state,
        }
    }

    fn already_attached(&self, child: &ServiceNode) -> ServiceError {
        ServiceError::AlreadyAttached {
            service: self.inner.name.clone(),
            child: child.inner.name.clone(),
        }
    }
}

impl fmt::Debug for ServiceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceNode")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Status of a task whose node was dropped before it finished.
fn orphan_status(handle: &TaskHandle, outcome: &Result<(), BoxError>) -> TaskStatus {
    match outcome {
        Err(_) => TaskStatus::Failed,
        Ok(()) if handle.is_cancel_requested() => TaskStatus::Cancelled,
        Ok(()) => TaskStatus::Completed,
    }
}

/// Folds a caught hook panic into the hook's error.
fn flatten_hook(
    outcome: Result<Result<(), BoxError>, Box<dyn std::any::Any + Send>>,
) -> Result<(), SharedError> {
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(Arc::from(err)),
        Err(payload) => Err(Arc::new(Panicked::from_payload(payload))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Records hook calls; optionally fails them.
    struct Probe {
        name: &'static str,
        log: Log,
        stops: Arc<AtomicUsize>,
        fail_start: bool,
        fail_stop: bool,
    }

    impl Probe {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: log.clone(),
                stops: Arc::new(AtomicUsize::new(0)),
                fail_start: false,
                fail_stop: false,
            }
        }
    }

    #[async_trait]
    impl Service for Probe {
        fn name(&self) -> &str {
            self.name
        }

        async fn on_start(&self, _node: &ServiceNode) -> Result<(), BoxError> {
            self.log.lock().push(format!("start:{}", self.name));
            if self.fail_start {
                return Err("cannot bind".into());
            }
            Ok(())
        }

        async fn on_stop(&self, _node: &ServiceNode) -> Result<(), BoxError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.log.lock().push(format!("stop:{}", self.name));
            if self.fail_stop {
                return Err("cannot close".into());
            }
            Ok(())
        }
    }

    type TaskFn = fn(CancellationToken) -> BoxFuture<'static, Result<(), BoxError>>;

    /// Spawns one task named `work` from `on_start`.
    struct Tasked {
        name: &'static str,
        task: TaskFn,
    }

    #[async_trait]
    impl Service for Tasked {
        fn name(&self) -> &str {
            self.name
        }

        async fn on_start(&self, node: &ServiceNode) -> Result<(), BoxError> {
            node.spawn("work", self.task)?;
            Ok(())
        }
    }

    fn until_cancelled(ctx: CancellationToken) -> BoxFuture<'static, Result<(), BoxError>> {
        async move {
            ctx.cancelled().await;
            Ok(())
        }
        .boxed()
    }

    fn boom(_ctx: CancellationToken) -> BoxFuture<'static, Result<(), BoxError>> {
        let err: BoxError = std::io::Error::other("boom").into();
        futures::future::ready(Err(err)).boxed()
    }

    fn kaboom(_ctx: CancellationToken) -> BoxFuture<'static, Result<(), BoxError>> {
        futures::future::lazy(|_| -> Result<(), BoxError> { panic!("kaboom") }).boxed()
    }

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().clone()
    }

    #[tokio::test]
    async fn test_start_and_stop_order() {
        let log = log();
        let root = ServiceNode::new(Probe::new("root", &log));
        for name in ["a", "b", "c"] {
            root.add_child(ServiceNode::new(Probe::new(name, &log))).unwrap();
        }

        root.start().await.unwrap();
        assert_eq!(entries(&log), ["start:root", "start:a", "start:b", "start:c"]);
        assert!(root.children().iter().all(|c| c.state() == ServiceState::Running));

        root.stop().await;
        assert_eq!(
            entries(&log)[4..],
            ["stop:c", "stop:b", "stop:a", "stop:root"]
        );
        assert_eq!(root.state(), ServiceState::Stopped);
        assert!(root.children().iter().all(|c| c.state() == ServiceState::Stopped));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let log = log();
        let node = ServiceNode::new(Probe::new("solo", &log));
        node.start().await.unwrap();
        node.start().await.unwrap();
        assert_eq!(entries(&log), ["start:solo"]);
        assert_eq!(node.state(), ServiceState::Running);
        node.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stops_run_on_stop_once() {
        let log = log();
        let probe = Probe::new("solo", &log);
        let stops = probe.stops.clone();
        let node = ServiceNode::new(probe);
        node.start().await.unwrap();

        let mut joins = Vec::new();
        for _ in 0..8 {
            let node = node.clone();
            joins.push(tokio::spawn(async move { node.stop().await }));
        }
        for j in joins {
            j.await.unwrap();
        }
        node.stop().await;

        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(node.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_before_start_skips_hooks() {
        let log = log();
        let node = ServiceNode::new(Probe::new("idle", &log));
        node.stop().await;
        assert_eq!(node.state(), ServiceState::Stopped);

        node.start().await.unwrap();
        assert!(node.join().await.is_ok());
        assert!(entries(&log).is_empty());
    }

    #[tokio::test]
    async fn test_add_child_while_running_is_rejected() {
        let root = ServiceNode::group("root");
        root.add_child(ServiceNode::group("early")).unwrap();
        root.start().await.unwrap();

        let err = root.add_child(ServiceNode::group("late")).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InvalidState { op: "add_child", state: ServiceState::Running, .. }
        ));
        assert_eq!(root.children().len(), 1);
        assert_eq!(root.children()[0].name(), "early");
        root.stop().await;
    }

    #[tokio::test]
    async fn test_add_child_rejects_second_parent_and_cycles() {
        let a = ServiceNode::group("a");
        let b = ServiceNode::group("b");
        let c = ServiceNode::group("c");
        a.add_child(b.clone()).unwrap();
        b.add_child(c.clone()).unwrap();

        let other = ServiceNode::group("other");
        assert!(matches!(
            other.add_child(b.clone()),
            Err(ServiceError::AlreadyAttached { .. })
        ));
        assert!(matches!(
            c.add_child(a.clone()),
            Err(ServiceError::AlreadyAttached { .. })
        ));
        assert!(matches!(
            a.add_child(a.clone()),
            Err(ServiceError::AlreadyAttached { .. })
        ));
        assert!(other.children().is_empty());
        assert!(c.children().is_empty());
        assert!(c.root().ptr_eq(&a));
    }

    #[tokio::test]
    async fn test_spawn_requires_live_node() {
        let node = ServiceNode::group("svc");
        let err = node.spawn("early", |_| async { Ok::<(), BoxError>(()) }).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InvalidState { op: "spawn", state: ServiceState::Created, .. }
        ));

        node.stop().await;
        assert!(node.spawn("late", |_| async { Ok::<(), BoxError>(()) }).is_err());
    }

    #[tokio::test]
    async fn test_completed_task_keeps_node_running() {
        let node = ServiceNode::group("svc");
        node.start().await.unwrap();

        let handle = node.spawn("once", |_| async { Ok::<(), BoxError>(()) }).unwrap();
        assert_eq!(handle.wait().await, TaskStatus::Completed);
        assert_eq!(node.state(), ServiceState::Running);
        assert!(node.tasks().is_empty());
        assert!(handle.owner().is_some_and(|o| o.ptr_eq(&node)));

        node.stop().await;
        assert!(node.join().await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_task_is_not_a_failure() {
        let node = ServiceNode::group("svc");
        node.start().await.unwrap();

        let handle = node
            .spawn("loop", |ctx| async move {
                ctx.cancelled().await;
                Err::<(), BoxError>("interrupted".into())
            })
            .unwrap();
        handle.cancel();
        assert_eq!(handle.wait().await, TaskStatus::Failed);
        assert_eq!(node.state(), ServiceState::Running);
        assert!(node.failure().is_none());
        assert!(matches!(
            node.shutdown_errors().as_slice(),
            [ShutdownError::Task { .. }]
        ));

        let polite = node
            .spawn("polite", until_cancelled)
            .unwrap();
        polite.cancel();
        assert_eq!(polite.wait().await, TaskStatus::Cancelled);

        node.stop().await;
        assert!(node.join().await.is_ok());
    }

    #[tokio::test]
    async fn test_task_failure_stops_tree_and_surfaces_cause() {
        let root = ServiceNode::group("root");
        let quiet = ServiceNode::new(Tasked {
            name: "quiet",
            task: until_cancelled,
        });
        let loud = ServiceNode::new(Tasked {
            name: "loud",
            task: boom,
        });
        root.add_child(quiet.clone()).unwrap();
        root.add_child(loud.clone()).unwrap();

        let err = root.join().await.unwrap_err();
        assert!(matches!(err, ServiceError::TaskFailure { ref task, .. } if &**task == "work"));
        let cause = err.cause().unwrap();
        assert!(cause.downcast_ref::<std::io::Error>().is_some());
        assert_eq!(cause.to_string(), "boom");

        for node in [&root, &quiet, &loud] {
            assert_eq!(node.state(), ServiceState::Stopped);
        }
        assert!(loud.failure().is_some());
        assert!(root.failure().is_none());

        let again = root.join().await.unwrap_err();
        assert_eq!(again.to_string(), err.to_string());
    }

    #[tokio::test]
    async fn test_panicking_task_is_captured() {
        let node = ServiceNode::new(Tasked {
            name: "panicky",
            task: kaboom,
        });
        let err = node.join().await.unwrap_err();
        let cause = err.cause().unwrap();
        assert_eq!(cause.downcast_ref::<Panicked>().unwrap().0, "kaboom");
    }

    #[tokio::test]
    async fn test_startup_failure_runs_stop_sequence_and_escalates() {
        let log = log();
        let root = ServiceNode::new(Probe::new("root", &log));
        let first = ServiceNode::new(Probe::new("first", &log));
        let mut broken = Probe::new("broken", &log);
        broken.fail_start = true;
        let broken = ServiceNode::new(broken);
        let never = ServiceNode::new(Probe::new("never", &log));
        root.add_child(first.clone()).unwrap();
        root.add_child(broken.clone()).unwrap();
        root.add_child(never.clone()).unwrap();

        let err = root.join().await.unwrap_err();
        assert!(matches!(err, ServiceError::StartupFailure { ref service, .. } if &**service == "broken"));
        assert_eq!(err.cause().unwrap().to_string(), "cannot bind");

        let log = entries(&log);
        assert!(!log.contains(&"start:never".to_string()));
        assert!(log.contains(&"stop:broken".to_string()));
        assert_eq!(log.last().map(String::as_str), Some("stop:root"));
        for node in [&root, &first, &broken, &never] {
            assert_eq!(node.state(), ServiceState::Stopped);
        }
    }

    #[tokio::test]
    async fn test_on_stop_error_is_a_diagnostic() {
        let log = log();
        let mut probe = Probe::new("leaky", &log);
        probe.fail_stop = true;
        let node = ServiceNode::new(probe);
        node.start().await.unwrap();
        node.stop().await;

        assert!(node.join().await.is_ok());
        assert!(matches!(
            node.shutdown_errors().as_slice(),
            [ShutdownError::Hook { .. }]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stubborn_task_is_aborted_after_grace() {
        let cfg = Config {
            grace: Duration::from_millis(100),
            ..Config::default()
        };
        let node = ServiceNode::builder(Group::new("svc")).config(cfg).build();
        node.start().await.unwrap();
        let handle = node
            .spawn("stubborn", |_ctx| async {
                std::future::pending::<()>().await;
                Ok::<(), BoxError>(())
            })
            .unwrap();

        node.stop().await;
        assert_eq!(handle.status(), TaskStatus::Cancelled);
        assert!(matches!(
            node.shutdown_errors().as_slice(),
            [ShutdownError::GraceExceeded { .. }]
        ));
        assert!(node.join().await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_grace_aborts_without_waiting() {
        let cfg = Config {
            grace: Duration::ZERO,
            ..Config::default()
        };
        let node = ServiceNode::builder(Group::new("svc")).config(cfg).build();
        node.start().await.unwrap();
        let handle = node
            .spawn("stubborn", |_ctx| async {
                std::future::pending::<()>().await;
                Ok::<(), BoxError>(())
            })
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), node.stop())
            .await
            .unwrap();
        assert_eq!(handle.status(), TaskStatus::Cancelled);
        assert!(matches!(
            node.shutdown_errors().as_slice(),
            [ShutdownError::GraceExceeded { grace, .. }] if grace.is_zero()
        ));
    }

    #[tokio::test]
    async fn test_task_can_stop_its_own_node() {
        let log = log();
        let cfg = Config {
            grace: Duration::from_secs(30),
            ..Config::default()
        };
        let node = ServiceNode::builder(Probe::new("oneshot", &log))
            .config(cfg)
            .build();
        let child = ServiceNode::new(Probe::new("child", &log));
        node.add_child(child.clone()).unwrap();
        node.start().await.unwrap();

        let owner = node.clone();
        let handle = node
            .spawn("finish", move |_ctx| async move {
                owner.stop().await;
                Ok::<(), BoxError>(())
            })
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), node.join())
            .await
            .unwrap();
        assert!(outcome.is_ok());
        assert_eq!(node.state(), ServiceState::Stopped);
        assert_eq!(child.state(), ServiceState::Stopped);
        assert_eq!(handle.status(), TaskStatus::Cancelled);
        assert!(node.shutdown_errors().is_empty());
        assert_eq!(
            entries(&log),
            ["start:oneshot", "start:child", "stop:child", "stop:oneshot"]
        );
    }

    /// Gives up from inside `on_start`.
    struct Quitter;

    #[async_trait]
    impl Service for Quitter {
        fn name(&self) -> &str {
            "quitter"
        }

        async fn on_start(&self, node: &ServiceNode) -> Result<(), BoxError> {
            node.stop().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_on_start_can_stop_its_own_node() {
        let node = ServiceNode::new(Quitter);
        let child = ServiceNode::group("late");
        node.add_child(child.clone()).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), node.join())
            .await
            .unwrap();
        assert!(outcome.is_ok());
        assert_eq!(node.state(), ServiceState::Stopped);
        assert_eq!(child.state(), ServiceState::Stopped);
    }

    /// Blocks `on_start` until the gate opens.
    struct Gated {
        entered: Arc<Notify>,
        gate: Arc<Notify>,
        stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Service for Gated {
        fn name(&self) -> &str {
            "gated"
        }

        async fn on_start(&self, _node: &ServiceNode) -> Result<(), BoxError> {
            self.entered.notify_one();
            self.gate.notified().await;
            Ok(())
        }

        async fn on_stop(&self, _node: &ServiceNode) -> Result<(), BoxError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stop_during_start_never_reaches_running() {
        let entered = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let stops = Arc::new(AtomicUsize::new(0));
        let node = ServiceNode::new(Gated {
            entered: entered.clone(),
            gate: gate.clone(),
            stops: stops.clone(),
        });
        let mut rx = node.subscribe();

        let starter = {
            let node = node.clone();
            tokio::spawn(async move { node.start().await })
        };
        entered.notified().await;
        assert_eq!(node.state(), ServiceState::Starting);

        let stopper = {
            let node = node.clone();
            tokio::spawn(async move { node.stop().await })
        };
        while !node.inner.core.lock().stop_requested {
            tokio::task::yield_now().await;
        }
        assert_eq!(node.state(), ServiceState::Starting);

        gate.notify_one();
        starter.await.unwrap().unwrap();
        stopper.await.unwrap();

        assert_eq!(node.state(), ServiceState::Stopped);
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        assert!(!kinds.contains(&EventKind::ServiceRunning));
        assert!(kinds.contains(&EventKind::ServiceStopping));
        assert_eq!(kinds.last(), Some(&EventKind::ServiceStopped));
    }

    #[tokio::test]
    async fn test_subscribe_resolves_root_when_called() {
        let child = ServiceNode::group("child");
        let mut early = child.subscribe();
        let root = ServiceNode::group("root");
        root.add_child(child.clone()).unwrap();
        let mut late = child.subscribe();

        root.start().await.unwrap();
        root.stop().await;

        assert!(early.try_recv().is_err());
        let mut kinds = Vec::new();
        while let Ok(ev) = late.try_recv() {
            kinds.push(ev.kind);
        }
        assert!(kinds.contains(&EventKind::ServiceRunning));
        assert_eq!(kinds.last(), Some(&EventKind::ServiceStopped));
    }

    #[tokio::test]
    async fn test_inner_stop_is_local_by_default() {
        let root = ServiceNode::group("root");
        let child = ServiceNode::group("child");
        root.add_child(child.clone()).unwrap();
        root.start().await.unwrap();

        child.stop().await;
        assert_eq!(child.state(), ServiceState::Stopped);
        assert_eq!(root.state(), ServiceState::Running);

        root.stop().await;
        assert!(root.join().await.is_ok());
    }

    #[tokio::test]
    async fn test_root_escalation_stops_whole_tree() {
        let cfg = Config {
            escalation: StopEscalation::Root,
            ..Config::default()
        };
        let root = ServiceNode::group("root");
        let sibling = ServiceNode::group("sibling");
        let child = ServiceNode::builder(Group::new("child")).config(cfg).build();
        root.add_child(sibling.clone()).unwrap();
        root.add_child(child.clone()).unwrap();
        root.start().await.unwrap();

        child.stop().await;
        root.stopped().await;
        assert_eq!(sibling.state(), ServiceState::Stopped);
        assert!(root.join().await.is_ok());
    }

    #[tokio::test]
    async fn test_child_cannot_start_ahead_of_parent() {
        let root = ServiceNode::group("root");
        let child = ServiceNode::group("child");
        root.add_child(child.clone()).unwrap();

        assert!(matches!(
            child.start().await,
            Err(ServiceError::InvalidState { state: ServiceState::Created, .. })
        ));
        assert_eq!(child.state(), ServiceState::Created);
    }

    #[tokio::test]
    async fn test_events_reach_root_subscribers() {
        let root = ServiceNode::group("root");
        let mut rx = root.subscribe();
        let child = ServiceNode::group("child");
        root.add_child(child.clone()).unwrap();
        root.start().await.unwrap();
        root.stop().await;

        let mut seen = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            seen.push((ev.kind, ev.service.as_deref().map(str::to_owned)));
        }
        assert!(seen.contains(&(EventKind::ChildAdded, Some("root".into()))));
        assert!(seen.contains(&(EventKind::ServiceRunning, Some("child".into()))));
        assert_eq!(seen.last(), Some(&(EventKind::ServiceStopped, Some("root".into()))));
    }
}
