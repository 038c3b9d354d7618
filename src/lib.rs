//! # servisor
//!
//! **Servisor** composes independently written long-running services (servers,
//! listeners, consumers) into one async process and ties their fate together.
//!
//! Every service is a node in a supervision tree. Nodes start parent-first, stop
//! children-first, own the tasks they spawn, and share one outcome: a failure anywhere
//! stops the whole tree, and [`ServiceNode::join`] on the root reports it.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                 ┌───────────────────────────────────────────┐
//!  SIGINT/TERM ──►│ Supervisor (root controller)              │
//!                 │  - request_shutdown() → root.stop()       │
//!                 │  - root.join() → exit code                │
//!                 │  - forwards root Bus → SubscriberSet      │
//!                 └─────────────────────┬─────────────────────┘
//!                                       ▼
//!                              ┌─────────────────┐
//!                              │ ServiceNode     │ root (owns the Bus)
//!                              │  Service hooks  │
//!                              └───┬─────────┬───┘
//!                       children   │         │   children (insertion order)
//!                       ┌──────────▼───┐ ┌───▼──────────┐
//!                       │ ServiceNode  │ │ ServiceNode  │
//!                       │  tasks: [..] │ │  tasks: [..] │──► TaskHandle (CancellationToken)
//!                       └──────────────┘ └──────────────┘
//!                              │                 │
//!                              └──── publish(Event) ───► root Bus ──► subscribers
//! ```
//!
//! ### Lifecycle
//! ```text
//! start():  created ─► starting ─► on_start() ─► running ─► start children (in order)
//!                                    │
//!                                    └─ Err ─► capture StartupFailure ─► stop(self) + stop(root)
//!
//! task:     spawn() ─► running ─┬─ Ok                  ─► completed (deregistered)
//!                               ├─ Ok after cancel      ─► cancelled
//!                               ├─ Err while live       ─► failed, capture TaskFailure ─► stop(self) + stop(root)
//!                               └─ Err after cancel     ─► failed, ShutdownError diagnostic
//!
//! stop():   stopping ─► cancel tasks, wait ≤ grace (abort the rest)
//!                    ─► stop children (reverse order)
//!                    ─► on_stop()
//!                    ─► stopped (wakes join()/stopped() waiters)
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                         |
//! |-------------------|--------------------------------------------------------------|--------------------------------------------|
//! | **Services**      | Two-hook contract implemented by every collaborator.          | [`Service`], [`Group`]                     |
//! | **Supervision**   | Tree composition, ordered start/stop, failure escalation.     | [`ServiceNode`], [`ServiceState`]          |
//! | **Tasks**         | Cancellable units of work owned by a node.                    | [`TaskHandle`], [`TaskStatus`]             |
//! | **Shutdown**      | Signals to root stop, single outcome, exit status.            | [`Supervisor`], [`run`]                    |
//! | **Subscriber API**| Hook into lifecycle events (logging, metrics, custom).        | [`Subscribe`], [`Event`], [`EventKind`]    |
//! | **Errors**        | Typed lifecycle errors and shutdown diagnostics.              | [`ServiceError`], [`ShutdownError`]        |
//! | **Configuration** | Node settings and dotted-key settings documents.              | [`Config`], [`Settings`]                   |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use async_trait::async_trait;
//! use servisor::{BoxError, Service, ServiceNode, ServiceState, Supervisor};
//!
//! struct Heartbeat;
//!
//! #[async_trait]
//! impl Service for Heartbeat {
//!     fn name(&self) -> &str { "heartbeat" }
//!
//!     async fn on_start(&self, node: &ServiceNode) -> Result<(), BoxError> {
//!         node.spawn("beat", |ctx| async move {
//!             loop {
//!                 tokio::select! {
//!                     _ = ctx.cancelled() => return Ok::<(), BoxError>(()),
//!                     _ = tokio::time::sleep(Duration::from_millis(5)) => {}
//!                 }
//!             }
//!         })?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let root = ServiceNode::group("app");
//!     root.add_child(ServiceNode::new(Heartbeat))?;
//!
//!     let sup = Supervisor::builder(root.clone()).build();
//!     // Stand-in for Ctrl-C: interrupt after a short while.
//!     sup.run_until(tokio::time::sleep(Duration::from_millis(20))).await?;
//!
//!     assert_eq!(root.state(), ServiceState::Stopped);
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod services;
mod settings;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use config::{Config, StopEscalation};
pub use crate::core::{NodeBuilder, ServiceNode, ServiceState, Supervisor, SupervisorBuilder, run};
pub use error::{BoxError, Panicked, ServiceError, SharedError, ShutdownError};
pub use events::{Bus, Event, EventKind};
pub use services::{Group, Service};
pub use settings::{Settings, SettingsError, parse_address};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::{TaskHandle, TaskStatus};

/// Cancellation token handed to every spawned task.
pub use tokio_util::sync::CancellationToken;

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
