//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to runtime events emitted by service nodes, their tasks,
//! the supervisor and subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `ServiceNode` (state transitions, task exits, failures),
//!   `Supervisor` (shutdown requests), `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: `Supervisor::run` (fans out to `SubscriberSet`) and any
//!   receiver obtained from `ServiceNode::subscribe`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
