//! # Subscribers: consumers of lifecycle events.
//!
//! A [`Subscribe`] implementation sees every [`Event`] of the tree a
//! [`Supervisor`](crate::Supervisor) runs: state transitions, task exits, captured
//! failures and shutdown diagnostics.
//!
//! ```text
//! root Bus ──► Supervisor listener ──► SubscriberSet ──► queue ──► worker ──► on_event()
//! ```
//!
//! Delivery is in publish order per subscriber. A subscriber that falls behind loses
//! events from its own queue (reported as `EventKind::SubscriberOverflow`); a panic in
//! `on_event` is reported as `EventKind::SubscriberPanicked` and the worker carries on.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use servisor::{Event, EventKind, Subscribe};
//!
//! struct Alerts;
//!
//! #[async_trait]
//! impl Subscribe for Alerts {
//!     async fn on_event(&self, ev: &Event) {
//!         if matches!(ev.kind, EventKind::FailureCaptured) {
//!             // page someone
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "alerts" }
//!     fn queue_capacity(&self) -> usize { 64 }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Receives lifecycle events of a supervised tree.
///
/// `on_event` runs on the subscriber's own worker, never on a service task, so a
/// slow handler delays nothing but its own queue. Keep it non-blocking.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event.
    async fn on_event(&self, event: &Event);

    /// Name reported in overflow and panic events. Defaults to the type name.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Capacity of this subscriber's queue, at least 1. Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
