//! # Event subscribers for the servisor runtime.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out, and
//! built-in implementations for handling events broadcast through the tree's
//! [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//! ServiceNode ── publish(Event) ──► root Bus ──► Supervisor listener ──► SubscriberSet
//!                                                                  ┌─────────┼─────────┐
//!                                                                  ▼         ▼         ▼
//!                                                              LogWriter  Metrics   Custom
//! ```

mod subscriber;
mod subscriber_set;

#[cfg(feature = "logging")]
mod embedded;

pub use subscriber::Subscribe;
pub use subscriber_set::SubscriberSet;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
