//! # Service abstractions.
//!
//! - [`Service`] - the two-hook capability (`on_start`, `on_stop`) every collaborator implements
//! - [`Group`] - a service with no hooks, for composing children under one node

mod service;

pub use service::{Group, Service};
