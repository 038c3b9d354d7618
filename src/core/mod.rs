//! Runtime core: the supervision tree and its root controller.
//!
//! The public API from this module is [`ServiceNode`], [`ServiceState`] and
//! [`Supervisor`] (plus their builders).
//!
//! Internal modules:
//! - [`node`]: per-node state machine, task spawning, failure capture and escalation;
//! - [`state`]: the ordered lifecycle states;
//! - [`registry`]: the tasks a node owns, cancel-then-join with a grace period;
//! - [`supervisor`]: interrupt handling, event forwarding, exit status;
//! - [`shutdown`]: cross-platform shutdown signal handling;
//! - [`builder`]: node and supervisor builders.

mod builder;
mod node;
mod registry;
mod shutdown;
mod state;
mod supervisor;

pub use builder::{NodeBuilder, SupervisorBuilder};
pub use node::ServiceNode;
pub use state::ServiceState;
pub use supervisor::{Supervisor, run};

pub(crate) use node::NodeInner;
