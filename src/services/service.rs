//! # The collaborator contract.
//!
//! A [`Service`] is whatever a user plugs into the tree: an HTTP server, a socket
//! listener, a queue consumer. The runtime only ever calls its two hooks:
//!
//! - [`on_start`](Service::on_start): once per node, while the node is `starting`.
//!   Acquire resources, [`spawn`](crate::ServiceNode::spawn) long-running tasks and
//!   [`add_child`](crate::ServiceNode::add_child) sub-services here.
//! - [`on_stop`](Service::on_stop): once per node, after the node's tasks were
//!   cancelled and its children stopped. Release whatever `on_start` acquired.
//!
//! Both hooks receive the node they are attached to. Per-service mutable state lives
//! behind interior mutability (`Mutex`, atomics), since hooks take `&self`.

use async_trait::async_trait;

use crate::core::ServiceNode;
use crate::error::BoxError;

/// # Two-hook lifecycle capability implemented by every collaborator.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use servisor::{BoxError, Service, ServiceNode};
///
/// struct Ticker;
///
/// #[async_trait]
/// impl Service for Ticker {
///     fn name(&self) -> &str { "ticker" }
///
///     async fn on_start(&self, node: &ServiceNode) -> Result<(), BoxError> {
///         node.spawn("tick", |ctx| async move {
///             while !ctx.is_cancelled() {
///                 tokio::select! {
///                     _ = ctx.cancelled() => break,
///                     _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
///                 }
///             }
///             Ok::<(), BoxError>(())
///         })?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Returns a stable, human-readable name used in events and logs.
    ///
    /// The default uses `type_name::<Self>()`; override it when possible.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called once when the node starts, before any child starts.
    ///
    /// Returning an error aborts the start: the node runs its stop sequence and the
    /// whole tree is stopped.
    async fn on_start(&self, _node: &ServiceNode) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called once when the node stops, after its tasks and children are done.
    ///
    /// Errors are reported as diagnostics and never interrupt shutdown.
    async fn on_stop(&self, _node: &ServiceNode) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Hook-less service used to group children under one node.
#[derive(Debug, Clone)]
pub struct Group {
    name: String,
}

impl Group {
    /// Creates a group with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Service for Group {
    fn name(&self) -> &str {
        &self.name
    }
}
