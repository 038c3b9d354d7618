use std::sync::Arc;

use crate::{
    config::Config,
    services::Service,
    subscribers::{Subscribe, SubscriberSet},
};

use super::{node::ServiceNode, supervisor::Supervisor};

/// Builder for a [`ServiceNode`] with a custom name or configuration.
pub struct NodeBuilder {
    service: Arc<dyn Service>,
    name: Option<Arc<str>>,
    cfg: Config,
}

impl NodeBuilder {
    pub(crate) fn new(service: Arc<dyn Service>) -> Self {
        Self {
            service,
            name: None,
            cfg: Config::default(),
        }
    }

    /// Overrides the name reported in events and logs (defaults to [`Service::name`]).
    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the node configuration.
    pub fn config(mut self, cfg: Config) -> Self {
        self.cfg = cfg;
        self
    }

    /// Builds the node in the `created` state.
    pub fn build(self) -> ServiceNode {
        let name = self
            .name
            .unwrap_or_else(|| Arc::from(self.service.name()));
        ServiceNode::from_parts(name, self.service, self.cfg)
    }
}

/// Builder for constructing a [`Supervisor`] around a root node.
pub struct SupervisorBuilder {
    root: ServiceNode,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl SupervisorBuilder {
    pub(crate) fn new(root: ServiceNode) -> Self {
        Self {
            root,
            subscribers: Vec::new(),
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive every event of the tree (lifecycle, task exits, failures)
    /// through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the supervisor and spawns one worker per subscriber.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Supervisor {
        let subs = SubscriberSet::new(self.subscribers, self.root.tree_bus());
        Supervisor::new_internal(self.root, subs)
    }
}
