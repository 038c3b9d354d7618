//! # Node runtime configuration.
//!
//! Provides [`Config`], the per-node settings for the supervision runtime.
//!
//! ## Sentinel values
//! - `grace = 0s` → tasks still running after cancellation are aborted immediately
//! - `bus_capacity = 0` → clamped to 1

use std::time::Duration;

use serde::Deserialize;

use crate::settings::{Settings, SettingsError};

/// What an ordinary (non-failure) [`stop`](crate::ServiceNode::stop) on an inner node does.
///
/// Failures always escalate to the root regardless of this setting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopEscalation {
    /// Stop only the node and its subtree (default).
    #[default]
    Local,
    /// Also stop the root of the tree.
    Root,
}

/// Configuration for a [`ServiceNode`](crate::ServiceNode).
///
/// ## Field semantics
/// - `grace`: how long a stop waits for each cancelled task before aborting it
/// - `bus_capacity`: event bus ring buffer size (only the root's bus is used)
/// - `escalation`: whether an ordinary `stop()` also stops the root
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum time to wait for a cancelled task to finish.
    ///
    /// When a node stops:
    /// - Every task token is cancelled
    /// - The node waits up to `grace` for each task to exit
    /// - A task still running afterwards is aborted and reported as
    ///   [`ShutdownError::GraceExceeded`](crate::ShutdownError::GraceExceeded)
    pub grace: Duration,

    /// Capacity of the event bus broadcast channel.
    ///
    /// Slow receivers that lag behind more than `bus_capacity` messages
    /// receive `Lagged` and skip older items.
    pub bus_capacity: usize,

    /// Escalation policy for ordinary stops.
    pub escalation: StopEscalation,
}

impl Config {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Reads overrides from `settings` under `prefix`, keeping defaults for absent keys.
    ///
    /// Recognised keys: `<prefix>.grace_ms`, `<prefix>.bus_capacity`, `<prefix>.escalation`.
    ///
    /// # Example
    /// ```
    /// use serde_json::json;
    /// use servisor::{Config, Settings, StopEscalation};
    ///
    /// let settings = Settings::new(json!({
    ///     "supervisor": { "grace_ms": 250, "escalation": "root" }
    /// }));
    /// let cfg = Config::from_settings(&settings, "supervisor").unwrap();
    /// assert_eq!(cfg.grace.as_millis(), 250);
    /// assert_eq!(cfg.escalation, StopEscalation::Root);
    /// assert_eq!(cfg.bus_capacity, 1024);
    /// ```
    pub fn from_settings(settings: &Settings, prefix: &str) -> Result<Self, SettingsError> {
        let key = |name: &str| format!("{prefix}.{name}");
        let mut cfg = Config::default();

        if let Some(ms) = settings.get_as::<u64>(&key("grace_ms"))? {
            cfg.grace = Duration::from_millis(ms);
        }
        if let Some(cap) = settings.get_as::<usize>(&key("bus_capacity"))? {
            cfg.bus_capacity = cap;
        }
        if let Some(escalation) = settings.get_as::<StopEscalation>(&key("escalation"))? {
            cfg.escalation = escalation;
        }
        Ok(cfg)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `grace = 60s`
    /// - `bus_capacity = 1024`
    /// - `escalation = StopEscalation::Local`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            bus_capacity: 1024,
            escalation: StopEscalation::Local,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_settings_rejects_bad_escalation() {
        let settings = Settings::new(json!({ "sup": { "escalation": "sideways" } }));
        let err = Config::from_settings(&settings, "sup").unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { .. }));
    }

    #[test]
    fn test_missing_prefix_keeps_defaults() {
        let cfg = Config::from_settings(&Settings::default(), "nothing").unwrap();
        assert_eq!(cfg.grace, Duration::from_secs(60));
        assert_eq!(cfg.escalation, StopEscalation::Local);
    }

    #[test]
    fn test_bus_capacity_clamped() {
        let cfg = Config {
            bus_capacity: 0,
            ..Config::default()
        };
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }
}
