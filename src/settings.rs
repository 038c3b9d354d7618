//! # Settings: dotted-key lookup over a JSON document.
//!
//! [`Settings`] wraps a [`serde_json::Value`] and gives collaborator services a small
//! configuration surface:
//! - **Dotted keys**: `get("http.port")` walks nested objects
//! - **References**: a string of the exact form `"${other.key}"` resolves to the value at
//!   `other.key` (recursively, inside arrays and objects too)
//! - **Typed reads**: [`Settings::get_as`] deserialises through serde
//! - **Defaults**: [`Settings::set_default`] fills a key only when absent
//!
//! ## Example
//! ```rust
//! use serde_json::json;
//! use servisor::Settings;
//!
//! let settings = Settings::new(json!({
//!     "http": { "address": "127.0.0.1", "port": 4000 },
//!     "logger": { "address": "${http.address}" },
//! }));
//!
//! assert_eq!(settings.get("logger.address"), Some(json!("127.0.0.1")));
//! assert_eq!(settings.get_as::<u16>("http.port").unwrap(), Some(4000));
//! assert_eq!(settings.get("http.missing"), None);
//! ```

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

/// References nested deeper than this are treated as unresolvable (cycle guard).
const MAX_EXPANSION_DEPTH: usize = 32;

/// Errors produced while reading settings.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The document could not be parsed.
    #[error("settings document is not valid JSON: {source}")]
    Parse {
        #[source]
        source: serde_json::Error,
    },

    /// The value at `key` does not have the requested shape.
    #[error("settings key {key:?} has an invalid value: {source}")]
    Invalid {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// An address string could not be split into host and port.
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// Read-mostly configuration document with dotted-key access.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    root: Value,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }
}

impl Settings {
    /// Wraps an existing JSON document.
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    /// Parses a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, SettingsError> {
        serde_json::from_str(raw)
            .map(Self::new)
            .map_err(|source| SettingsError::Parse { source })
    }

    /// Returns the raw, unexpanded document.
    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Returns the expanded value at `key`, or `None` when absent or unresolvable.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.resolve(key, 0)
    }

    /// Returns the expanded value at `key`, or `default`.
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Deserialises the expanded value at `key`.
    ///
    /// Returns `Ok(None)` when the key is absent and `Err` when it is present but malformed.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SettingsError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| SettingsError::Invalid {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    /// Returns `true` if `key` exists in the raw document.
    pub fn contains(&self, key: &str) -> bool {
        lookup(&self.root, key).is_some()
    }

    /// Sets `key` to `value` unless it already exists, creating intermediate objects.
    ///
    /// Returns `true` if the value was inserted. Nothing is inserted when a path
    /// segment exists but is not an object.
    pub fn set_default(&mut self, key: &str, value: Value) -> bool {
        let mut parts = key.split('.').peekable();
        let mut cursor = &mut self.root;

        while let Some(part) = parts.next() {
            let Some(map) = cursor.as_object_mut() else {
                return false;
            };
            if parts.peek().is_none() {
                if map.contains_key(part) {
                    return false;
                }
                map.insert(part.to_string(), value);
                return true;
            }
            cursor = map
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        false
    }

    fn resolve(&self, key: &str, depth: usize) -> Option<Value> {
        if depth > MAX_EXPANSION_DEPTH {
            tracing::warn!(key, "settings reference chain too deep; treating as missing");
            return None;
        }
        let raw = lookup(&self.root, key)?;
        self.expand(raw, depth)
    }

    fn expand(&self, value: &Value, depth: usize) -> Option<Value> {
        match value {
            Value::Array(items) => Some(Value::Array(
                items
                    .iter()
                    .map(|v| self.expand(v, depth).unwrap_or(Value::Null))
                    .collect(),
            )),
            Value::Object(map) => Some(Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.expand(v, depth).unwrap_or(Value::Null)))
                    .collect(),
            )),
            Value::String(s) => match reference(s) {
                Some(target) => self.resolve(target, depth + 1),
                None => Some(value.clone()),
            },
            other => Some(other.clone()),
        }
    }
}

/// Walks `key` segment by segment through nested objects.
fn lookup<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.')
        .try_fold(root, |value, part| value.as_object()?.get(part))
}

/// Extracts `other.key` from `"${other.key}"`.
fn reference(s: &str) -> Option<&str> {
    s.strip_prefix("${")?.strip_suffix('}')
}

/// Splits `"host:port"` into its parts; `default_port` applies when no port is given.
///
/// # Example
/// ```
/// use servisor::parse_address;
///
/// assert_eq!(parse_address("0.0.0.0:8080", None).unwrap(), ("0.0.0.0".into(), Some(8080)));
/// assert_eq!(parse_address("localhost", Some(80)).unwrap(), ("localhost".into(), Some(80)));
/// assert!(parse_address("localhost:http", None).is_err());
/// ```
pub fn parse_address(
    address: &str,
    default_port: Option<u16>,
) -> Result<(String, Option<u16>), SettingsError> {
    let Some((host, port)) = address.split_once(':') else {
        return Ok((address.to_string(), default_port));
    };
    if port.is_empty() {
        return Ok((host.to_string(), default_port));
    }
    let port = port
        .parse::<u16>()
        .map_err(|e| SettingsError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
    Ok((host.to_string(), Some(port)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Settings {
        Settings::new(json!({
            "http": { "address": "127.0.0.1", "port": 4000 },
            "logger": {
                "address": "${http.address}",
                "targets": ["${http.port}", "stdout", "${nope}"],
                "nested": { "port": "${http.port}" },
            },
            "loop_a": "${loop_b}",
            "loop_b": "${loop_a}",
        }))
    }

    #[test]
    fn test_dotted_lookup() {
        let s = sample();
        assert_eq!(s.get("http.port"), Some(json!(4000)));
        assert_eq!(s.get("http.port.deeper"), None);
        assert!(s.contains("http.address"));
        assert!(!s.contains("http.scheme"));
    }

    #[test]
    fn test_references_expand_recursively() {
        let s = sample();
        assert_eq!(s.get("logger.address"), Some(json!("127.0.0.1")));
        assert_eq!(
            s.get("logger.targets"),
            Some(json!([4000, "stdout", null]))
        );
        assert_eq!(s.get("logger.nested"), Some(json!({ "port": 4000 })));
    }

    #[test]
    fn test_reference_cycle_is_missing() {
        let s = sample();
        assert_eq!(s.get("loop_a"), None);
        assert_eq!(s.get_or("loop_a", json!("fallback")), json!("fallback"));
    }

    #[test]
    fn test_get_as_reports_bad_shape() {
        let s = sample();
        let err = s.get_as::<u16>("http.address").unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { ref key, .. } if key == "http.address"));
        assert_eq!(s.get_as::<u16>("missing").unwrap(), None);
    }

    #[test]
    fn test_set_default() {
        let mut s = sample();
        assert!(!s.set_default("http.port", json!(1)));
        assert_eq!(s.get("http.port"), Some(json!(4000)));

        assert!(s.set_default("db.pool.size", json!(8)));
        assert_eq!(s.get_as::<u32>("db.pool.size").unwrap(), Some(8));

        // `http.port` is a number, so nothing can be nested below it.
        assert!(!s.set_default("http.port.inner", json!(true)));
    }

    #[test]
    fn test_from_json_str() {
        let s = Settings::from_json_str(r#"{"a": {"b": "c"}}"#).unwrap();
        assert_eq!(s.get("a.b"), Some(json!("c")));
        assert!(matches!(
            Settings::from_json_str("{nope"),
            Err(SettingsError::Parse { .. })
        ));
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(
            parse_address("example.org:", Some(443)).unwrap(),
            ("example.org".to_string(), Some(443))
        );
        assert_eq!(
            parse_address("example.org", None).unwrap(),
            ("example.org".to_string(), None)
        );
        assert!(matches!(
            parse_address("h:99999", None),
            Err(SettingsError::InvalidAddress { .. })
        ));
    }
}
