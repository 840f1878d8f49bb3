//! Configuration sections
//!
//! A [`ConfigSection`] is a read-only view of one configuration subtree with
//! typed accessors. Lookups take dot-separated paths (`"gitlab.host"`) and
//! never fail: a missing key is an empty section, and the `*_or` accessors
//! fall back to the supplied default.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigurationError;

/// Immutable configuration subtree.
///
/// Cloning is cheap; the underlying document is shared.
#[derive(Clone, PartialEq)]
pub struct ConfigSection {
    value: Arc<Value>,
}

impl ConfigSection {
    /// Wrap a configuration document.
    pub fn new(value: Value) -> Self {
        Self {
            value: Arc::new(value),
        }
    }

    /// An empty section: every lookup misses.
    pub fn empty() -> Self {
        Self::new(Value::Null)
    }

    /// Parse a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(raw)
            .map(Self::new)
            .map_err(|e| ConfigurationError::invalid("<document>", e))
    }

    fn lookup(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(&self.value);
        }
        path.split('.').try_fold(self.value.as_ref(), |node, key| match node {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    /// Subtree at `path`. Missing paths yield an empty section.
    pub fn get(&self, path: &str) -> ConfigSection {
        if path.is_empty() {
            return self.clone();
        }
        match self.lookup(path) {
            Some(value) => Self::new(value.clone()),
            None => Self::empty(),
        }
    }

    /// Whether `path` is present and not `null`.
    pub fn exists(&self, path: &str) -> bool {
        !matches!(self.lookup(path), None | Some(Value::Null))
    }

    /// Whether this section holds nothing.
    pub fn is_empty(&self) -> bool {
        match self.value.as_ref() {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Raw JSON value of this section.
    pub fn as_value(&self) -> &Value {
        &self.value
    }

    /// String at `path`.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.lookup(path).and_then(Value::as_str)
    }

    /// String at `path`, or `default`.
    pub fn get_string_or(&self, path: &str, default: &str) -> String {
        self.get_str(path).unwrap_or(default).to_string()
    }

    /// Integer at `path`. Integral strings such as `"10"` are accepted.
    pub fn get_i64(&self, path: &str) -> Option<i64> {
        match self.lookup(path)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Integer at `path`, or `default`.
    pub fn get_int_or(&self, path: &str, default: i64) -> i64 {
        self.get_i64(path).unwrap_or(default)
    }

    /// Boolean at `path`, or `default`.
    ///
    /// `"true"`/`"false"` strings are accepted.
    pub fn get_bool_or(&self, path: &str, default: bool) -> bool {
        match self.lookup(path) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Millisecond duration at `path`, or `default`. Negative values clamp to zero.
    pub fn get_duration_ms_or(&self, path: &str, default: Duration) -> Duration {
        self.get_i64(path)
            .map(|ms| Duration::from_millis(ms.max(0) as u64))
            .unwrap_or(default)
    }

    /// String elements of the array at `path`; non-strings are skipped.
    pub fn get_array_string(&self, path: &str) -> Vec<String> {
        match self.lookup(path) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Child sections of the object at `path`, by key.
    pub fn get_map(&self, path: &str) -> BTreeMap<String, ConfigSection> {
        match self.lookup(path) {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| (k.clone(), ConfigSection::new(v.clone())))
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    /// Deserialize the whole section into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ConfigurationError> {
        T::deserialize(self.value.as_ref()).map_err(|e| ConfigurationError::invalid("<section>", e))
    }
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for ConfigSection {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for ConfigSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigSection({})", self.value)
    }
}

impl fmt::Display for ConfigSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn sample() -> ConfigSection {
        ConfigSection::new(json!({
            "bus": { "adapter": "memory", "backlog_warn": 16 },
            "consulSensor": {
                "consul": ["server1", "server2", 7],
                "interval": "10"
            },
            "gocd": {
                "host": "http://gocd",
                "pipelines": {
                    "repo-a": { "ref": "master", "pipeline": "a" },
                    "repo-b": { "ref": "dev", "pipeline": "b" }
                }
            },
            "flags": { "enabled": true, "dry_run": "false" },
            "nothing": null
        }))
    }

    #[test]
    fn test_nested_lookup() {
        let cfg = sample();
        assert_eq!(cfg.get_str("bus.adapter"), Some("memory"));
        assert_eq!(cfg.get("bus").get_int_or("backlog_warn", 0), 16);
        assert_eq!(cfg.get_string_or("gocd.pipelines.repo-a.pipeline", ""), "a");
    }

    #[test]
    fn test_missing_paths_fall_back() {
        let cfg = sample();
        assert_eq!(cfg.get_string_or("bus.url", "redis://x"), "redis://x");
        assert_eq!(cfg.get_int_or("gocd.timeout", 30), 30);
        assert!(cfg.get("unknown").is_empty());
        assert!(cfg.get("unknown.deeper").get("again").is_empty());
    }

    #[test]
    fn test_exists() {
        let cfg = sample();
        assert!(cfg.exists("bus"));
        assert!(cfg.exists("flags.enabled"));
        assert!(!cfg.exists("nothing"));
        assert!(!cfg.exists("bus.url"));
    }

    #[test]
    fn test_integral_strings() {
        let cfg = sample();
        assert_eq!(cfg.get_i64("consulSensor.interval"), Some(10));
        assert_eq!(cfg.get_i64("bus.adapter"), None);
    }

    #[test]
    fn test_bools() {
        let cfg = sample();
        assert!(cfg.get_bool_or("flags.enabled", false));
        assert!(!cfg.get_bool_or("flags.dry_run", true));
        assert!(cfg.get_bool_or("flags.missing", true));
    }

    #[test]
    fn test_array_string_skips_non_strings() {
        let cfg = sample();
        assert_eq!(
            cfg.get_array_string("consulSensor.consul"),
            vec!["server1".to_string(), "server2".to_string()]
        );
        assert!(cfg.get_array_string("bus").is_empty());
        assert_eq!(cfg.get_str("consulSensor.consul.1"), Some("server2"));
    }

    #[test]
    fn test_map() {
        let cfg = sample();
        let pipelines = cfg.get_map("gocd.pipelines");
        assert_eq!(pipelines.len(), 2);
        assert_eq!(pipelines["repo-b"].get_str("ref"), Some("dev"));
    }

    #[test]
    fn test_durations() {
        let cfg = ConfigSection::new(json!({ "delay_ms": 250, "negative": -5 }));
        assert_eq!(
            cfg.get_duration_ms_or("delay_ms", Duration::ZERO),
            Duration::from_millis(250)
        );
        assert_eq!(cfg.get_duration_ms_or("negative", Duration::from_secs(1)), Duration::ZERO);
        assert_eq!(
            cfg.get_duration_ms_or("missing", Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_deserialize_section() {
        #[derive(Debug, Deserialize)]
        struct Bus {
            adapter: String,
            backlog_warn: usize,
        }

        let bus: Bus = sample().get("bus").deserialize().unwrap();
        assert_eq!(bus.adapter, "memory");
        assert_eq!(bus.backlog_warn, 16);

        let err = sample().get("flags").deserialize::<Bus>().unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }

    #[test]
    fn test_from_json_str() {
        let cfg = ConfigSection::from_json_str(r#"{"timer": {"interval": 2}}"#).unwrap();
        assert_eq!(cfg.get_int_or("timer.interval", 1), 2);
        assert!(ConfigSection::from_json_str("{not json").is_err());
    }
}
