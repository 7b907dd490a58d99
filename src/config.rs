//! # Framework configuration.
//!
//! [`FrameworkConfig`] is built from the opaque string→string map handed to
//! [`Framework::new`](crate::Framework::new). The framework recognizes a small
//! set of keys and preserves everything else verbatim; unknown keys stay
//! queryable through [`BundleContext::property`](crate::BundleContext::property).
//!
//! # Example
//! ```
//! use std::collections::HashMap;
//! use std::time::Duration;
//! use bundlevisor::{FrameworkConfig, LogLevel, FRAMEWORK_STARTSTOP_TIMEOUT_MS};
//!
//! let mut props = HashMap::new();
//! props.insert(FRAMEWORK_STARTSTOP_TIMEOUT_MS.to_string(), "50".to_string());
//! props.insert("my.embedding.key".to_string(), "kept".to_string());
//!
//! let cfg = FrameworkConfig::from_properties(props);
//! assert_eq!(cfg.start_stop_timeout, Duration::from_millis(50));
//! assert_eq!(cfg.log_level, LogLevel::Error);
//! assert_eq!(cfg.property("my.embedding.key"), Some("kept"));
//! ```

use std::collections::HashMap;
use std::time::Duration;

/// Property key for the numeric log level: 0 = debug, 1 = info, 2 = warning,
/// 3 = error (default).
pub const FRAMEWORK_LOG_LEVEL: &str = "framework.log.level";

/// Property key for the start/stop activator budget in milliseconds.
/// `0` (the default) means unbounded.
pub const FRAMEWORK_STARTSTOP_TIMEOUT_MS: &str = "framework.startstop.timeout.ms";

/// Property key for the worker keep-alive in milliseconds: how long an idle
/// bundle worker lingers before retiring itself.
pub const FRAMEWORK_WORKER_KEEPALIVE_MS: &str = "framework.worker.keepalive.ms";

/// Verbosity threshold requested through [`FRAMEWORK_LOG_LEVEL`].
///
/// The framework emits its diagnostics through `tracing`; this value is
/// exposed so the embedding layer can configure its subscriber filter to
/// match what the framework properties asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn from_num(n: u64) -> Option<LogLevel> {
        match n {
            0 => Some(LogLevel::Debug),
            1 => Some(LogLevel::Info),
            2 => Some(LogLevel::Warning),
            3 => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Global configuration for a framework instance.
#[derive(Clone, Debug)]
pub struct FrameworkConfig {
    /// Requested diagnostic verbosity.
    pub log_level: LogLevel,
    /// Wall-clock budget for one activator `start`/`stop` call (0 = unbounded).
    pub start_stop_timeout: Duration,
    /// Idle time before a bundle worker retires itself.
    pub keep_alive: Duration,
    properties: HashMap<String, String>,
}

impl FrameworkConfig {
    /// Builds a configuration from framework properties.
    ///
    /// Recognized keys are parsed; malformed values fall back to the default
    /// for that key. The whole map, recognized or not, is preserved.
    pub fn from_properties(properties: HashMap<String, String>) -> Self {
        let parse_u64 = |key: &str| properties.get(key).and_then(|v| v.parse::<u64>().ok());

        let log_level = parse_u64(FRAMEWORK_LOG_LEVEL)
            .and_then(LogLevel::from_num)
            .unwrap_or(LogLevel::Error);
        let start_stop_timeout = parse_u64(FRAMEWORK_STARTSTOP_TIMEOUT_MS)
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO);
        let keep_alive = parse_u64(FRAMEWORK_WORKER_KEEPALIVE_MS)
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(1000));

        Self {
            log_level,
            start_stop_timeout,
            keep_alive,
            properties,
        }
    }

    /// Looks up a framework property by key.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Returns the full property map, unknown keys included.
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }
}

impl Default for FrameworkConfig {
    /// Provides a default configuration:
    /// - `log_level = Error`
    /// - `start_stop_timeout = 0` (unbounded)
    /// - `keep_alive = 1s`
    fn default() -> Self {
        Self::from_properties(HashMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_on_empty_map() {
        let cfg = FrameworkConfig::default();
        assert_eq!(cfg.log_level, LogLevel::Error);
        assert_eq!(cfg.start_stop_timeout, Duration::ZERO);
        assert_eq!(cfg.keep_alive, Duration::from_millis(1000));
    }

    #[test]
    fn recognized_keys_are_parsed() {
        let mut props = HashMap::new();
        props.insert(FRAMEWORK_LOG_LEVEL.to_string(), "1".to_string());
        props.insert(FRAMEWORK_STARTSTOP_TIMEOUT_MS.to_string(), "250".to_string());
        props.insert(FRAMEWORK_WORKER_KEEPALIVE_MS.to_string(), "100".to_string());
        let cfg = FrameworkConfig::from_properties(props);
        assert_eq!(cfg.log_level, LogLevel::Info);
        assert_eq!(cfg.start_stop_timeout, Duration::from_millis(250));
        assert_eq!(cfg.keep_alive, Duration::from_millis(100));
    }

    #[test]
    fn malformed_values_fall_back() {
        let mut props = HashMap::new();
        props.insert(FRAMEWORK_LOG_LEVEL.to_string(), "verbose".to_string());
        let cfg = FrameworkConfig::from_properties(props);
        assert_eq!(cfg.log_level, LogLevel::Error);
    }

    #[test]
    fn unknown_keys_are_preserved() {
        let mut props = HashMap::new();
        props.insert("embedding.flag".to_string(), "on".to_string());
        let cfg = FrameworkConfig::from_properties(props);
        assert_eq!(cfg.property("embedding.flag"), Some("on"));
        assert_eq!(cfg.property("missing"), None);
    }
}
