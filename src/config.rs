//! Runtime configuration shared by adapters, the responder and the
//! byte-stream writer.
//!
//! Defaults can be overridden from the environment:
//!
//! - `PANELWIRE_LOG_RPC`: `1`/`true` enables per-envelope debug logging
//! - `PANELWIRE_MAX_CONCURRENT_CALLS`: responder concurrency cap

use std::env;

/// Default maximum number of calls a responder drives at once.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 256;

/// Default maximum number of lines the writer task flushes per write.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 64;

/// Environment variable enabling envelope logging.
pub const ENV_LOG_RPC: &str = "PANELWIRE_LOG_RPC";

/// Default maximum length of one inbound line on a byte-stream channel (8 MiB).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;

/// Environment variable overriding the responder concurrency cap.
pub const ENV_MAX_CONCURRENT_CALLS: &str = "PANELWIRE_MAX_CONCURRENT_CALLS";

/// Configuration for panelwire components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    /// Log every envelope passing through an adapter at `debug` level.
    pub log_messages: bool,
    /// Maximum number of calls a responder drives concurrently.
    pub max_concurrent_calls: usize,
    /// Maximum lines coalesced into one write by the writer task.
    pub max_batch_size: usize,
    /// Inbound lines longer than this are discarded by byte-stream channels.
    pub max_line_length: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            log_messages: false,
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl RpcConfig {
    /// Defaults with environment overrides applied.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(ENV_LOG_RPC) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.log_messages = true,
                "0" | "false" | "no" | "off" | "" => self.log_messages = false,
                other => tracing::warn!("ignoring {}={:?}", ENV_LOG_RPC, other),
            }
        }

        if let Some(raw) = lookup(ENV_MAX_CONCURRENT_CALLS) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.max_concurrent_calls = n,
                _ => tracing::warn!("ignoring {}={:?}", ENV_MAX_CONCURRENT_CALLS, raw),
            }
        }

        self
    }

    /// Enable or disable envelope logging.
    pub fn log_messages(mut self, enabled: bool) -> Self {
        self.log_messages = enabled;
        self
    }

    /// Set the responder concurrency cap.
    pub fn max_concurrent_calls(mut self, limit: usize) -> Self {
        self.max_concurrent_calls = limit;
        self
    }

    /// Set the writer batch size.
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    /// Set the inbound line length limit for byte-stream channels.
    pub fn max_line_length(mut self, length: usize) -> Self {
        self.max_line_length = length.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RpcConfig::default();
        assert!(!config.log_messages);
        assert_eq!(config.max_concurrent_calls, DEFAULT_MAX_CONCURRENT_CALLS);
        assert_eq!(config.max_batch_size, DEFAULT_MAX_BATCH_SIZE);
        assert_eq!(config.max_line_length, DEFAULT_MAX_LINE_LENGTH);
    }

    #[test]
    fn test_env_overrides() {
        let config = RpcConfig::default().with_overrides(lookup(&[
            (ENV_LOG_RPC, "true"),
            (ENV_MAX_CONCURRENT_CALLS, "8"),
        ]));
        assert!(config.log_messages);
        assert_eq!(config.max_concurrent_calls, 8);
    }

    #[test]
    fn test_bad_env_values_are_ignored() {
        let config = RpcConfig::default().with_overrides(lookup(&[
            (ENV_LOG_RPC, "maybe"),
            (ENV_MAX_CONCURRENT_CALLS, "0"),
        ]));
        assert_eq!(config, RpcConfig::default());
    }

    #[test]
    fn test_builder_chaining() {
        let config = RpcConfig::default()
            .log_messages(true)
            .max_concurrent_calls(4)
            .max_batch_size(0)
            .max_line_length(1024);
        assert!(config.log_messages);
        assert_eq!(config.max_line_length, 1024);
        assert_eq!(config.max_concurrent_calls, 4);
        assert_eq!(config.max_batch_size, 1);
    }
}
