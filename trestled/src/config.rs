//! Configuration file handling for trestled.

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
pub struct BridgeConfig {
    /// Broker endpoint, e.g. `mem://local`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Topic to subscribe to.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Client identity presented to the broker.
    #[serde(default = "default_identity")]
    pub identity: String,

    /// Extra sink write attempts for a retryable unit.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Stop after processing this many units; unset runs until shutdown.
    pub message_limit: Option<u64>,

    /// Stop after this long without a message, in milliseconds.
    pub idle_timeout_ms: Option<u64>,

    /// Buffered capacity of the success and failure outlets.
    #[serde(default = "default_outlet_capacity")]
    pub outlet_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            topic: default_topic(),
            identity: default_identity(),
            retry_count: default_retry_count(),
            message_limit: None,
            idle_timeout_ms: None,
            outlet_capacity: default_outlet_capacity(),
        }
    }
}

fn default_endpoint() -> String {
    "mem://local".to_string()
}

fn default_topic() -> String {
    "events".to_string()
}

fn default_identity() -> String {
    "trestled".to_string()
}

fn default_retry_count() -> u32 {
    3
}

fn default_outlet_capacity() -> usize {
    64
}

#[derive(Debug, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound on the reconnect delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Give up after this many reconnect attempts; unset retries forever.
    pub max_attempts: Option<u32>,

    /// Randomize delays to avoid synchronized reconnect storms.
    #[serde(default)]
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: None,
            jitter: false,
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    30_000
}

#[derive(Debug, Default, Deserialize)]
pub struct SinkConfig {
    /// Where delivered payloads are written.
    #[serde(default)]
    pub kind: SinkKind,

    /// Output path, required when `kind = "file"`.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Stdout,
    File,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter, e.g. `info` or `trestle_bridge=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.bridge.endpoint, "mem://local");
        assert_eq!(config.bridge.topic, "events");
        assert_eq!(config.bridge.retry_count, 3);
        assert_eq!(config.bridge.message_limit, None);
        assert_eq!(config.backoff.initial_delay_ms, 100);
        assert_eq!(config.backoff.max_attempts, None);
        assert_eq!(config.sink.kind, SinkKind::Stdout);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn full_config_parses() {
        let config: Config = toml::from_str(
            r#"
            [bridge]
            endpoint = "mem://orders"
            topic = "orders/created"
            identity = "billing"
            retry_count = 5
            message_limit = 1000
            idle_timeout_ms = 2500

            [backoff]
            initial_delay_ms = 50
            max_delay_ms = 5000
            max_attempts = 8
            jitter = true

            [sink]
            kind = "file"
            path = "/var/log/trestle/orders.log"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.bridge.endpoint, "mem://orders");
        assert_eq!(config.bridge.topic, "orders/created");
        assert_eq!(config.bridge.identity, "billing");
        assert_eq!(config.bridge.retry_count, 5);
        assert_eq!(config.bridge.message_limit, Some(1000));
        assert_eq!(config.bridge.idle_timeout_ms, Some(2500));
        assert_eq!(config.backoff.max_attempts, Some(8));
        assert!(config.backoff.jitter);
        assert_eq!(config.sink.kind, SinkKind::File);
        assert_eq!(config.sink.path.as_deref(), Some("/var/log/trestle/orders.log"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn unknown_sink_kind_is_rejected() {
        let result: Result<Config, _> = toml::from_str("[sink]\nkind = \"socket\"\n");
        assert!(result.is_err());
    }
}
