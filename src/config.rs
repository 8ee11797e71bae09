//! # Server Configuration
//!
//! JSON configuration file (`murmur.json` by default). Every field has a
//! default, so an empty object is a valid configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors. All fatal at boot.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config: {0}")]
    Read(String),

    /// Config file is not valid JSON
    #[error("invalid config JSON: {0}")]
    Parse(String),

    /// A field value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the subscription endpoint
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Keepalive emission interval in seconds. Absence of inbound traffic
    /// for three intervals closes the connection.
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    /// Seconds a connection may stay uninitialized before it is closed
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,

    /// Outbound frame queue capacity per connection
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Window in seconds within which a repeated queue overflow closes the
    /// connection
    #[serde(default = "default_slow_consumer_window_secs")]
    pub slow_consumer_window_secs: u64,

    /// Maximum live subscriptions per connection
    #[serde(default = "default_max_subscriptions_per_connection")]
    pub max_subscriptions_per_connection: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8090".to_string()
}
fn default_keepalive_interval_secs() -> u64 {
    10
}
fn default_init_timeout_secs() -> u64 {
    10
}
fn default_outbound_queue_capacity() -> usize {
    256
}
fn default_slow_consumer_window_secs() -> u64 {
    30
}
fn default_max_subscriptions_per_connection() -> usize {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            init_timeout_secs: default_init_timeout_secs(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            slow_consumer_window_secs: default_slow_consumer_window_secs(),
            max_subscriptions_per_connection: default_max_subscriptions_per_connection(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;

        let config: ServerConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate field ranges
    pub fn validate(&self) -> ConfigResult<()> {
        if self.keepalive_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "keepalive_interval_secs must be > 0".to_string(),
            ));
        }
        if self.init_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "init_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.outbound_queue_capacity < 16 {
            return Err(ConfigError::Invalid(
                "outbound_queue_capacity must be >= 16".to_string(),
            ));
        }
        // Each affected subscription gets one error frame on overflow; the
        // halved queue must be able to hold them all.
        if self.outbound_queue_capacity / 2 < self.max_subscriptions_per_connection {
            return Err(ConfigError::Invalid(
                "outbound_queue_capacity must be >= 2 * max_subscriptions_per_connection"
                    .to_string(),
            ));
        }
        if self.max_subscriptions_per_connection == 0 {
            return Err(ConfigError::Invalid(
                "max_subscriptions_per_connection must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
