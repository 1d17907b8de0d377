//! Configuration management for the quote feed.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Broker endpoint and credentials
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Streaming session behaviour
    #[serde(default)]
    pub stream: StreamConfig,
    /// Exchange session calendar
    #[serde(default)]
    pub market_hours: MarketHoursConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// API root, e.g. https://api.tradestation.com/v2
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// OAuth bearer token passed as the `access_token` query parameter
    #[serde(default)]
    pub access_token: String,
    /// Total timeout for non-streaming requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// TCP + TLS establishment timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Quiet period after the last subscription change before the stream is
    /// rebuilt
    #[serde(default = "default_debounce")]
    pub debounce_secs: u64,
    /// Maximum time without a byte from the broker before the session is
    /// considered dead
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Delay before reconnecting while at least one market is open
    #[serde(default = "default_fault_backoff")]
    pub fault_backoff_secs: u64,
    /// Delay before reconnecting while every subscribed market is closed
    #[serde(default = "default_market_closed_wait")]
    pub market_closed_wait_secs: u64,
    /// Ticks buffered between the reader and the consumer
    #[serde(default = "default_tick_buffer")]
    pub tick_buffer: usize,
    /// Largest single frame accepted from the stream
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MarketHoursConfig {
    /// Count pre/post-market as open for equities
    #[serde(default)]
    pub extended_hours: bool,
}

// Default value functions
fn default_base_url() -> String {
    "https://api.tradestation.com/v2".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_debounce() -> u64 {
    5
}

fn default_idle_timeout() -> u64 {
    180 // 3 minutes without a frame
}

fn default_fault_backoff() -> u64 {
    5
}

fn default_market_closed_wait() -> u64 {
    30 * 60
}

fn default_tick_buffer() -> usize {
    10_000
}

fn default_max_frame_bytes() -> usize {
    1024 * 1024
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("TSF"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.broker.base_url.starts_with("http://")
                || self.broker.base_url.starts_with("https://"),
            "broker.base_url must be an http(s) URL"
        );

        anyhow::ensure!(
            self.broker.request_timeout_secs > 0 && self.broker.connect_timeout_secs > 0,
            "broker timeouts must be greater than zero"
        );

        anyhow::ensure!(
            self.stream.debounce_secs > 0
                && self.stream.idle_timeout_secs > 0
                && self.stream.fault_backoff_secs > 0,
            "stream intervals must be greater than zero"
        );

        anyhow::ensure!(
            self.stream.market_closed_wait_secs >= self.stream.fault_backoff_secs,
            "market_closed_wait_secs must be >= fault_backoff_secs"
        );

        anyhow::ensure!(
            self.stream.tick_buffer > 0 && self.stream.max_frame_bytes > 0,
            "tick_buffer and max_frame_bytes must be greater than zero"
        );

        Ok(())
    }

    /// Copy with the access token masked, for logging.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.broker.access_token.is_empty() {
            copy.broker.access_token = "***".to_string();
        }
        copy
    }
}

impl StreamConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn fault_backoff(&self) -> Duration {
        Duration::from_secs(self.fault_backoff_secs)
    }

    pub fn market_closed_wait(&self) -> Duration {
        Duration::from_secs(self.market_closed_wait_secs)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            access_token: String::new(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            debounce_secs: default_debounce(),
            idle_timeout_secs: default_idle_timeout(),
            fault_backoff_secs: default_fault_backoff(),
            market_closed_wait_secs: default_market_closed_wait(),
            tick_buffer: default_tick_buffer(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stream.debounce(), Duration::from_secs(5));
        assert_eq!(config.stream.market_closed_wait(), Duration::from_secs(1800));
    }

    #[test]
    fn test_closed_wait_shorter_than_backoff_rejected() {
        let mut config = Config::default();
        config.stream.market_closed_wait_secs = 1;
        config.stream.fault_backoff_secs = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redacted_masks_token() {
        let mut config = Config::default();
        config.broker.access_token = "secret".to_string();
        assert_eq!(config.redacted().broker.access_token, "***");
        assert_eq!(config.broker.access_token, "secret");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                "[stream]\ndebounce_secs = 2\n[broker]\naccess_token = \"abc\"",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.stream.debounce_secs, 2);
        assert_eq!(config.stream.idle_timeout_secs, 180);
        assert_eq!(config.broker.access_token, "abc");
        assert_eq!(config.broker.base_url, "https://api.tradestation.com/v2");
    }
}
