//! # Configuration Management Module
//!
//! TOML-backed configuration for the parameter client, organized into
//! logical sections:
//!
//! - [`LinkConfig`] - serial link settings (port, baud rate, handshake)
//! - [`OperationsConfig`] - deadlines and verification behavior
//! - [`ReconnectConfig`] - automatic reconnection policy
//! - [`LoggingConfig`] - log level and optional log file
//!
//! Every field has a sensible default, so a missing file or a partial file
//! both work. CLI arguments override the file where they overlap (port,
//! baud rate, verbosity).
//!
//! ```rust,no_run
//! use px4param::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("baud rate: {}", config.link.baud_rate);
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

/// Baud rates worth offering in docs and validation messages.
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600,
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub operations: OperationsConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial device path. When unset, port discovery picks a candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-read timeout on the serial stream (milliseconds).
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Attempts before `connect()` gives up.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    /// Handshake and liveness heartbeat deadline (seconds).
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationsConfig {
    /// Default deadline for a single read or write (seconds).
    #[serde(default = "default_op_timeout_secs")]
    pub timeout_secs: u64,
    /// Read back every write and compare, unless overridden per call.
    #[serde(default = "default_verify_writes")]
    pub verify_writes: bool,
    /// Quiet window that marks a full parameter list as complete (milliseconds).
    #[serde(default = "default_stable_window_ms")]
    pub stable_window_ms: u64,
    /// Overall deadline for a full list refresh (seconds).
    #[serde(default = "default_list_timeout_secs")]
    pub list_timeout_secs: u64,
    /// A refresh below this count is never considered complete. PX4 boards
    /// carry hundreds of parameters; a handful means a truncated burst.
    #[serde(default = "default_min_expected_params")]
    pub min_expected_params: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_auto")]
    pub auto: bool,
    /// Fixed delay between reopen attempts (seconds).
    #[serde(default = "default_reconnect_backoff_secs")]
    pub backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

fn default_baud_rate() -> u32 {
    115200
}
fn default_io_timeout_ms() -> u64 {
    500
}
fn default_connect_retries() -> u32 {
    3
}
fn default_heartbeat_timeout_secs() -> u64 {
    10
}
fn default_op_timeout_secs() -> u64 {
    10
}
fn default_verify_writes() -> bool {
    true
}
fn default_stable_window_ms() -> u64 {
    1000
}
fn default_list_timeout_secs() -> u64 {
    20
}
fn default_min_expected_params() -> usize {
    100
}
fn default_reconnect_auto() -> bool {
    true
}
fn default_reconnect_backoff_secs() -> u64 {
    2
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            io_timeout_ms: default_io_timeout_ms(),
            connect_retries: default_connect_retries(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
        }
    }
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_op_timeout_secs(),
            verify_writes: default_verify_writes(),
            stable_window_ms: default_stable_window_ms(),
            list_timeout_secs: default_list_timeout_secs(),
            min_expected_params: default_min_expected_params(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            auto: default_reconnect_auto(),
            backoff_secs: default_reconnect_backoff_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl LinkConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

impl OperationsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stable_window(&self) -> Duration {
        Duration::from_millis(self.stable_window_ms)
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs)
    }
}

impl ReconnectConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

impl Config {
    /// Load configuration from a file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file.
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_BAUD_RATES.contains(&self.link.baud_rate) {
            return Err(anyhow!(
                "Unsupported baud rate {}; expected one of {:?}",
                self.link.baud_rate,
                SUPPORTED_BAUD_RATES
            ));
        }
        if self.link.io_timeout_ms == 0 {
            return Err(anyhow!("link.io_timeout_ms must be greater than zero"));
        }
        if self.link.connect_retries == 0 {
            return Err(anyhow!("link.connect_retries must be at least 1"));
        }
        if self.operations.stable_window_ms == 0 {
            return Err(anyhow!(
                "operations.stable_window_ms must be greater than zero"
            ));
        }
        if self.operations.timeout_secs == 0 || self.operations.list_timeout_secs == 0 {
            return Err(anyhow!("operation timeouts must be greater than zero"));
        }
        Ok(())
    }
}
