//! Configuration management for iphone-monitor.
//!
//! Settings come from built-in defaults, an optional TOML file, and a couple
//! of environment variables, in increasing order of precedence. Command-line
//! flags are applied on top by the binary.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Serial port used by the reference wiring.
pub const DEFAULT_PORT: &str = "/dev/cu.usbserial-1120";

/// Environment variable overriding [`SerialConfig::port`].
pub const PORT_ENV: &str = "IPHONE_MONITOR_PORT";

/// Environment variable overriding [`Config::log_level`].
pub const LOG_ENV: &str = "IPHONE_MONITOR_LOG";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub handshake: HandshakeConfig,
    pub monitor: MonitorConfig,

    /// Default log level when RUST_LOG is unset
    pub log_level: LogLevel,
}

/// Log level wrapper so an absent key still defaults to "info".
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(transparent)]
pub struct LogLevel(pub String);

impl Default for LogLevel {
    fn default() -> Self {
        Self("info".to_string())
    }
}

/// Serial link to the microcontroller.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 1_000,
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Timing of the startup handshake.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Wait after opening the port, while the microcontroller resets
    pub settle_delay_ms: u64,

    /// Budget shared by both waiting phases
    pub deadline_secs: u64,

    /// Poll interval while waiting for READY
    pub ready_poll_ms: u64,

    /// Poll interval while waiting for the confirmation line
    pub confirm_poll_ms: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 2_000,
            deadline_secs: 30,
            ready_poll_ms: 500,
            confirm_poll_ms: 100,
        }
    }
}

impl HandshakeConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms)
    }

    pub fn confirm_poll(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_ms)
    }
}

/// Steady-state monitoring loop.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    pub error_backoff_ms: u64,

    /// Probe once before the loop instead of assuming the phone is present
    pub probe_on_start: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            error_backoff_ms: 1_000,
            probe_on_start: false,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

impl Config {
    /// Load defaults, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml(&text)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply overrides from a variable lookup (normally the process
    /// environment). Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(PORT_ENV).filter(|v| !v.is_empty()) {
            self.serial.port = port;
        }
        if let Some(level) = lookup(LOG_ENV).filter(|v| !v.is_empty()) {
            self.log_level = LogLevel(level);
        }
    }

    /// Reject settings the loop and handshake cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.trim().is_empty() {
            return Err(Error::Config("serial port must not be empty".to_string()));
        }
        let non_zero = [
            ("serial.baud_rate", u64::from(self.serial.baud_rate)),
            ("serial.read_timeout_ms", self.serial.read_timeout_ms),
            ("handshake.deadline_secs", self.handshake.deadline_secs),
            ("handshake.ready_poll_ms", self.handshake.ready_poll_ms),
            ("handshake.confirm_poll_ms", self.handshake.confirm_poll_ms),
            ("monitor.poll_interval_ms", self.monitor.poll_interval_ms),
            ("monitor.error_backoff_ms", self.monitor.error_backoff_ms),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(Error::Config(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }
}
