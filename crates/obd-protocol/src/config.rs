//! Link configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Factory baud rate of most ELM327 adapters
pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// Baud rate programmed by [`crate::ObdClient::switch_to_high_baud`]
pub const HIGH_BAUD_RATE: u32 = 115200;

/// Serial link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial port device path (e.g., "/dev/ttyUSB0" or "COM3")
    pub port: String,

    /// Baud rate; must match what the adapter has persisted
    pub baud_rate: u32,

    /// Bound on each handshake step, echo and reply (milliseconds)
    pub command_timeout_ms: u64,

    /// Bound on each read while draining leftover lines (milliseconds)
    pub flush_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: default_port().to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            command_timeout_ms: 1000,
            flush_timeout_ms: 100,
        }
    }
}

impl LinkConfig {
    /// Default settings for `port`
    pub fn for_port(port: &str) -> Self {
        Self {
            port: port.to_string(),
            ..Default::default()
        }
    }

    /// Settings for an adapter already switched to [`HIGH_BAUD_RATE`]
    pub fn high_speed(port: &str) -> Self {
        Self {
            baud_rate: HIGH_BAUD_RATE,
            ..Self::for_port(port)
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

#[cfg(windows)]
fn default_port() -> &'static str {
    "COM3"
}

#[cfg(not(windows))]
fn default_port() -> &'static str {
    "/dev/ttyUSB0"
}
