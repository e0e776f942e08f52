//! Client configuration
//!
//! Every field has a default matching the device's documented ports and
//! timing, so an empty YAML document is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::types::Salinity;
use crate::{Result, SonarError};

/// UDP port the device broadcasts availability beacons on.
pub const DEFAULT_BEACON_PORT: u16 = 56124;
/// TCP port of the device command channel.
pub const DEFAULT_COMMAND_PORT: u16 = 56888;

/// Configuration shared by the availability listener and the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Beacon listening port
    pub beacon_port: u16,
    /// Device command port
    pub command_port: u16,
    /// Local frame stream port (0 picks an ephemeral port)
    pub frame_port: u16,
    /// Silence after which a device is considered gone
    pub availability_timeout_ms: u64,
    /// Period of the registry and state machine ticks
    pub tick_interval_ms: u64,
    /// Backoff increment after each failed connection attempt
    pub backoff_step_ms: u64,
    /// Backoff ceiling
    pub backoff_ceiling_ms: u64,
    /// Upper bound on a single TCP connect plus handshake
    pub connect_timeout_ms: u64,
    /// Upper bound on reading one command response
    pub response_timeout_ms: u64,
    /// Idle time before the first keep-alive probe
    pub keepalive_time_ms: u64,
    /// Interval between keep-alive probes
    pub keepalive_interval_ms: u64,
    /// Unanswered probes before the connection is dropped
    pub keepalive_retries: u32,
    /// How long `stop()` waits for a worker to acknowledge
    pub shutdown_timeout_ms: u64,
    /// Water type reported in the initialize handshake
    pub salinity: Salinity,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            beacon_port: DEFAULT_BEACON_PORT,
            command_port: DEFAULT_COMMAND_PORT,
            frame_port: 0,
            availability_timeout_ms: 5000,
            tick_interval_ms: 1000,
            backoff_step_ms: 1000,
            backoff_ceiling_ms: 5000,
            connect_timeout_ms: 3000,
            response_timeout_ms: 3000,
            keepalive_time_ms: 5000,
            keepalive_interval_ms: 1000,
            keepalive_retries: 3,
            shutdown_timeout_ms: 2000,
            salinity: Salinity::Seawater,
        }
    }
}

impl ClientConfig {
    /// Parse a configuration from YAML and validate it.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: ClientConfig = if yaml.trim().is_empty() {
            ClientConfig::default()
        } else {
            serde_yaml_ng::from_str(yaml)
                .map_err(|e| SonarError::ConfigFormat { details: e.to_string() })?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|source| SonarError::Config { path: path.to_path_buf(), source })?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_yaml_str(&yaml)
    }

    /// Reject timing combinations that break availability or backoff guarantees.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 || self.tick_interval_ms >= self.availability_timeout_ms {
            return Err(SonarError::ConfigFormat {
                details: format!(
                    "tick_interval_ms ({}) must be non-zero and below availability_timeout_ms ({})",
                    self.tick_interval_ms, self.availability_timeout_ms
                ),
            });
        }
        if self.backoff_step_ms == 0 {
            return Err(SonarError::ConfigFormat {
                details: "backoff_step_ms must be non-zero".to_string(),
            });
        }
        if self.backoff_ceiling_ms < self.backoff_step_ms {
            return Err(SonarError::ConfigFormat {
                details: format!(
                    "backoff_ceiling_ms ({}) is below backoff_step_ms ({})",
                    self.backoff_ceiling_ms, self.backoff_step_ms
                ),
            });
        }
        if self.connect_timeout_ms == 0 || self.response_timeout_ms == 0 {
            return Err(SonarError::ConfigFormat {
                details: "connect and response timeouts must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn availability_timeout(&self) -> Duration {
        Duration::from_millis(self.availability_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_step_ms)
    }

    pub fn backoff_ceiling(&self) -> Duration {
        Duration::from_millis(self.backoff_ceiling_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn keepalive_time(&self) -> Duration {
        Duration::from_millis(self.keepalive_time_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
