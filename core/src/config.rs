//! Reconciler configuration
//!
//! Plain data carried from the embedding binary into the control loop.
//! Validation happens once at service construction, not per cycle.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by configuration validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for the reconciliation loop and the latency prober.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Seconds between reconciliation cycles.
    pub interval_secs: u64,
    /// Probe packets sent to each peer tunnel address per cycle.
    pub probe_count: u32,
    /// Milliseconds between consecutive probes to the same address.
    pub probe_interval_ms: u64,
    /// Milliseconds to wait for each individual probe reply.
    pub probe_timeout_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1,
            probe_count: 4,
            probe_interval_ms: 200,
            probe_timeout_ms: 1000,
        }
    }
}

impl ReconcilerConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "interval_secs must be at least 1".to_string(),
            ));
        }
        if self.probe_count == 0 {
            return Err(ConfigError::Invalid(
                "probe_count must be at least 1".to_string(),
            ));
        }
        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "probe_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Cycle period as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Spacing between probes to one address.
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Reply deadline for a single probe.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ReconcilerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = ReconcilerConfig {
            interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_probe_count_rejected() {
        let config = ReconcilerConfig {
            probe_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_probe_timeout_rejected() {
        let config = ReconcilerConfig {
            probe_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_helpers() {
        let config = ReconcilerConfig {
            interval_secs: 5,
            probe_count: 4,
            probe_interval_ms: 250,
            probe_timeout_ms: 900,
        };
        assert_eq!(config.interval(), Duration::from_secs(5));
        assert_eq!(config.probe_interval(), Duration::from_millis(250));
        assert_eq!(config.probe_timeout(), Duration::from_millis(900));
    }
}
