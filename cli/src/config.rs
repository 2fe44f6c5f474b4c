// Configuration management for the meshlane CLI
//
// Cross-platform config stored in:
// - macOS: ~/.config/meshlane/config.json
// - Linux: ~/.config/meshlane/config.json
// - Windows: %APPDATA%\meshlane\config.json

use anyhow::{bail, Context, Result};
use meshlane_core::ReconcilerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Seconds between reconciliation cycles
    pub interval_secs: u64,

    /// Probe packets per peer tunnel address per cycle
    pub probe_count: u32,

    /// Milliseconds between consecutive probes to one address
    pub probe_interval_ms: u64,

    /// Milliseconds to wait for each probe reply
    pub probe_timeout_ms: u64,

    /// Seconds before a wg/ip subprocess call is abandoned
    pub command_timeout_secs: u64,

    /// Directory for rolling daily log files; logs go to stderr when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let core = ReconcilerConfig::default();
        Self {
            interval_secs: core.interval_secs,
            probe_count: core.probe_count,
            probe_interval_ms: core.probe_interval_ms,
            probe_timeout_ms: core.probe_timeout_ms,
            command_timeout_secs: 5,
            log_dir: None,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("meshlane");

        std::fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;

        if config_file.exists() {
            Self::load_from(&config_file)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).context("Failed to read config file")?;
        serde_json::from_str(&contents).context("Failed to parse config file")
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")
    }

    /// Update one key from its string representation
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "interval_secs" => {
                self.interval_secs = value.parse().context("interval_secs must be an integer")?;
            }
            "probe_count" => {
                self.probe_count = value.parse().context("probe_count must be an integer")?;
            }
            "probe_interval_ms" => {
                self.probe_interval_ms = value
                    .parse()
                    .context("probe_interval_ms must be an integer")?;
            }
            "probe_timeout_ms" => {
                self.probe_timeout_ms = value
                    .parse()
                    .context("probe_timeout_ms must be an integer")?;
            }
            "command_timeout_secs" => {
                self.command_timeout_secs = value
                    .parse()
                    .context("command_timeout_secs must be an integer")?;
            }
            "log_dir" => {
                self.log_dir = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            _ => bail!("Unknown config key: {key}"),
        }
        Ok(())
    }

    /// The core reconciler view of this config
    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            interval_secs: self.interval_secs,
            probe_count: self.probe_count,
            probe_interval_ms: self.probe_interval_ms,
            probe_timeout_ms: self.probe_timeout_ms,
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
