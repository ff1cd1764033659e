//! Application settings

use crate::core::monitor::MonitorConfig;
use crate::core::probe::ProbeConfig;
use crate::core::transport::OpenOptions;
use crate::utils::autoconnect::AutoConnectConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Database location
    pub storage: StorageConfig,
    /// Connector defaults
    pub connector: ConnectorSettings,
    /// Listener and session settings
    pub monitor: MonitorSettings,
    /// Reachability testing
    pub probe: ProbeSettings,
    /// Logging settings
    pub logging: LoggingConfig,
    /// Auto-connect after device import
    pub autoconnect: AutoConnectSettings,
}

impl AppConfig {
    /// Load config from the default location
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// `Config` when the file exists but cannot be read or parsed
    pub fn load() -> Result<Self> {
        let path = super::config_file()
            .ok_or_else(|| Error::Config("could not determine config directory".into()))?;
        Self::load_from(&path)
    }

    /// Load config from an explicit path
    ///
    /// # Errors
    ///
    /// `Config` when the file exists but cannot be read or parsed
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Save config to the default location
    ///
    /// # Errors
    ///
    /// `Config` when the directory is unknown, `Io` when the write fails
    pub fn save(&self) -> Result<()> {
        let path = super::config_file()
            .ok_or_else(|| Error::Config("could not determine config directory".into()))?;
        self.save_to(&path)
    }

    /// Save config to an explicit path
    ///
    /// # Errors
    ///
    /// `Config` on serialization failure, `Io` when the write fails
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Database path, falling back to the platform data directory
    ///
    /// # Errors
    ///
    /// `Config` when neither is available
    pub fn db_path(&self) -> Result<PathBuf> {
        self.storage
            .db_path
            .clone()
            .or_else(super::default_db_path)
            .ok_or_else(|| Error::Config("no database path configured".into()))
    }
}

/// Storage settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub db_path: Option<PathBuf>,
}

/// Connector defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorSettings {
    /// Open timeout (milliseconds)
    pub connect_timeout_ms: u64,
    /// Wait for a reply after a one-shot send (milliseconds)
    pub reply_timeout_ms: u64,
    /// Append `\n` to socket and serial sends
    pub append_newline: bool,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3000,
            reply_timeout_ms: 1000,
            append_newline: false,
        }
    }
}

impl ConnectorSettings {
    /// Open options carrying these defaults
    pub fn open_options(&self) -> OpenOptions {
        OpenOptions::default()
            .connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .append_newline(self.append_newline)
    }

    /// Reply wait as a duration
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

/// Monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Read slice for session tasks (milliseconds)
    pub poll_interval_ms: u64,
    /// Events buffered per subscriber
    pub event_capacity: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        let defaults = MonitorConfig::default();
        Self {
            poll_interval_ms: u64::try_from(defaults.poll_interval.as_millis()).unwrap_or(50),
            event_capacity: defaults.event_capacity,
        }
    }
}

impl From<&AppConfig> for MonitorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.monitor.poll_interval_ms.max(1)),
            event_capacity: config.monitor.event_capacity.max(1),
            connect_timeout: Duration::from_millis(config.connector.connect_timeout_ms),
        }
    }
}

/// Probe settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Per-device timeout (milliseconds)
    pub timeout_ms: u64,
    /// Devices tested at once
    pub concurrency: usize,
    /// Text written after a successful open
    pub payload: Option<String>,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            concurrency: 8,
            payload: None,
        }
    }
}

impl From<&ProbeSettings> for ProbeConfig {
    fn from(settings: &ProbeSettings) -> Self {
        Self {
            timeout: Duration::from_millis(settings.timeout_ms),
            concurrency: settings.concurrency.max(1),
            probe_payload: settings.payload.as_ref().map(|p| p.as_bytes().to_vec()),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

/// Auto-connect settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoConnectSettings {
    /// Delay between attempts (milliseconds)
    pub delay_ms: u64,
    /// Attempts per device
    pub max_attempts: u32,
}

impl Default for AutoConnectSettings {
    fn default() -> Self {
        Self {
            delay_ms: 500,
            max_attempts: 1,
        }
    }
}

impl From<&AutoConnectSettings> for AutoConnectConfig {
    fn from(settings: &AutoConnectSettings) -> Self {
        Self {
            delay: Duration::from_millis(settings.delay_ms),
            max_attempts: settings.max_attempts.max(1),
        }
    }
}
