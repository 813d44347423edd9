//! Daemon configuration management

use crate::settings::FrequencyStore;
use crate::usb::pacing::{DEFAULT_FREQUENCY_HZ, MAX_FREQUENCY_HZ, MIN_FREQUENCY_HZ};
use crate::usb::{SessionConfig, is_valid_frequency};
use anyhow::{Context, Result, anyhow};
use protocol::TimerGranularity;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub daemon: DaemonSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonSettings {
    pub log_level: String,
    /// Seconds between device rescans (0 = only at startup)
    #[serde(default = "DaemonSettings::default_rescan_interval")]
    pub rescan_interval_secs: u64,
}

impl DaemonSettings {
    fn default_rescan_interval() -> u64 {
        2
    }
}

/// DMX output configuration
///
/// # Example Configuration
/// ```toml
/// [output]
/// frequency_hz = 44.0
/// transfer_timeout_ms = 100
/// granularity = "auto"  # auto, good or bad
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSettings {
    /// DMX frame frequency in Hz, also updated when devices are dropped
    #[serde(default = "OutputSettings::default_frequency")]
    pub frequency_hz: f64,
    /// Timeout of each bulk transfer in milliseconds
    #[serde(default = "OutputSettings::default_transfer_timeout")]
    pub transfer_timeout_ms: u64,
    /// Timer granularity override
    #[serde(default)]
    pub granularity: GranularityMode,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            frequency_hz: Self::default_frequency(),
            transfer_timeout_ms: Self::default_transfer_timeout(),
            granularity: GranularityMode::default(),
        }
    }
}

impl OutputSettings {
    fn default_frequency() -> f64 {
        DEFAULT_FREQUENCY_HZ
    }

    fn default_transfer_timeout() -> u64 {
        100
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}

/// How the pacing thread learns the timer granularity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GranularityMode {
    /// Measure on every pacing start
    #[default]
    Auto,
    /// Assume a fine timer (sleep between frames)
    Good,
    /// Assume a coarse timer (busy wait between frames)
    Bad,
}

impl GranularityMode {
    /// Granularity to use instead of calibrating, if any
    pub fn forced(self) -> Option<TimerGranularity> {
        match self {
            GranularityMode::Auto => None,
            GranularityMode::Good => Some(TimerGranularity::Good),
            GranularityMode::Bad => Some(TimerGranularity::Bad),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            daemon: DaemonSettings {
                log_level: "info".to_string(),
                rescan_interval_secs: DaemonSettings::default_rescan_interval(),
            },
            output: OutputSettings::default(),
        }
    }
}

impl DaemonConfig {
    /// Find the configuration file to use
    ///
    /// An explicit path is tilde-expanded and returned even if it does not
    /// exist; otherwise the first existing standard location wins.
    pub fn locate(path: Option<&str>) -> Option<PathBuf> {
        if let Some(p) = path {
            return Some(PathBuf::from(shellexpand::tilde(p).as_ref()));
        }

        // Try standard locations in order
        [
            Self::default_path(),
            PathBuf::from("/etc/suidi-dmx/config.toml"),
        ]
        .into_iter()
        .find(|p| p.exists())
    }

    /// Load configuration from the specified path or a standard location
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path =
            Self::locate(path).ok_or_else(|| anyhow!("No configuration file found"))?;
        Self::load_from(&config_path)
    }

    /// Load and validate one configuration file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: DaemonConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory: {}", parent.display())
                })?;
            }
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("suidi-dmx").join("config.toml")
        } else {
            PathBuf::from(".config/suidi-dmx/config.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.daemon.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.daemon.log_level,
                valid_levels.join(", ")
            ));
        }

        if !is_valid_frequency(self.output.frequency_hz) {
            return Err(anyhow!(
                "Invalid frequency_hz {}, must be between {} and {}",
                self.output.frequency_hz,
                MIN_FREQUENCY_HZ,
                MAX_FREQUENCY_HZ
            ));
        }

        if self.output.transfer_timeout_ms == 0 {
            return Err(anyhow!("transfer_timeout_ms must be greater than 0"));
        }

        Ok(())
    }

    /// Session parameters for devices discovered under this configuration
    pub fn session_config(&self, store: Arc<dyn FrequencyStore>) -> SessionConfig {
        SessionConfig {
            store,
            transfer_timeout: self.output.transfer_timeout(),
            granularity: self.output.granularity.forced(),
        }
    }
}
