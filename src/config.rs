//! Configuration management for Keyboard Lag
//!
//! Settings are read from a TOML file in the platform config directory.
//! Command line flags override whatever the file says.
//!
//! ## Config File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/keyboard-lag/config.toml` |
//!
//! ## Example
//!
//! ```no_run
//! use keyboard_lag::Config;
//!
//! // Load existing config or use defaults
//! let mut config = Config::load().unwrap_or_default();
//!
//! // Modify settings
//! config.run.iterations = 500;
//!
//! // Save to disk
//! config.save().expect("Failed to save config");
//! ```

use crate::measure::RunSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to determine config directory
    NoConfigDir,
    /// IO error reading or writing config file
    Io(io::Error),
    /// Failed to parse config file
    Parse(toml::de::Error),
    /// Failed to serialize config
    Serialize(toml::ser::Error),
    /// Values that cannot describe a run
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NoConfigDir => write!(f, "Could not determine config directory"),
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Serialize(e) => write!(f, "Serialize error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        ConfigError::Serialize(e)
    }
}

/// Returns the path to the config file.
///
/// Creates the config directory if it doesn't exist.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    let app_dir = config_dir.join("keyboard-lag");

    if !app_dir.exists() {
        fs::create_dir_all(&app_dir)?;
    }

    Ok(app_dir.join("config.toml"))
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Trigger pin settings
    #[serde(default)]
    pub trigger: TriggerConfig,
    /// Trial schedule settings
    #[serde(default)]
    pub run: RunConfig,
    /// Input device settings
    #[serde(default)]
    pub device: DeviceConfig,
}

/// Trigger pin configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TriggerConfig {
    /// Pin label, e.g. "GPIO21"
    pub gpio: String,
    /// Where the sysfs GPIO interface lives
    pub sysfs_root: PathBuf,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            gpio: "GPIO21".to_string(),
            sysfs_root: PathBuf::from(crate::trigger::sysfs::DEFAULT_SYSFS_ROOT),
        }
    }
}

/// Trial schedule configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Number of trials
    pub iterations: usize,
    /// Minimum delay between trials in milliseconds
    pub min_delay_ms: u64,
    /// Maximum delay between trials in milliseconds
    pub max_delay_ms: u64,
    /// How long to wait for each event in milliseconds
    pub timeout_ms: u64,
    /// Quiet time after learning the key and before a run
    pub settle_ms: u64,
    /// Per-device timeout while scanning for the wired keyboard
    pub scan_timeout_ms: u64,
    /// Fixed key code; learned from the keyboard when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_code: Option<u16>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            iterations: 100,
            min_delay_ms: 50,
            max_delay_ms: 1000,
            timeout_ms: 3000,
            settle_ms: 500,
            scan_timeout_ms: 1000,
            key_code: None,
        }
    }
}

/// Input device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Pause between empty non-blocking reads in microseconds
    pub poll_interval_us: u64,
    /// Grab the device exclusively so trigger presses don't reach other programs
    pub grab: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            poll_interval_us: 200,
            grab: false,
        }
    }
}

impl Config {
    /// Load configuration from the default config file.
    ///
    /// Returns the default configuration if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to the default config file.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.run.timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.run.settle_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.run.scan_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.device.poll_interval_us)
    }

    /// Check the values describe a runnable schedule
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.min_delay_ms > self.run.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "min delay {} ms is greater than max delay {} ms",
                self.run.min_delay_ms, self.run.max_delay_ms
            )));
        }
        if self.run.iterations == 0 {
            return Err(ConfigError::Invalid("iterations must be at least 1".to_string()));
        }
        if self.run.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Convert to the measurement parameters
    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            key_code: self.run.key_code,
            min_delay: self.run.min_delay_ms as f64 / 1000.0,
            max_delay: self.run.max_delay_ms as f64 / 1000.0,
            iterations: self.run.iterations,
            timeout: self.timeout(),
            settle: self.settle(),
        }
    }
}
