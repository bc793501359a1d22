/*!
Configuration management for the angle grabber application.
*/

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use shared::{ReaderConfig, RetryPolicy, SamplingConfig, SerialConfig};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub output: OutputConfig,
    pub devices: Vec<DeviceConfig>,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            output: OutputConfig::default(),
            devices: vec![DeviceConfig::default()],
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            info!("📝 Loading configuration from {}", path.as_ref().display());
            Self::load_from_file(path)
        } else {
            info!("📝 No config file at {}, using defaults", path.as_ref().display());
            Ok(Self::new())
        }
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Check every device and the device list itself
    pub fn validate(&self) -> Result<()> {
        if self.devices.is_empty() {
            bail!("at least one device must be configured");
        }

        let mut names = HashSet::new();
        for device in &self.devices {
            if !names.insert(device.name.as_str()) {
                bail!("duplicate device name '{}'", device.name);
            }
            device
                .reader_config()
                .validate()
                .with_context(|| format!("Invalid settings for device '{}'", device.name))?;
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Output stream settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OutputConfig {
    /// Line format written to stdout
    pub format: OutputFormat,
}

/// Line format for readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `<epoch_seconds>, <degrees>`
    #[default]
    Csv,
    /// One JSON object per line
    Json,
}

/// One encoder on its own serial port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Label used in multi-device output and logs
    pub name: String,
    pub serial: SerialConfig,
    pub sampling: SamplingConfig,
    pub retry: RetryPolicy,
}

impl DeviceConfig {
    /// Reader settings for this device
    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            serial: self.serial.clone(),
            sampling: self.sampling.clone(),
            retry: self.retry,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let reader = ReaderConfig::default();
        Self {
            name: "encoder".to_string(),
            serial: reader.serial,
            sampling: reader.sampling,
            retry: reader.retry,
        }
    }
}
