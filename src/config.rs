//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading for the logger.
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/logger.toml` by default)
//! 2. Environment variables (prefixed with `SENSOR_LOGGER_`, nested keys separated by `__`)
//!
//! # Example
//! ```no_run
//! use sensor_logger::config::LoggerConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LoggerConfig::load()?;
//! config.validate()?;
//! println!("Sampling every {:?}", config.sampling.interval);
//! # Ok(())
//! # }
//! ```

use crate::core::SensorIdentity;
use crate::error::{AppResult, LoggerError};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/logger.toml";

/// Top-level logger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Sampling cycle settings
    #[serde(default)]
    pub sampling: SamplingConfig,
    /// CSV output settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Where closed files are handed off to
    #[serde(default)]
    pub upload: UploadConfig,
    /// Sensor definitions, in column order
    #[serde(default)]
    pub sensors: Vec<SensorSpec>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Console log format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Console log format selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Multi-line human readable output
    #[default]
    Pretty,
    /// Single-line output
    Compact,
    /// One JSON object per event
    Json,
}

/// Sampling cycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Time between cycle starts (fixed rate) or between a cycle end and the next start (fixed delay)
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,
    /// Raw readings averaged into one value per channel and cycle
    #[serde(default = "default_measurements_per_sample")]
    pub measurements_per_sample: usize,
    /// Cycle scheduling policy
    #[serde(default)]
    pub schedule: Schedule,
}

/// When the next cycle starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// Measured from the start of the previous cycle; an overrun starts the next cycle at once.
    #[default]
    FixedRate,
    /// Measured from the end of the previous cycle; the period drifts by the sampling time.
    FixedDelay,
}

/// CSV output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory receiving the active CSV files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// File name prefix, followed by the creation timestamp
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    /// How long one file collects rows before it is rotated out
    #[serde(with = "humantime_serde", default = "default_rotation_period")]
    pub rotation_period: Duration,
    /// Token written for missing values
    #[serde(default = "default_nan_token")]
    pub nan_token: String,
    /// Fixed number of decimals; shortest round-trip representation when unset
    #[serde(default)]
    pub float_precision: Option<usize>,
}

/// Upload hand-off configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Copy every closed file to `destination`
    #[serde(default)]
    pub enabled: bool,
    /// Target directory (for example a synced cloud-drive folder)
    #[serde(default)]
    pub destination: Option<PathBuf>,
}

/// Static description of one configured sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSpec {
    /// Unique identity; for a box this is the placeholder until channels resolve
    pub identity: SensorIdentity,
    /// Driver name looked up in `hardware::registry`
    #[serde(default = "default_driver")]
    pub driver: String,
    /// Simple sensor or multiplexed box
    #[serde(default)]
    pub kind: SensorKind,
    /// Acquisition rate of the device
    #[serde(default = "default_frequency")]
    pub frequency_hz: f64,
    /// Connection target (host, hub port, serial number, ...)
    #[serde(default)]
    pub target: String,
    /// Measured quantity, used in the column label
    pub measurement: String,
    /// Raw readings produced per acquisition step; defaults to 1 (simple) or 2 (box)
    #[serde(default)]
    pub channels: Option<usize>,
    /// Whether this sensor is sampled at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Driver-specific configuration (dynamic)
    #[serde(default = "empty_table")]
    pub options: toml::Value,
}

/// Sensor topology
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// One device, one identity, one column
    #[default]
    Simple,
    /// One device exposing several channels that only get identities after first contact
    Box,
}

impl SensorSpec {
    /// Number of raw readings one acquisition step yields.
    pub fn channel_count(&self) -> usize {
        self.channels.unwrap_or(match self.kind {
            SensorKind::Simple => 1,
            SensorKind::Box => 2,
        })
    }

    /// Column label for the sensor itself (or a box placeholder).
    pub fn label(&self) -> String {
        self.label_for(&self.identity)
    }

    /// Column label for one resolved channel of this sensor.
    pub fn label_for(&self, identity: &SensorIdentity) -> String {
        column_label(&self.measurement, identity)
    }
}

/// Header label of the column holding `measurement` from `identity`.
pub fn column_label(measurement: &str, identity: &SensorIdentity) -> String {
    format!("{measurement} from {identity}")
}

// Default value functions
fn default_name() -> String {
    "Sensor Logger".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_measurements_per_sample() -> usize {
    3
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("csv")
}

fn default_file_prefix() -> String {
    "sensor_data".to_string()
}

fn default_rotation_period() -> Duration {
    Duration::from_secs(3600)
}

fn default_nan_token() -> String {
    "nan".to_string()
}

fn default_driver() -> String {
    "mock".to_string()
}

fn default_frequency() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            measurements_per_sample: default_measurements_per_sample(),
            schedule: Schedule::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_prefix: default_file_prefix(),
            rotation_period: default_rotation_period(),
            nan_token: default_nan_token(),
            float_precision: None,
        }
    }
}

impl LoggerConfig {
    /// Load configuration from `config/logger.toml` and environment variables
    ///
    /// Environment variables can override configuration with prefix SENSOR_LOGGER_
    /// Example: SENSOR_LOGGER_APPLICATION__LOG_LEVEL=debug
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LoggerError::Configuration(format!(
                "config file '{}' not found",
                path.display()
            )));
        }
        let config = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("SENSOR_LOGGER_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Parse configuration from an in-memory TOML document
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        Ok(Figment::from(Toml::string(toml)).extract()?)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(LoggerError::Configuration(msg));

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.sampling.interval.is_zero() {
            return invalid("sampling.interval must be greater than zero".into());
        }
        if self.sampling.measurements_per_sample == 0 {
            return invalid("sampling.measurements_per_sample must be at least 1".into());
        }
        if self.storage.rotation_period.is_zero() {
            return invalid("storage.rotation_period must be greater than zero".into());
        }
        if self.storage.file_prefix.trim().is_empty() {
            return invalid("storage.file_prefix must not be empty".into());
        }
        if self.upload.enabled && self.upload.destination.is_none() {
            return invalid("upload.enabled requires upload.destination".into());
        }

        let mut ids = HashSet::new();
        for sensor in &self.sensors {
            if sensor.identity.as_str().trim().is_empty() {
                return invalid("sensor identity must not be empty".into());
            }
            if !ids.insert(&sensor.identity) {
                return invalid(format!("Duplicate sensor identity: {}", sensor.identity));
            }
            if !(sensor.frequency_hz.is_finite() && sensor.frequency_hz > 0.0) {
                return invalid(format!(
                    "Sensor {}: frequency_hz must be a positive number",
                    sensor.identity
                ));
            }
            if sensor.channel_count() == 0 {
                return invalid(format!(
                    "Sensor {}: channels must be at least 1",
                    sensor.identity
                ));
            }
        }

        Ok(())
    }

    /// Get all enabled sensors, in configuration order
    pub fn enabled_sensors(&self) -> Vec<&SensorSpec> {
        self.sensors.iter().filter(|s| s.enabled).collect()
    }
}
