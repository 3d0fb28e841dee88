//! Core traits and data types for the sensor logger.
use crate::error::LoggerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Stable string token naming one measurable channel.
///
/// Sensors, columns and rows refer to each other only through this identity,
/// never through the sensor object itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorIdentity(String);

impl SensorIdentity {
    /// Create a new identity from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string representation of this identity.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SensorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SensorIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SensorIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A single raw measurement as returned by a driver.
#[derive(Clone, Debug, PartialEq)]
pub struct RawReading {
    /// Channel identity for multiplexed boxes, `None` for simple sensors.
    pub sub_identity: Option<SensorIdentity>,
    /// Measured value.
    pub value: f64,
    /// Device-side timestamp, if the driver reports one.
    pub timestamp: Option<String>,
}

impl RawReading {
    /// A reading from a simple (single-channel) sensor.
    pub fn simple(value: f64) -> Self {
        Self {
            sub_identity: None,
            value,
            timestamp: None,
        }
    }

    /// A reading from one channel of a multiplexed box.
    pub fn channel(sub_identity: impl Into<SensorIdentity>, value: f64) -> Self {
        Self {
            sub_identity: Some(sub_identity.into()),
            value,
            timestamp: None,
        }
    }
}

/// Driver capability surface consumed by the sampler.
///
/// Implementations wrap one physical device (or one multiplexed box). The core
/// never implements real hardware access; see `hardware::mock` for simulations.
#[async_trait]
pub trait SensorHandle: Send + Sync {
    /// Identity from the static configuration (the placeholder for a box).
    fn identity(&self) -> &SensorIdentity;

    /// Opens the connection to the device.
    ///
    /// Fails with [`LoggerError::Connection`] when the device is unreachable.
    async fn connect(&mut self) -> Result<(), LoggerError>;

    /// Closes the connection to the device.
    async fn disconnect(&mut self) -> Result<(), LoggerError>;

    /// Triggers `count` measurements and returns them in acquisition order.
    ///
    /// Fails with [`LoggerError::Acquisition`] on device errors or timeouts.
    async fn acquire(&mut self, count: usize) -> Result<Vec<RawReading>, LoggerError>;

    /// Stops any running acquisition, leaving the device quiescent.
    async fn stop(&mut self) -> Result<(), LoggerError>;
}

/// Receives the path of every finalized (rotated-out) log file.
///
/// `submit` must not block: implementations hand the work to a background task.
/// The core neither awaits nor retries individual uploads; it only calls
/// [`Uploader::drain`] once at shutdown so queued work is not lost.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Queue the file at `path` for upload.
    fn submit(&self, path: &Path);

    /// Wait for every upload queued so far to finish.
    async fn drain(&self) {}
}
