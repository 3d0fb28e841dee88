//! Custom error types for the application.
//!
//! This module defines the primary error type, `LoggerError`, for the whole crate.
//! Using the `thiserror` crate, it provides one place to classify everything that
//! can go wrong while sampling sensors and writing the CSV log.
//!
//! ## Error Hierarchy
//!
//! - **`Connection`**: a sensor could not be reached at connect time.
//! - **`Acquisition`**: a sensor failed in the middle of sampling (driver error,
//!   timeout, protocol error, unusable data).
//! - **`Config`** / **`Configuration`**: the configuration could not be parsed, or
//!   it parsed but violates a semantic rule (duplicate identity, double box
//!   resolution, unknown identity in a row).
//! - **`Io`** / **`Csv`**: the log file could not be created or written.
//! - **`Task`**: a background task of the engine panicked or was cancelled.
//!
//! Connection and acquisition errors are recoverable: the sampler contains them and
//! turns them into a NaN for the affected column. Everything else is fatal for the
//! running engine and is returned to the embedding application.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, LoggerError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum LoggerError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Could not connect to sensor {sensor}: {reason}")]
    Connection { sensor: String, reason: String },

    #[error("Error sampling from sensor {sensor}: {reason}")]
    Acquisition { sensor: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Engine task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl LoggerError {
    /// Builds a [`LoggerError::Connection`] for the given sensor.
    pub fn connection(sensor: impl ToString, reason: impl ToString) -> Self {
        Self::Connection {
            sensor: sensor.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Builds a [`LoggerError::Acquisition`] for the given sensor.
    pub fn acquisition(sensor: impl ToString, reason: impl ToString) -> Self {
        Self::Acquisition {
            sensor: sensor.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error must stop the engine.
    ///
    /// Per-sensor failures are contained by the sampler and never abort a cycle.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Connection { .. } | Self::Acquisition { .. })
    }
}
