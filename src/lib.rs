//! # Sensor Logger Core Library
//!
//! This crate samples a fixed set of sensors on a fixed period, averages a few raw
//! readings per sensor into one value, and appends one row per cycle to a CSV file
//! that is rotated on a timer and handed to an uploader once closed. A failing
//! sensor never stops the logger: its column reads NaN for that cycle and the
//! sampler makes one reconnection attempt.
//!
//! ## Crate Structure
//!
//! - **`config`**: figment-based configuration (`LoggerConfig`) loaded from TOML and
//!   `SENSOR_LOGGER_*` environment variables.
//! - **`core`**: the `SensorHandle` driver trait, the `Uploader` trait and the
//!   `SensorIdentity` newtype everything else refers to sensors by.
//! - **`sampler`**: per-sensor connection state, averaging and the reconnect-once
//!   failure policy.
//! - **`coordinator`**: `CycleCoordinator` (one cycle: fan-out, fold, append, box
//!   resolution) and `Engine` (schedule, rotation timer, shutdown).
//! - **`data`**: the position-stable `ColumnRegistry` and the rotating CSV `Recorder`.
//! - **`hardware`**: mock sensors and the driver registry.
//! - **`upload`**: `LocalCopyUploader` and `NoopUploader`.
//! - **`error`**: the crate-wide `LoggerError`.
//! - **`logging`**: tracing subscriber setup.

pub mod config;
pub mod coordinator;
pub mod core;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod sampler;
pub mod upload;

pub use coordinator::{CycleCoordinator, Engine, EngineHandle};
pub use error::{AppResult, LoggerError};
