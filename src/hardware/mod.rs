//! Sensor drivers.
//!
//! Only simulated drivers ship with the crate; vendor drivers register
//! themselves with [`registry::DriverRegistry`].

pub mod mock;
pub mod registry;

pub use mock::{MockSensor, MockStats};
pub use registry::DriverRegistry;
