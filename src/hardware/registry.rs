//! Driver registry: turns a [`SensorSpec`] into a live [`SensorHandle`].
//!
//! Real vendor drivers live outside this crate; they plug in by registering a
//! factory under their driver name. The built-in `mock` and `mock_box` drivers
//! simulate a simple sensor and a multiplexed box.

use crate::config::{SensorKind, SensorSpec};
use crate::core::{SensorHandle, SensorIdentity};
use crate::error::{AppResult, LoggerError};
use crate::hardware::mock::MockSensor;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

type SensorFactory = Box<dyn Fn(&SensorSpec) -> AppResult<Box<dyn SensorHandle>> + Send + Sync>;

/// Maps driver names to sensor factories.
pub struct DriverRegistry {
    factories: HashMap<String, SensorFactory>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverRegistry {
    /// Registry with the built-in mock drivers.
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("mock", |spec| Ok(Box::new(mock_from_spec(spec)?)));
        registry.register("mock_box", |spec| {
            if spec.kind != SensorKind::Box {
                return Err(LoggerError::Configuration(format!(
                    "sensor {}: driver 'mock_box' requires kind = \"box\"",
                    spec.identity
                )));
            }
            Ok(Box::new(mock_from_spec(spec)?))
        });
        registry
    }

    /// Register (or replace) the factory for `driver`.
    pub fn register<F>(&mut self, driver: &str, factory: F)
    where
        F: Fn(&SensorSpec) -> AppResult<Box<dyn SensorHandle>> + Send + Sync + 'static,
    {
        self.factories.insert(driver.to_string(), Box::new(factory));
    }

    /// Whether a factory exists for `driver`.
    pub fn is_available(&self, driver: &str) -> bool {
        self.factories.contains_key(driver)
    }

    /// Build the sensor described by `spec`.
    pub fn create(&self, spec: &SensorSpec) -> AppResult<Box<dyn SensorHandle>> {
        self.factories
            .get(&spec.driver)
            .ok_or_else(|| {
                LoggerError::Configuration(format!(
                    "sensor {}: unknown driver '{}'",
                    spec.identity, spec.driver
                ))
            })
            .and_then(|factory| factory(spec))
    }
}

#[derive(Debug, Deserialize)]
struct MockOptions {
    #[serde(default = "default_base")]
    base: f64,
    #[serde(default = "default_noise")]
    noise: f64,
    #[serde(default)]
    failure_rate: f64,
    #[serde(default)]
    channels: Option<Vec<String>>,
}

fn default_base() -> f64 {
    20.0
}

fn default_noise() -> f64 {
    0.5
}

fn mock_from_spec(spec: &SensorSpec) -> AppResult<MockSensor> {
    let options: MockOptions = spec.options.clone().try_into().map_err(|e| {
        LoggerError::Configuration(format!("sensor {}: invalid options: {e}", spec.identity))
    })?;

    let sensor = match spec.kind {
        SensorKind::Simple => MockSensor::simple(spec.identity.clone()),
        SensorKind::Box => {
            let channels: Vec<SensorIdentity> = match options.channels {
                Some(names) => names.into_iter().map(SensorIdentity::from).collect(),
                None => (1..=spec.channel_count())
                    .map(|i| SensorIdentity::new(format!("{}-ch{i}", spec.identity)))
                    .collect(),
            };
            MockSensor::multiplexed(spec.identity.clone(), channels)
        }
    };

    Ok(sensor
        .with_signal(options.base, options.noise)
        .with_failure_rate(options.failure_rate)
        .with_pace(Duration::from_secs_f64(1.0 / spec.frequency_hz)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoggerConfig;

    fn specs(doc: &str) -> Vec<SensorSpec> {
        LoggerConfig::from_toml_str(doc).unwrap().sensors
    }

    #[tokio::test]
    async fn builds_mock_box_with_configured_channels() {
        let specs = specs(
            r#"
            [[sensors]]
            identity = "alu-box"
            kind = "box"
            driver = "mock_box"
            frequency_hz = 1000.0
            measurement = "Temperature"
            options = { channels = ["alu-1", "alu-2"], noise = 0.0 }
            "#,
        );
        let mut sensor = DriverRegistry::new().create(&specs[0]).unwrap();
        assert_eq!(sensor.identity().as_str(), "alu-box");

        let readings = sensor.acquire(2).await.unwrap();
        let channels: Vec<_> = readings
            .iter()
            .filter_map(|r| r.sub_identity.as_ref().map(|s| s.as_str().to_string()))
            .collect();
        assert_eq!(channels, vec!["alu-1", "alu-2"]);
    }

    #[test]
    fn unknown_driver_is_configuration_error() {
        let specs = specs(
            r#"
            [[sensors]]
            identity = "x"
            driver = "phidget"
            measurement = "Temperature"
            "#,
        );
        let err = DriverRegistry::new().create(&specs[0]).err().unwrap();
        assert!(err.to_string().contains("unknown driver 'phidget'"));
    }

    #[test]
    fn mock_box_requires_box_kind() {
        let specs = specs(
            r#"
            [[sensors]]
            identity = "x"
            driver = "mock_box"
            measurement = "Temperature"
            "#,
        );
        assert!(DriverRegistry::new().create(&specs[0]).is_err());
    }

    #[test]
    fn custom_driver_can_be_registered() {
        let mut registry = DriverRegistry::new();
        assert!(!registry.is_available("phidget"));
        registry.register("phidget", |spec| {
            Ok(Box::new(MockSensor::simple(spec.identity.clone())))
        });
        assert!(registry.is_available("phidget"));
    }
}
