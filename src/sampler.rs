//! Per-sensor sampling with a single reconnection attempt on failure.
//!
//! A [`Sampler`] owns one [`SensorHandle`] and its connection state. Expected
//! failures never escape as errors: they come back as
//! [`CycleReading::Failed`], which the coordinator renders as NaN.
//!
//! ```text
//! Idle ──sample()──> Sampling ──ok──> stop() ──> Success
//!                       │
//!                       └─err──> Reconnecting ──(ok or not)──> Idle  => Failed
//! ```

use crate::config::{SensorKind, SensorSpec};
use crate::core::{RawReading, SensorHandle, SensorIdentity};
use crate::error::{AppResult, LoggerError};
use std::fmt;
use std::time::{Duration, Instant};

/// Connection state of one sensor as seen by its sampler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; sampling yields `NotConnected` without touching the device.
    Disconnected,
    /// Eligible for sampling.
    Connected,
    /// Inside the single reconnect attempt after a failed acquisition.
    Reconnecting,
}

/// Why a sensor produced no value this cycle.
#[derive(Clone, Debug, PartialEq)]
pub enum FailureReason {
    /// Never connected, or explicitly disconnected; no acquisition was attempted.
    NotConnected,
    /// The acquisition failed or returned unusable data.
    Acquisition(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => f.write_str("not connected"),
            Self::Acquisition(reason) => f.write_str(reason),
        }
    }
}

/// Outcome of sampling one sensor in one cycle.
#[derive(Clone, Debug, PartialEq)]
pub enum CycleReading {
    /// Mean of all raw readings of a simple sensor.
    Average(f64),
    /// Per-channel means of a box, in discovery order.
    Channels(Vec<(SensorIdentity, f64)>),
    /// No value; the column(s) get NaN.
    Failed(FailureReason),
}

/// A [`CycleReading`] tagged with the sensor it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorSample {
    /// Top-level identity of the sampled sensor.
    pub identity: SensorIdentity,
    /// What the sensor produced.
    pub reading: CycleReading,
}

impl SensorSample {
    /// Whether the sample carries no value.
    pub fn is_failed(&self) -> bool {
        matches!(self.reading, CycleReading::Failed(_))
    }
}

/// Failure and reconnection counters of one sampler.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SamplerStats {
    /// Cycles sampled, failed or not.
    pub samples: u64,
    /// Failures since the last good sample.
    pub consecutive_failures: u32,
    /// Failures over the sampler's lifetime.
    pub total_failures: u64,
    /// How long the most recent reconnect took.
    pub last_reconnect: Option<Duration>,
    /// Whether the most recent reconnect succeeded.
    pub last_reconnect_ok: Option<bool>,
}

/// Owns one sensor and turns acquisitions into cycle readings.
pub struct Sampler {
    sensor: Box<dyn SensorHandle>,
    identity: SensorIdentity,
    kind: SensorKind,
    channels: usize,
    state: ConnectionState,
    stats: SamplerStats,
}

impl Sampler {
    /// Wrap `sensor`; the sampler starts out disconnected.
    pub fn new(sensor: Box<dyn SensorHandle>, kind: SensorKind, channels: usize) -> Self {
        let identity = sensor.identity().clone();
        Self {
            sensor,
            identity,
            kind,
            channels: channels.max(1),
            state: ConnectionState::Disconnected,
            stats: SamplerStats::default(),
        }
    }

    /// Wrap `sensor` with the topology described by `spec`.
    pub fn from_spec(sensor: Box<dyn SensorHandle>, spec: &SensorSpec) -> Self {
        Self::new(sensor, spec.kind, spec.channel_count())
    }

    /// Identity of the wrapped sensor.
    pub fn identity(&self) -> &SensorIdentity {
        &self.identity
    }

    /// Simple or box.
    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Counters.
    pub fn stats(&self) -> &SamplerStats {
        &self.stats
    }

    /// Connect the sensor. On failure the sampler stays disconnected and will
    /// report `NotConnected` until connected again.
    pub async fn connect(&mut self) -> AppResult<()> {
        match self.sensor.connect().await {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                tracing::info!(sensor = %self.identity, "Sensor connected");
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Disconnect the sensor; later samples report `NotConnected`.
    pub async fn disconnect(&mut self) -> AppResult<()> {
        self.state = ConnectionState::Disconnected;
        self.sensor.disconnect().await
    }

    /// Sample the sensor once: `measurements` raw readings per channel,
    /// reduced to their arithmetic mean.
    pub async fn sample(&mut self, measurements: usize) -> SensorSample {
        if self.state != ConnectionState::Connected {
            tracing::debug!(sensor = %self.identity, "Skipping sensor that is not connected");
            return self.finish(CycleReading::Failed(FailureReason::NotConnected));
        }

        let started = Instant::now();
        match self.acquire(measurements).await {
            Ok(reading) => {
                self.stats.samples += 1;
                self.stats.consecutive_failures = 0;
                tracing::debug!(
                    sensor = %self.identity,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Sample complete"
                );
                self.finish(reading)
            }
            Err(e) => {
                self.stats.consecutive_failures += 1;
                self.stats.total_failures += 1;
                tracing::warn!(
                    sensor = %self.identity,
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    consecutive_failures = self.stats.consecutive_failures,
                    "Error sampling from sensor"
                );
                self.reconnect().await;
                self.finish(CycleReading::Failed(FailureReason::Acquisition(
                    e.to_string(),
                )))
            }
        }
    }

    fn finish(&self, reading: CycleReading) -> SensorSample {
        SensorSample {
            identity: self.identity.clone(),
            reading,
        }
    }

    async fn acquire(&mut self, measurements: usize) -> AppResult<CycleReading> {
        let count = measurements.max(1) * self.channels;
        let readings = self.sensor.acquire(count).await?;
        let reading = match self.kind {
            SensorKind::Simple => CycleReading::Average(self.average(&readings)?),
            SensorKind::Box => CycleReading::Channels(self.average_channels(&readings)?),
        };
        self.sensor.stop().await?;
        Ok(reading)
    }

    fn average(&self, readings: &[RawReading]) -> AppResult<f64> {
        if readings.is_empty() {
            return Err(LoggerError::acquisition(&self.identity, "no readings returned"));
        }
        let mean = readings.iter().map(|r| r.value).sum::<f64>() / readings.len() as f64;
        if !mean.is_finite() {
            return Err(LoggerError::acquisition(&self.identity, "non-finite mean"));
        }
        Ok(mean)
    }

    fn average_channels(&self, readings: &[RawReading]) -> AppResult<Vec<(SensorIdentity, f64)>> {
        if readings.is_empty() {
            return Err(LoggerError::acquisition(&self.identity, "no readings returned"));
        }
        // (channel, sum, count) in discovery order
        let mut groups: Vec<(SensorIdentity, f64, usize)> = Vec::new();
        for reading in readings {
            let sub = reading.sub_identity.as_ref().ok_or_else(|| {
                LoggerError::acquisition(&self.identity, "box reading without channel identity")
            })?;
            match groups.iter_mut().find(|(id, _, _)| id == sub) {
                Some((_, sum, n)) => {
                    *sum += reading.value;
                    *n += 1;
                }
                None => groups.push((sub.clone(), reading.value, 1)),
            }
        }

        groups
            .into_iter()
            .map(|(sub, sum, n)| {
                let mean = sum / n as f64;
                if mean.is_finite() {
                    Ok((sub, mean))
                } else {
                    Err(LoggerError::acquisition(
                        &self.identity,
                        format!("non-finite mean on channel {sub}"),
                    ))
                }
            })
            .collect()
    }

    /// One synchronous reconnection attempt. Whatever the outcome the sensor is
    /// eligible again next cycle.
    async fn reconnect(&mut self) {
        self.state = ConnectionState::Reconnecting;
        let started = Instant::now();

        if let Err(e) = self.sensor.disconnect().await {
            tracing::debug!(sensor = %self.identity, error = %e, "Disconnect before reconnect failed");
        }
        let result = self.sensor.connect().await;
        let took = started.elapsed();

        self.stats.last_reconnect = Some(took);
        self.stats.last_reconnect_ok = Some(result.is_ok());
        match result {
            Ok(()) => tracing::info!(sensor = %self.identity, ?took, "Reconnection attempt took"),
            Err(e) => {
                tracing::warn!(sensor = %self.identity, ?took, error = %e, "Reconnection attempt took")
            }
        }
        self.state = ConnectionState::Connected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockSensor;

    async fn connected(sensor: MockSensor, kind: SensorKind, channels: usize) -> Sampler {
        let mut sampler = Sampler::new(Box::new(sensor), kind, channels);
        sampler.connect().await.unwrap();
        sampler
    }

    #[tokio::test]
    async fn averages_raw_readings() {
        let sensor = MockSensor::simple("tmp-1").with_values(vec![3.0, 5.0, 4.0]);
        let stats = sensor.stats();
        let mut sampler = connected(sensor, SensorKind::Simple, 1).await;

        let sample = sampler.sample(3).await;
        assert_eq!(sample.identity.as_str(), "tmp-1");
        assert_eq!(sample.reading, CycleReading::Average(4.0));
        assert_eq!(stats.last_acquire_count(), 3);
        assert_eq!(stats.stop_calls(), 1);
        assert_eq!(sampler.stats().samples, 1);
    }

    #[tokio::test]
    async fn disconnected_sensor_is_never_acquired() {
        let sensor = MockSensor::simple("hum-1").with_connect_failure("refused");
        let stats = sensor.stats();
        let mut sampler = Sampler::new(Box::new(sensor), SensorKind::Simple, 1);
        assert!(sampler.connect().await.is_err());
        assert_eq!(sampler.state(), ConnectionState::Disconnected);

        let sample = sampler.sample(3).await;
        assert_eq!(
            sample.reading,
            CycleReading::Failed(FailureReason::NotConnected)
        );
        assert_eq!(stats.acquire_calls(), 0);
    }

    #[tokio::test]
    async fn failure_triggers_exactly_one_reconnect() {
        let sensor = MockSensor::simple("tmp-1")
            .with_connect_success()
            .with_connect_failure("refused")
            .with_acquisition_failure("device timeout");
        let stats = sensor.stats();
        let mut sampler = connected(sensor, SensorKind::Simple, 1).await;

        let sample = sampler.sample(3).await;
        assert!(sample.is_failed());
        assert_eq!(stats.acquire_calls(), 1);
        assert_eq!(stats.connect_calls(), 2);
        assert_eq!(stats.stop_calls(), 0);
        assert_eq!(sampler.stats().last_reconnect_ok, Some(false));
        assert_eq!(sampler.stats().consecutive_failures, 1);
        // Still eligible next cycle despite the failed reconnect.
        assert_eq!(sampler.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn recovers_on_next_cycle() {
        let sensor = MockSensor::simple("tmp-1")
            .with_acquisition_failure("device timeout")
            .with_values(vec![1.0, 2.0, 3.0]);
        let mut sampler = connected(sensor, SensorKind::Simple, 1).await;

        assert!(sampler.sample(3).await.is_failed());
        assert_eq!(sampler.sample(3).await.reading, CycleReading::Average(2.0));
        assert_eq!(sampler.stats().consecutive_failures, 0);
        assert_eq!(sampler.stats().total_failures, 1);
    }

    #[tokio::test]
    async fn empty_and_non_finite_readings_are_failures() {
        let sensor = MockSensor::simple("tmp-1")
            .with_values(vec![])
            .with_values(vec![1.0, f64::NAN]);
        let mut sampler = connected(sensor, SensorKind::Simple, 1).await;

        assert!(sampler.sample(2).await.is_failed());
        assert!(sampler.sample(2).await.is_failed());
        assert_eq!(sampler.stats().total_failures, 2);
    }

    #[tokio::test]
    async fn box_groups_channels_in_discovery_order() {
        let sensor = MockSensor::multiplexed("alu-box", ["alu-2", "alu-1"])
            .with_values(vec![10.0, 20.0, 12.0, 22.0]);
        let stats = sensor.stats();
        let mut sampler = connected(sensor, SensorKind::Box, 2).await;

        let sample = sampler.sample(2).await;
        assert_eq!(stats.last_acquire_count(), 4);
        assert_eq!(
            sample.reading,
            CycleReading::Channels(vec![
                (SensorIdentity::new("alu-2"), 11.0),
                (SensorIdentity::new("alu-1"), 21.0),
            ])
        );
    }

    #[tokio::test]
    async fn box_reading_without_channel_fails() {
        let sensor = MockSensor::multiplexed("alu-box", ["alu-1"])
            .with_readings(vec![RawReading::simple(1.0)]);
        let mut sampler = connected(sensor, SensorKind::Box, 1).await;
        assert!(sampler.sample(1).await.is_failed());
    }

    #[tokio::test]
    async fn explicit_disconnect_stops_sampling() {
        let sensor = MockSensor::simple("tmp-1");
        let stats = sensor.stats();
        let mut sampler = connected(sensor, SensorKind::Simple, 1).await;
        sampler.disconnect().await.unwrap();

        assert!(sampler.sample(3).await.is_failed());
        assert_eq!(stats.acquire_calls(), 0);
        assert_eq!(stats.disconnect_calls(), 1);
    }
}
