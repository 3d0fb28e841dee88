//! Mock Sensor Implementations
//!
//! Provides simulated sensors for testing and for running the logger without
//! physical hardware. All mock devices use async-safe operations
//! (`tokio::time::sleep`, not `std::thread::sleep`).
//!
//! # Available Mocks
//!
//! - `MockSensor::simple` - one device, one value per reading
//! - `MockSensor::multiplexed` - a box whose readings are tagged with channel identities
//!
//! Both can be scripted (a queue of acquisition and connection outcomes, consumed
//! in order) and fall back to generated values (`base` ± uniform `noise`) once the
//! script is exhausted. Call counters are shared through [`MockStats`] so tests can
//! keep observing a sensor after handing it to a sampler.

use crate::core::{RawReading, SensorHandle, SensorIdentity};
use crate::error::LoggerError;
use async_trait::async_trait;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Shared call counters of one mock sensor.
#[derive(Debug, Default)]
pub struct MockStats {
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    acquire_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    last_acquire_count: AtomicUsize,
}

impl MockStats {
    /// Number of `connect` calls so far.
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Number of `disconnect` calls so far.
    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Number of `acquire` calls so far.
    pub fn acquire_calls(&self) -> usize {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    /// Number of `stop` calls so far.
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// `count` argument of the most recent `acquire` call.
    pub fn last_acquire_count(&self) -> usize {
        self.last_acquire_count.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
enum Layout {
    Simple,
    Multiplexed(Vec<SensorIdentity>),
}

#[derive(Clone, Debug)]
enum Acquisition {
    Values(Vec<RawReading>),
    Fail(String),
}

/// Simulated sensor with scripted and generated behaviour.
///
/// # Example
///
/// ```rust,ignore
/// let sensor = MockSensor::simple("tmp-1")
///     .with_values(vec![3.0, 5.0, 4.0])
///     .with_acquisition_failure("device timeout");
/// let stats = sensor.stats();
/// ```
pub struct MockSensor {
    identity: SensorIdentity,
    layout: Layout,
    base: f64,
    noise: f64,
    failure_rate: f64,
    pace: Option<Duration>,
    acquisitions: VecDeque<Acquisition>,
    connections: VecDeque<Option<String>>,
    stats: Arc<MockStats>,
}

impl MockSensor {
    /// Simple sensor generating values around 20.0.
    pub fn simple(identity: impl Into<SensorIdentity>) -> Self {
        Self::with_layout(identity.into(), Layout::Simple)
    }

    /// Multiplexed box whose readings cycle through `channels`.
    pub fn multiplexed<I, S>(identity: impl Into<SensorIdentity>, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SensorIdentity>,
    {
        let channels = channels.into_iter().map(Into::into).collect();
        Self::with_layout(identity.into(), Layout::Multiplexed(channels))
    }

    fn with_layout(identity: SensorIdentity, layout: Layout) -> Self {
        Self {
            identity,
            layout,
            base: 20.0,
            noise: 0.5,
            failure_rate: 0.0,
            pace: None,
            acquisitions: VecDeque::new(),
            connections: VecDeque::new(),
            stats: Arc::new(MockStats::default()),
        }
    }

    /// Centre and spread of generated values.
    pub fn with_signal(mut self, base: f64, noise: f64) -> Self {
        self.base = base;
        self.noise = noise.abs();
        self
    }

    /// Probability (0.0 to 1.0) that a generated acquisition fails.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Simulated acquisition time per raw reading.
    pub fn with_pace(mut self, per_reading: Duration) -> Self {
        self.pace = Some(per_reading);
        self
    }

    /// Queue one successful acquisition returning exactly `values`.
    ///
    /// For a multiplexed box the values are assigned to channels round-robin.
    pub fn with_values(mut self, values: Vec<f64>) -> Self {
        let readings = match &self.layout {
            Layout::Simple => values.into_iter().map(RawReading::simple).collect(),
            Layout::Multiplexed(channels) => values
                .into_iter()
                .zip(channels.iter().cycle())
                .map(|(v, ch)| RawReading::channel(ch.clone(), v))
                .collect(),
        };
        self.acquisitions.push_back(Acquisition::Values(readings));
        self
    }

    /// Queue one successful acquisition returning exactly `readings`.
    pub fn with_readings(mut self, readings: Vec<RawReading>) -> Self {
        self.acquisitions.push_back(Acquisition::Values(readings));
        self
    }

    /// Queue one failing acquisition.
    pub fn with_acquisition_failure(mut self, reason: impl Into<String>) -> Self {
        self.acquisitions.push_back(Acquisition::Fail(reason.into()));
        self
    }

    /// Queue one failing `connect` call; unscripted calls succeed.
    pub fn with_connect_failure(mut self, reason: impl Into<String>) -> Self {
        self.connections.push_back(Some(reason.into()));
        self
    }

    /// Queue one successful `connect` call (useful between scripted failures).
    pub fn with_connect_success(mut self) -> Self {
        self.connections.push_back(None);
        self
    }

    /// Shared call counters.
    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }

    fn generate(&self, count: usize) -> Result<Vec<RawReading>, LoggerError> {
        let mut rng = rand::thread_rng();
        if self.failure_rate > 0.0 && rng.gen_bool(self.failure_rate) {
            return Err(LoggerError::acquisition(
                &self.identity,
                "simulated device timeout",
            ));
        }
        let mut jitter = || {
            if self.noise > 0.0 {
                rng.gen_range(-self.noise..=self.noise)
            } else {
                0.0
            }
        };
        let readings = match &self.layout {
            Layout::Simple => (0..count)
                .map(|_| RawReading::simple(self.base + jitter()))
                .collect(),
            Layout::Multiplexed(channels) if channels.is_empty() => Vec::new(),
            Layout::Multiplexed(channels) => (0..count)
                .map(|i| {
                    let slot = i % channels.len();
                    RawReading::channel(channels[slot].clone(), self.base + slot as f64 + jitter())
                })
                .collect(),
        };
        Ok(readings)
    }
}

#[async_trait]
impl SensorHandle for MockSensor {
    fn identity(&self) -> &SensorIdentity {
        &self.identity
    }

    async fn connect(&mut self) -> Result<(), LoggerError> {
        self.stats.connect_calls.fetch_add(1, Ordering::SeqCst);
        match self.connections.pop_front().flatten() {
            Some(reason) => Err(LoggerError::connection(&self.identity, reason)),
            None => Ok(()),
        }
    }

    async fn disconnect(&mut self) -> Result<(), LoggerError> {
        self.stats.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn acquire(&mut self, count: usize) -> Result<Vec<RawReading>, LoggerError> {
        self.stats.acquire_calls.fetch_add(1, Ordering::SeqCst);
        self.stats.last_acquire_count.store(count, Ordering::SeqCst);

        if let Some(per_reading) = self.pace {
            // CRITICAL: Use tokio::time::sleep, NOT std::thread::sleep
            sleep(per_reading.saturating_mul(count as u32)).await;
        }

        match self.acquisitions.pop_front() {
            Some(Acquisition::Values(readings)) => Ok(readings),
            Some(Acquisition::Fail(reason)) => Err(LoggerError::acquisition(&self.identity, reason)),
            None => self.generate(count),
        }
    }

    async fn stop(&mut self) -> Result<(), LoggerError> {
        self.stats.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
