//! Cycle coordination and the engine that drives it.
//!
//! [`CycleCoordinator`] runs one sampling cycle: fan out over every sampler,
//! fold the results into a [`Row`], append it, and resolve boxes that reported
//! their channels for the first time. [`Engine`] adds the schedule, the
//! rotation timer and shutdown on top.
//!
//! Lock order is always recorder, then registry.

use crate::config::{LoggerConfig, Schedule};
use crate::core::{SensorIdentity, Uploader};
use crate::data::{ColumnRegistry, Recorder, Row};
use crate::error::{AppResult, LoggerError};
use crate::hardware::DriverRegistry;
use crate::sampler::{CycleReading, Sampler, SensorSample};
use chrono::Local;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::{sleep_until, Instant, MissedTickBehavior};

/// Column registry shared between the sampling loop and the rotation task.
pub type SharedRegistry = Arc<RwLock<ColumnRegistry>>;

/// Recorder shared between the sampling loop and the rotation task.
pub type SharedRecorder = Arc<Mutex<Recorder>>;

/// Runs sampling cycles over a fixed set of samplers.
pub struct CycleCoordinator {
    samplers: Vec<Sampler>,
    registry: SharedRegistry,
    recorder: SharedRecorder,
    measurements_per_sample: usize,
    cycles: u64,
}

impl CycleCoordinator {
    /// Coordinator over `samplers`, taking `measurements_per_sample` readings
    /// per channel and cycle.
    pub fn new(
        samplers: Vec<Sampler>,
        registry: SharedRegistry,
        recorder: SharedRecorder,
        measurements_per_sample: usize,
    ) -> Self {
        Self {
            samplers,
            registry,
            recorder,
            measurements_per_sample,
            cycles: 0,
        }
    }

    /// Samplers in configuration order.
    pub fn samplers(&self) -> &[Sampler] {
        &self.samplers
    }

    /// Completed cycles so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Connect every sampler; returns how many succeeded.
    pub async fn connect_all(&mut self) -> usize {
        let total = self.samplers.len();
        let results = join_all(self.samplers.iter_mut().map(|s| s.connect())).await;

        let mut connected = 0;
        for (sampler, result) in self.samplers.iter().zip(results) {
            match result {
                Ok(()) => connected += 1,
                Err(e) => tracing::warn!(sensor = %sampler.identity(), error = %e, "Could not connect to sensor"),
            }
        }

        tracing::info!("{connected} / {total} sensors successfully connected");
        if connected < total {
            tracing::warn!("Sensors that are not connected will report NaN");
        }
        connected
    }

    /// Disconnect every sampler, logging failures.
    pub async fn disconnect_all(&mut self) {
        let results = join_all(self.samplers.iter_mut().map(|s| s.disconnect())).await;
        for (sampler, result) in self.samplers.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(sensor = %sampler.identity(), error = %e, "Disconnect failed");
            }
        }
    }

    /// Sample every sensor concurrently. Completes once every sampler returned.
    pub async fn sample_all(&mut self) -> Vec<SensorSample> {
        let n = self.measurements_per_sample;
        join_all(self.samplers.iter_mut().map(|s| s.sample(n))).await
    }

    /// Run one full cycle and return the row that was written.
    pub async fn run_cycle(&mut self) -> AppResult<Row> {
        let samples = self.sample_all().await;
        let row_time = Local::now();

        let mut recorder = self.recorder.lock().await;
        let (row, pending) = {
            let registry = self.registry.read().await;
            fold(&registry, &samples, Row::new(row_time))?
        };
        recorder.append(&row)?;
        self.cycles += 1;

        let failed = samples.iter().filter(|s| s.is_failed()).count();
        tracing::debug!(
            cycle = self.cycles,
            values = row.len(),
            failed,
            "Cycle complete"
        );

        if !pending.is_empty() {
            let mut registry = self.registry.write().await;
            for (placeholder, subs) in &pending {
                registry.resolve_box(placeholder, subs)?;
                tracing::info!(
                    sensor = %placeholder,
                    channels = subs.len(),
                    "Box channels discovered"
                );
            }
            recorder.rotate(registry.columns())?;
        }
        Ok(row)
    }
}

type PendingBoxes = Vec<(SensorIdentity, Vec<SensorIdentity>)>;

/// Fold samples into `row` against the current columns.
///
/// Returns the row and every unresolved box that reported channels, with its
/// channels in discovery order. Those boxes keep their placeholder (NaN) in
/// this row. A value for an identity without a column aborts the cycle.
fn fold(
    registry: &ColumnRegistry,
    samples: &[SensorSample],
    mut row: Row,
) -> AppResult<(Row, PendingBoxes)> {
    let unknown = |sensor: &SensorIdentity, identity: &SensorIdentity| {
        LoggerError::Configuration(format!(
            "sensor {sensor} reported {identity}, which has no column"
        ))
    };

    let mut pending = Vec::new();
    for sample in samples {
        match &sample.reading {
            CycleReading::Average(value) => {
                if registry.position(&sample.identity).is_none() {
                    return Err(unknown(&sample.identity, &sample.identity));
                }
                row.set(sample.identity.clone(), *value);
            }
            CycleReading::Channels(channels) if registry.is_unresolved_box(&sample.identity) => {
                pending.push((
                    sample.identity.clone(),
                    channels.iter().map(|(sub, _)| sub.clone()).collect(),
                ));
            }
            CycleReading::Channels(channels) => {
                for (sub, value) in channels {
                    if registry.position(sub).is_none() {
                        return Err(unknown(&sample.identity, sub));
                    }
                    row.set(sub.clone(), *value);
                }
            }
            CycleReading::Failed(_) => {}
        }
    }
    Ok((row, pending))
}

/// Start of the next cycle.
///
/// Fixed rate measures from the previous start and starts at once on overrun;
/// fixed delay measures from the previous end.
pub fn next_deadline(schedule: Schedule, start: Instant, end: Instant, interval: Duration) -> Instant {
    match schedule {
        Schedule::FixedRate => (start + interval).max(end),
        Schedule::FixedDelay => end + interval,
    }
}

/// Requests a running [`Engine`] to stop.
#[derive(Clone)]
pub struct EngineHandle {
    stop: Arc<watch::Sender<bool>>,
}

impl EngineHandle {
    /// Ask the engine to stop after the in-flight cycle and rotation.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }
}

/// Periodic sampling loop plus rotation timer.
pub struct Engine {
    coordinator: CycleCoordinator,
    registry: SharedRegistry,
    recorder: SharedRecorder,
    interval: Duration,
    schedule: Schedule,
    rotation_period: Duration,
    uploader: Arc<dyn Uploader>,
    stop: Arc<watch::Sender<bool>>,
}

impl Engine {
    /// Build sensors for every enabled spec through `drivers`.
    pub fn new(
        config: &LoggerConfig,
        drivers: &DriverRegistry,
        uploader: Arc<dyn Uploader>,
    ) -> AppResult<Self> {
        let samplers = config
            .enabled_sensors()
            .into_iter()
            .map(|spec| -> AppResult<Sampler> {
                Ok(Sampler::from_spec(drivers.create(spec)?, spec))
            })
            .collect::<AppResult<Vec<_>>>()?;
        Self::with_samplers(config, samplers, uploader)
    }

    /// Build the engine around pre-built samplers; columns come from the
    /// configuration.
    ///
    /// Every sampler must match an enabled sensor of `config` in identity and
    /// kind, at most one sampler per sensor. Enabled sensors without a sampler
    /// keep a NaN column.
    pub fn with_samplers(
        config: &LoggerConfig,
        samplers: Vec<Sampler>,
        uploader: Arc<dyn Uploader>,
    ) -> AppResult<Self> {
        let specs = config.enabled_sensors();
        let columns = ColumnRegistry::seed(specs.iter().copied())?;

        let mut seen = HashSet::new();
        for sampler in &samplers {
            let identity = sampler.identity();
            let spec = specs
                .iter()
                .find(|spec| &spec.identity == identity)
                .ok_or_else(|| {
                    LoggerError::Configuration(format!(
                        "sensor {identity} is not an enabled sensor of the configuration"
                    ))
                })?;
            if spec.kind != sampler.kind() {
                return Err(LoggerError::Configuration(format!(
                    "sensor {identity} is configured as {:?} but sampled as {:?}",
                    spec.kind,
                    sampler.kind()
                )));
            }
            if !seen.insert(identity.clone()) {
                return Err(LoggerError::Configuration(format!(
                    "sensor {identity} has more than one sampler"
                )));
            }
        }
        for spec in specs.iter().filter(|spec| !seen.contains(&spec.identity)) {
            tracing::warn!(sensor = %spec.identity, "No sampler for configured sensor, its column stays NaN");
        }

        let registry = Arc::new(RwLock::new(columns));
        let recorder = Arc::new(Mutex::new(Recorder::new(
            &config.storage,
            Arc::clone(&uploader),
        )));
        let coordinator = CycleCoordinator::new(
            samplers,
            Arc::clone(&registry),
            Arc::clone(&recorder),
            config.sampling.measurements_per_sample,
        );
        let (stop, _) = watch::channel(false);

        Ok(Self {
            coordinator,
            registry,
            recorder,
            interval: config.sampling.interval,
            schedule: config.sampling.schedule,
            rotation_period: config.storage.rotation_period,
            uploader,
            stop: Arc::new(stop),
        })
    }

    /// Handle for stopping the engine from another task.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            stop: Arc::clone(&self.stop),
        }
    }

    /// The cycle coordinator, for inspecting samplers and cycle counts.
    pub fn coordinator(&self) -> &CycleCoordinator {
        &self.coordinator
    }

    /// Shared column registry.
    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    /// Shared recorder.
    pub fn recorder(&self) -> SharedRecorder {
        Arc::clone(&self.recorder)
    }

    /// Connect all sensors; see [`CycleCoordinator::connect_all`].
    pub async fn connect_all(&mut self) -> usize {
        self.coordinator.connect_all().await
    }

    /// Run until stopped or until a fatal error.
    ///
    /// Opens the first file before the first cycle. On the way out the last
    /// file is closed and handed to the uploader, all sensors are disconnected
    /// and pending uploads are awaited, also when a loop failed.
    pub async fn run(&mut self) -> AppResult<()> {
        let opened = {
            let mut recorder = self.recorder.lock().await;
            let registry = self.registry.read().await;
            recorder.rotate(registry.columns())
        };
        if let Err(e) = opened {
            self.coordinator.disconnect_all().await;
            self.uploader.drain().await;
            return Err(e);
        }

        let rotation = tokio::spawn(rotation_loop(
            Arc::clone(&self.recorder),
            Arc::clone(&self.registry),
            self.rotation_period,
            Arc::clone(&self.stop),
        ));

        let sampling = self.sampling_loop().await;
        if let Err(e) = &sampling {
            tracing::error!(error = %e, "Sampling loop failed, stopping");
            self.stop.send_replace(true);
        }
        let rotation = rotation.await;

        let closed = self.recorder.lock().await.close();
        self.coordinator.disconnect_all().await;
        self.uploader.drain().await;
        tracing::info!(cycles = self.coordinator.cycles(), "Engine stopped");

        sampling?;
        rotation??;
        closed?;
        Ok(())
    }

    async fn sampling_loop(&mut self) -> AppResult<()> {
        let mut stop_rx = self.stop.subscribe();
        tracing::info!(
            interval = ?self.interval,
            schedule = ?self.schedule,
            "Sampling started"
        );
        loop {
            if *stop_rx.borrow_and_update() {
                return Ok(());
            }
            let start = Instant::now();
            self.coordinator.run_cycle().await?;
            let deadline = next_deadline(self.schedule, start, Instant::now(), self.interval);

            tokio::select! {
                _ = sleep_until(deadline) => {}
                _ = stop_rx.changed() => {}
            }
        }
    }
}

async fn rotation_loop(
    recorder: SharedRecorder,
    registry: SharedRegistry,
    period: Duration,
    stop: Arc<watch::Sender<bool>>,
) -> AppResult<()> {
    let mut stop_rx = stop.subscribe();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *stop_rx.borrow_and_update() {
            return Ok(());
        }
        tokio::select! {
            _ = ticker.tick() => {
                let mut recorder = recorder.lock().await;
                let registry = registry.read().await;
                if let Err(e) = recorder.rotate(registry.columns()) {
                    tracing::error!(error = %e, "Rotation failed, stopping");
                    stop.send_replace(true);
                    return Err(e);
                }
            }
            _ = stop_rx.changed() => {}
        }
    }
}
