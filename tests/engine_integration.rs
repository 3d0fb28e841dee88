//! End-to-end tests of the sampling engine with mock sensors.

use sensor_logger::config::{LoggerConfig, SensorKind};
use sensor_logger::core::Uploader;
use sensor_logger::hardware::{DriverRegistry, MockSensor};
use sensor_logger::sampler::Sampler;
use sensor_logger::upload::LocalCopyUploader;
use sensor_logger::{Engine, LoggerError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingUploader {
    submitted: Mutex<Vec<PathBuf>>,
}

impl Uploader for RecordingUploader {
    fn submit(&self, path: &Path) {
        self.submitted.lock().unwrap().push(path.to_path_buf());
    }
}

impl RecordingUploader {
    fn files(&self) -> Vec<PathBuf> {
        self.submitted.lock().unwrap().clone()
    }
}

fn test_config(dir: &Path, interval: &str, rotation: &str) -> LoggerConfig {
    let toml_str = format!(
        r#"
        [sampling]
        interval = "{interval}"
        measurements_per_sample = 2

        [storage]
        rotation_period = "{rotation}"

        [[sensors]]
        identity = "tmp-1"
        measurement = "Temperature"
        frequency_hz = 1000.0
        options = {{ base = 21.0, noise = 0.0 }}

        [[sensors]]
        identity = "alu-box"
        kind = "box"
        driver = "mock_box"
        frequency_hz = 1000.0
        measurement = "Alu"
        options = {{ base = 10.0, noise = 0.0, channels = ["alu-1", "alu-2"] }}
        "#
    );
    let mut config = LoggerConfig::from_toml_str(&toml_str).expect("Failed to parse test config");
    config.storage.output_dir = dir.join("csv");
    config.validate().expect("Test config should be valid");
    config
}

fn lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

async fn run_for(engine: &mut Engine, duration: Duration) -> Result<(), LoggerError> {
    let handle = engine.handle();
    let (result, ()) = tokio::join!(engine.run(), async move {
        tokio::time::sleep(duration).await;
        handle.stop();
    });
    result
}

#[tokio::test]
async fn test_engine_writes_rows_until_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), "20ms", "1h");
    let uploader = Arc::new(RecordingUploader::default());

    let tmp = MockSensor::simple("tmp-1").with_signal(21.0, 0.0);
    let tmp_stats = tmp.stats();
    let boxed = MockSensor::multiplexed("alu-box", ["alu-1", "alu-2"]).with_signal(10.0, 0.0);
    let samplers = vec![
        Sampler::new(Box::new(tmp), SensorKind::Simple, 1),
        Sampler::new(Box::new(boxed), SensorKind::Box, 2),
    ];
    let mut engine = Engine::with_samplers(&config, samplers, uploader.clone()).unwrap();
    assert_eq!(engine.connect_all().await, 2);

    run_for(&mut engine, Duration::from_millis(250)).await.unwrap();

    assert!(engine.coordinator().cycles() >= 3);
    assert_eq!(tmp_stats.disconnect_calls(), 1);
    assert!(engine.recorder().lock().await.current_path().is_none());

    // First cycle resolves the box: one file with the placeholder, then the expanded one.
    let files = uploader.files();
    assert_eq!(files.len(), 2);
    let first = lines(&files[0]);
    assert_eq!(first[0], "Timestamp,Temperature from tmp-1,Alu from alu-box");
    assert_eq!(first.len(), 2);

    let second = lines(&files[1]);
    assert_eq!(
        second[0],
        "Timestamp,Temperature from tmp-1,Alu from alu-1,Alu from alu-2"
    );
    assert!(second.len() >= 3);
    for row in &second[1..] {
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields.len(), 4);
        assert_eq!(&fields[1..], &["21.0", "10.0", "11.0"]);
    }
}

#[tokio::test]
async fn test_rotation_timer_hands_every_file_to_uploader() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), "20ms", "100ms");
    let uploader = Arc::new(RecordingUploader::default());

    let mut engine = Engine::new(&config, &DriverRegistry::new(), uploader.clone()).unwrap();
    engine.connect_all().await;
    run_for(&mut engine, Duration::from_millis(450)).await.unwrap();

    let files = uploader.files();
    assert!(files.len() >= 4, "expected several rotations, got {files:?}");
    let mut unique = files.clone();
    unique.dedup();
    assert_eq!(unique.len(), files.len());

    for file in &files {
        let content = lines(file);
        let columns = content[0].split(',').count();
        assert!(content[0].starts_with("Timestamp,"));
        assert!(content[1..]
            .iter()
            .all(|row| row.split(',').count() == columns));
    }

    let registry = engine.registry();
    let ids: Vec<String> = registry
        .read()
        .await
        .columns()
        .iter()
        .map(|c| c.identity.to_string())
        .collect();
    assert_eq!(ids, vec!["tmp-1", "alu-1", "alu-2"]);
}

#[tokio::test]
async fn test_unreachable_sensor_reports_nan() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), "20ms", "1h");
    let uploader = Arc::new(RecordingUploader::default());

    let tmp = MockSensor::simple("tmp-1").with_connect_failure("host unreachable");
    let tmp_stats = tmp.stats();
    let boxed = MockSensor::multiplexed("alu-box", ["alu-1", "alu-2"]).with_signal(10.0, 0.0);
    let samplers = vec![
        Sampler::new(Box::new(tmp), SensorKind::Simple, 1),
        Sampler::new(Box::new(boxed), SensorKind::Box, 2),
    ];
    let mut engine = Engine::with_samplers(&config, samplers, uploader.clone()).unwrap();
    assert_eq!(engine.connect_all().await, 1);

    run_for(&mut engine, Duration::from_millis(150)).await.unwrap();

    assert_eq!(tmp_stats.acquire_calls(), 0);
    let files = uploader.files();
    let last = lines(files.last().unwrap());
    assert!(last.len() >= 2);
    assert!(last[1..].iter().all(|row| row.split(',').nth(1) == Some("nan")));
}

#[tokio::test]
async fn test_unknown_sampler_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), "1s", "1h");
    let stray = Sampler::new(Box::new(MockSensor::simple("pressure-9")), SensorKind::Simple, 1);

    let result = Engine::with_samplers(&config, vec![stray], Arc::new(RecordingUploader::default()));
    assert!(matches!(result, Err(LoggerError::Configuration(_))));
}

#[tokio::test]
async fn test_duplicate_sampler_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), "1s", "1h");
    let samplers = vec![
        Sampler::new(Box::new(MockSensor::simple("tmp-1")), SensorKind::Simple, 1),
        Sampler::new(Box::new(MockSensor::simple("tmp-1")), SensorKind::Simple, 1),
    ];

    let err = Engine::with_samplers(&config, samplers, Arc::new(RecordingUploader::default()))
        .err()
        .unwrap();
    assert!(matches!(&err, LoggerError::Configuration(msg) if msg.contains("tmp-1")));
}

#[tokio::test]
async fn test_sampler_kind_must_match_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), "1s", "1h");
    // alu-box is configured as a box sensor.
    let samplers = vec![Sampler::new(
        Box::new(MockSensor::simple("alu-box")),
        SensorKind::Simple,
        1,
    )];

    let err = Engine::with_samplers(&config, samplers, Arc::new(RecordingUploader::default()))
        .err()
        .unwrap();
    assert!(matches!(&err, LoggerError::Configuration(msg) if msg.contains("alu-box")));
}

#[tokio::test]
async fn test_stop_lets_in_flight_cycle_finish() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), "20ms", "1h");
    let uploader = Arc::new(RecordingUploader::default());

    // Two readings per sample at 40ms each: every acquisition takes 80ms.
    let tmp = MockSensor::simple("tmp-1")
        .with_signal(21.0, 0.0)
        .with_pace(Duration::from_millis(40));
    let tmp_stats = tmp.stats();
    let samplers = vec![Sampler::new(Box::new(tmp), SensorKind::Simple, 1)];
    let mut engine = Engine::with_samplers(&config, samplers, uploader.clone()).unwrap();
    engine.connect_all().await;

    // Stop lands inside the second acquisition.
    run_for(&mut engine, Duration::from_millis(100)).await.unwrap();

    let files = uploader.files();
    assert_eq!(files.len(), 1);
    let content = lines(&files[0]);
    assert_eq!(content[0], "Timestamp,Temperature from tmp-1,Alu from alu-box");
    let rows = &content[1..];
    assert!(tmp_stats.acquire_calls() >= 2);
    assert_eq!(rows.len(), tmp_stats.acquire_calls());
    assert_eq!(engine.coordinator().cycles() as usize, rows.len());
    for row in rows {
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(&fields[1..], &["21.0", "nan"]);
    }
}

#[test]
fn test_last_file_is_uploaded_before_runtime_shuts_down() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), "20ms", "1h");
    let destination = dir.path().join("drive");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let uploader = Arc::new(LocalCopyUploader::new(&destination).unwrap());
        let samplers = vec![Sampler::new(
            Box::new(MockSensor::simple("tmp-1").with_signal(21.0, 0.0)),
            SensorKind::Simple,
            1,
        )];
        let mut engine = Engine::with_samplers(&config, samplers, uploader).unwrap();
        engine.connect_all().await;
        run_for(&mut engine, Duration::from_millis(60)).await.unwrap();
    });
    drop(runtime);

    let written: Vec<PathBuf> = std::fs::read_dir(dir.path().join("csv"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(written.len(), 1);
    let name = written[0].file_name().unwrap();
    let copied = destination.join(name);
    assert!(copied.exists(), "{} was not uploaded", copied.display());
    assert_eq!(lines(&copied), lines(&written[0]));
    assert!(lines(&copied).len() >= 2);
}

#[tokio::test]
async fn test_unwritable_output_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), "20ms", "1h");
    // A regular file where the output directory should be.
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();
    config.storage.output_dir = blocker.join("csv");

    let tmp = MockSensor::simple("tmp-1");
    let tmp_stats = tmp.stats();
    let samplers = vec![Sampler::new(Box::new(tmp), SensorKind::Simple, 1)];
    let mut engine =
        Engine::with_samplers(&config, samplers, Arc::new(RecordingUploader::default())).unwrap();
    engine.connect_all().await;

    let err = engine.run().await.unwrap_err();
    assert!(matches!(err, LoggerError::Io(_)));
    assert!(err.is_fatal());
    assert_eq!(tmp_stats.acquire_calls(), 0);
    assert_eq!(tmp_stats.disconnect_calls(), 1);
}
