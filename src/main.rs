//! CLI Entry Point for sensor-logger
//!
//! Provides command-line interface for:
//! - Running the logger until Ctrl+C
//! - Checking a configuration file without touching hardware
//! - Probing every configured sensor with one test sample
//!
//! # Usage
//!
//! ```bash
//! sensor-logger run --config config/logger.toml
//! sensor-logger check
//! sensor-logger probe
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sensor_logger::config::{LoggerConfig, DEFAULT_CONFIG_PATH};
use sensor_logger::hardware::DriverRegistry;
use sensor_logger::sampler::{CycleReading, Sampler};
use sensor_logger::{logging, upload, Engine};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "sensor-logger")]
#[command(about = "Periodic multi-sensor sampling into rotating CSV files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample all sensors until interrupted
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Load and validate the configuration, then print a summary
    Check {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Connect to every sensor and take a single test sample, without writing
    Probe {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(&config).await,
        Commands::Check { config } => check(&config),
        Commands::Probe { config } => probe(&config).await,
    }
}

fn load(path: &Path) -> Result<LoggerConfig> {
    let config = LoggerConfig::load_from(path)
        .with_context(|| format!("loading {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

async fn run(path: &Path) -> Result<()> {
    let config = load(path)?;
    logging::init_from_config(&config)?;
    tracing::info!(app = %config.application.name, config = %path.display(), "Starting sensor logger");

    let uploader = upload::from_config(&config.upload)?;
    let mut engine = Engine::new(&config, &DriverRegistry::new(), uploader)?;
    engine.connect_all().await;

    let handle = engine.handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupt received, finishing the current cycle");
                handle.stop();
            }
            Err(e) => tracing::error!(error = %e, "Could not listen for Ctrl+C"),
        }
    });

    engine.run().await?;
    Ok(())
}

fn check(path: &Path) -> Result<()> {
    let config = load(path)?;
    let drivers = DriverRegistry::new();

    println!("✅ {} is valid", path.display());
    println!("   Interval: {:?} ({:?})", config.sampling.interval, config.sampling.schedule);
    println!("   Measurements per sample: {}", config.sampling.measurements_per_sample);
    println!(
        "   Output: {}/{}_*.csv, rotated every {:?}",
        config.storage.output_dir.display(),
        config.storage.file_prefix,
        config.storage.rotation_period
    );
    match (config.upload.enabled, &config.upload.destination) {
        (true, Some(dest)) => println!("   Upload: copy to {}", dest.display()),
        _ => println!("   Upload: disabled"),
    }
    println!("   Sensors:");
    for spec in &config.sensors {
        let status = match (spec.enabled, drivers.is_available(&spec.driver)) {
            (false, _) => "disabled",
            (true, true) => "ok",
            (true, false) => "unknown driver",
        };
        println!(
            "     - {} [{:?}, driver {}] {}: {}",
            spec.identity, spec.kind, spec.driver, spec.label(), status
        );
    }
    Ok(())
}

async fn probe(path: &Path) -> Result<()> {
    let config = load(path)?;
    logging::init_from_config(&config)?;
    let drivers = DriverRegistry::new();

    println!("🔧 Probing {} sensors...", config.enabled_sensors().len());
    for spec in config.enabled_sensors() {
        let mut sampler = Sampler::from_spec(drivers.create(spec)?, spec);
        if let Err(e) = sampler.connect().await {
            println!("   ❌ {}: {}", spec.identity, e);
            continue;
        }
        let sample = sampler.sample(config.sampling.measurements_per_sample).await;
        match sample.reading {
            CycleReading::Average(value) => println!("   ✅ {}: {value}", spec.identity),
            CycleReading::Channels(channels) => {
                println!("   ✅ {}:", spec.identity);
                for (sub, value) in channels {
                    println!("      {sub}: {value}");
                }
            }
            CycleReading::Failed(reason) => println!("   ❌ {}: {reason}", spec.identity),
        }
        if let Err(e) = sampler.disconnect().await {
            tracing::warn!(sensor = %spec.identity, error = %e, "Disconnect failed");
        }
    }
    Ok(())
}
