//! STOPme agent CLI
//!
//! Multisensory feedback from wearable sensor streams.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use stopme_agent::{
    actuator::{Actuator, ActuatorId, ActuatorKind, LogActuator, SimulatedActuator},
    collector::{FeatureType, SensorLink, SimulatedSensor},
    config::{ActuatorConfig, Config, SensorConfig, Thresholds},
    core::{Classifier, EnqueueMode, MotionEnergyClassifier},
    transparency::{
        create_shared_log, create_shared_log_with_persistence, FileLogger, MemoryLogger,
        SharedLogger, TransparencyLog,
    },
    Engine, EngineParts, VERSION,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stopme")]
#[command(version = VERSION)]
#[command(about = "Multisensory feedback agent for wearable sensor streams", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the pipeline with the configured sensors and actuators
    Run {
        /// Configuration file (defaults to the user config directory)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Stop after this many seconds instead of waiting for Ctrl+C
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Run a scripted scenario end-to-end and print the diary
    Simulate {
        #[arg(long, value_enum, default_value = "temperature")]
        scenario: Scenario,
    },

    /// Show persisted transparency statistics
    Status {
        #[arg(long, short)]
        config: Option<PathBuf>,
    },

    /// Show the effective configuration
    Config {
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Check the configuration and exit non-zero if it is invalid
        #[arg(long)]
        validate: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Scenario {
    /// Rising skin temperature crossing every threshold
    Temperature,
    /// Activity codes from stationary to running
    Activity,
    /// Dual-wrist inertial streams through the classifier
    Imu,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, duration } => cmd_run(config.as_deref(), duration),
        Commands::Simulate { scenario } => cmd_simulate(scenario),
        Commands::Status { config } => cmd_status(config.as_deref()),
        Commands::Config { config, validate } => cmd_config(config.as_deref(), validate),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.map_or_else(Config::config_path, Path::to_path_buf);
    let config = Config::load_from(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded configuration");
    Ok(config)
}

fn cmd_run(path: Option<&Path>, duration: Option<u64>) -> Result<()> {
    println!("STOPme Agent v{VERSION}");
    println!();

    let config = load_config(path)?;
    config.validate().context("invalid configuration")?;
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let logger: SharedLogger =
        Arc::new(FileLogger::new(&config.logging).context("failed to open the diary")?);
    let stats = create_shared_log_with_persistence(config.stats_path());

    println!("Sensors:");
    for sensor in &config.sensors {
        println!("  {} ({}, {})", sensor.id, sensor.name, sensor.feature);
    }
    println!("Actuators:");
    for actuator in &config.actuators {
        println!("  {} ({})", actuator.id, actuator.kind);
    }
    println!("Diary: {:?}", config.logging.log_base_path);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let parts = simulated_parts(&config, &logger, true);
    let engine = Engine::start(&config, parts, logger, stats.clone())
        .context("failed to start the pipeline")?;

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    let started = Instant::now();
    let limit = duration.map(Duration::from_secs);
    while running.load(Ordering::SeqCst) {
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }

    println!();
    println!("Stopping...");
    engine.shutdown();

    println!();
    println!("{}", stats.summary());
    Ok(())
}

/// Bind every configured device to a simulated link. Radio drivers are
/// provided outside this crate.
fn simulated_parts(config: &Config, logger: &SharedLogger, repeat: bool) -> EngineParts {
    let sensors: Vec<Box<dyn SensorLink>> = config
        .sensors
        .iter()
        .map(|sensor| simulated_sensor(sensor, repeat))
        .collect();

    let actuators: Vec<(ActuatorId, Box<dyn Actuator>)> = config
        .actuators
        .iter()
        .map(|actuator| {
            let device: Box<dyn Actuator> = match actuator.kind {
                ActuatorKind::Logger => {
                    Box::new(LogActuator::new(actuator.id.clone(), logger.clone()))
                }
                kind => Box::new(SimulatedActuator::new(kind)),
            };
            (ActuatorId::new(actuator.id.clone()), device)
        })
        .collect();

    let classifier = (!config.sync.sources.is_empty())
        .then(|| Box::new(MotionEnergyClassifier::new()) as Box<dyn Classifier>);

    EngineParts {
        sensors,
        actuators,
        classifier,
    }
}

fn simulated_sensor(sensor: &SensorConfig, repeat: bool) -> Box<dyn SensorLink> {
    let link = match sensor.feature {
        FeatureType::Temperature => {
            let t = sensor.thresholds.unwrap_or_default();
            let values = [
                t.low - 1.0,
                t.low + 0.5,
                t.medium + 0.5,
                t.high + 0.5,
                t.high + 1.0,
                t.medium - 0.5,
                t.low - 1.0,
            ];
            SimulatedSensor::temperature(sensor.id.clone(), &values, Duration::from_secs(2))
        }
        FeatureType::Activity => SimulatedSensor::activity(
            sensor.id.clone(),
            &[1, 2, 2, 3, 3, 4, 4, 2, 1],
            Duration::from_secs(2),
        ),
        _ => SimulatedSensor::imu(sensor.id.clone(), 1500, Duration::from_millis(20)),
    };
    Box::new(link.with_repeat(repeat))
}

fn scenario_config(scenario: Scenario) -> Config {
    let mut config = Config::default();
    config.policy.cooldown = Duration::from_millis(200);
    config.actuators = vec![
        ActuatorConfig::new("led_1", ActuatorKind::LedStrip),
        ActuatorConfig::new("speaker_1", ActuatorKind::Speaker),
        ActuatorConfig::new("meta_1", ActuatorKind::VibrationMotor),
        ActuatorConfig::new("diary", ActuatorKind::Logger),
    ];

    let sensor = |id: &str, feature: FeatureType| SensorConfig {
        id: id.to_string(),
        name: id.to_uppercase(),
        feature,
        thresholds: None,
        hysteresis: 0.0,
        enqueue: EnqueueMode::DropNewest,
    };

    match scenario {
        Scenario::Temperature => {
            config.sensors = vec![SensorConfig {
                thresholds: Some(Thresholds::default()),
                hysteresis: 0.5,
                ..sensor("bc_temperature", FeatureType::Temperature)
            }];
        }
        Scenario::Activity => {
            config.sensors = vec![sensor("bc_activity", FeatureType::Activity)];
        }
        Scenario::Imu => {
            config.sensors = vec![
                sensor("bc_left", FeatureType::Imu),
                sensor("bc_right", FeatureType::Imu),
            ];
            config.sync.sources = vec!["bc_left".into(), "bc_right".into()];
            config.window.capacity = 50;
            config.window.hop = 25;
            config.window.warmup_windows = 1;
        }
    }
    config
}

fn scenario_links(scenario: Scenario) -> (Vec<Box<dyn SensorLink>>, Duration) {
    let step = Duration::from_millis(50);
    let mut links: Vec<Box<dyn SensorLink>> = Vec::new();
    let length = match scenario {
        Scenario::Temperature => {
            let values = [27.0, 29.0, 31.0, 33.0, 35.0, 37.0, 37.5, 38.0, 35.0, 31.0, 26.0];
            links.push(Box::new(SimulatedSensor::temperature(
                "bc_temperature",
                &values,
                step,
            )));
            step * values.len() as u32
        }
        Scenario::Activity => {
            let codes = [1, 2, 2, 2, 2, 3, 3, 4, 4, 4, 1];
            links.push(Box::new(SimulatedSensor::activity("bc_activity", &codes, step)));
            step * codes.len() as u32
        }
        Scenario::Imu => {
            let tick = Duration::from_millis(20);
            let ticks = 600;
            links.push(Box::new(SimulatedSensor::imu("bc_left", ticks, tick)));
            links.push(Box::new(SimulatedSensor::imu("bc_right", ticks, tick)));
            tick * ticks as u32
        }
    };
    (links, length)
}

fn cmd_simulate(scenario: Scenario) -> Result<()> {
    let config = scenario_config(scenario);
    let memory = Arc::new(MemoryLogger::new());
    let logger: SharedLogger = memory.clone();
    let stats = create_shared_log();

    let mut parts = simulated_parts(&config, &logger, false);
    let (sensors, length) = scenario_links(scenario);
    parts.sensors = sensors;

    let engine = Engine::start(&config, parts, logger, stats.clone())
        .context("failed to start the pipeline")?;
    thread::sleep(length + Duration::from_millis(500));
    engine.shutdown();

    println!("Event diary");
    println!("===========");
    for record in memory.events() {
        println!(
            "[{}] {} - {} - {} - {}",
            record.timestamp.format("%H:%M:%S%.3f"),
            record.source_id,
            record.feature_type.as_str().to_uppercase(),
            record.label,
            record.render_actuations(true)
        );
    }
    println!();
    println!("System log");
    println!("==========");
    for record in memory.system_records() {
        println!(
            "[{}] {} - {}",
            record.timestamp.format("%H:%M:%S%.3f"),
            record.severity,
            record.message
        );
    }
    println!();
    println!("{}", stats.summary());
    Ok(())
}

fn cmd_status(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;

    println!("STOPme Agent Status");
    println!("===================");
    println!();
    println!("Configuration:");
    println!("  Sensors: {}", config.sensors.len());
    println!("  Actuators: {}", config.actuators.len());
    println!("  Synchronized sources: {}", config.sync.sources.join(", "));
    println!("  Diary: {:?}", config.logging.log_base_path);
    println!();

    let stats_path = config.stats_path();
    if !stats_path.exists() {
        println!("No previous session data found.");
        return Ok(());
    }

    let stats = TransparencyLog::read_persisted(&stats_path)
        .with_context(|| format!("failed to read {}", stats_path.display()))?;
    println!("Cumulative Statistics (as of {}):", stats.last_updated);
    println!("  Samples received: {}", stats.samples_received);
    println!("  Samples dropped: {}", stats.samples_dropped);
    println!("  Samples unmatched: {}", stats.samples_unmatched);
    println!("  Windows classified: {}", stats.windows_classified);
    println!("  Events dispatched: {}", stats.events_dispatched);
    println!("  Events dropped: {}", stats.events_dropped);
    println!(
        "  Actuations: {} succeeded, {} failed",
        stats.actuations_succeeded, stats.actuations_failed
    );
    println!("  Reconnections: {}", stats.reconnections);
    Ok(())
}

fn cmd_config(path: Option<&Path>, validate: bool) -> Result<()> {
    let config = load_config(path)?;

    println!("Configuration");
    println!("=============");
    println!();
    println!(
        "Config file: {:?}",
        path.map_or_else(Config::config_path, Path::to_path_buf)
    );
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);

    if validate {
        config.validate().context("configuration is invalid")?;
        println!();
        println!("Configuration is valid.");
    }
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");
}
