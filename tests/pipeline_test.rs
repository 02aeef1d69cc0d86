//! End-to-end tests: simulated sensors and actuators through the engine

use std::sync::{Arc, Mutex};
use std::time::Duration;
use stopme_agent::actuator::{
    ActuationParams, ActuatorId, ActuatorKind, ActuatorControls, SimulatedActuator,
};
use stopme_agent::collector::{FeatureType, SimulatedSensor};
use stopme_agent::config::{Config, DeviceClassConfig, SensorConfig, Thresholds};
use stopme_agent::core::{stereotypy_label, EnqueueMode, Label, Window};
use stopme_agent::error::ClassifierError;
use stopme_agent::transparency::{
    create_shared_log, create_shared_log_with_persistence, MemoryLogger, SharedLogger,
    TransparencyLog,
};
use stopme_agent::{Engine, EngineParts, StartupError};

fn fast_class() -> DeviceClassConfig {
    DeviceClassConfig {
        scan_timeout: Duration::from_secs(1),
        fast_retry_attempts: 3,
        retry_interval: Duration::from_millis(10),
        retry_sleep: Duration::from_millis(50),
    }
}

fn base_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.sensors.clear();
    config.actuators.clear();
    config.sensor_link = fast_class();
    config.led_strip = fast_class();
    config.speaker = fast_class();
    config.vibration = fast_class();
    config.data_path = dir.to_path_buf();
    config.logging.log_base_path = dir.join("logs");
    config
}

fn sensor(id: &str, feature: FeatureType) -> SensorConfig {
    SensorConfig {
        id: id.to_string(),
        name: id.to_uppercase(),
        feature,
        thresholds: None,
        hysteresis: 0.0,
        enqueue: EnqueueMode::DropNewest,
    }
}

fn temperature_sensor() -> SensorConfig {
    SensorConfig {
        thresholds: Some(Thresholds {
            low: 34.0,
            medium: 36.0,
            high: 38.0,
        }),
        ..sensor("bc_temperature", FeatureType::Temperature)
    }
}

/// Register a LED strip and a vibration band, returning their controls.
fn add_actuators(parts: &mut EngineParts) -> (ActuatorControls, ActuatorControls) {
    let led = SimulatedActuator::new(ActuatorKind::LedStrip);
    let meta = SimulatedActuator::new(ActuatorKind::VibrationMotor);
    let controls = (led.controls(), meta.controls());
    parts.actuators.push((ActuatorId::new("led_1"), Box::new(led)));
    parts.actuators.push((ActuatorId::new("meta_1"), Box::new(meta)));
    controls
}

#[test]
fn test_temperature_ramp_emits_three_escalating_events() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.sensors = vec![temperature_sensor()];

    let memory = Arc::new(MemoryLogger::new());
    let logger: SharedLogger = memory.clone();
    let stats = create_shared_log_with_persistence(config.stats_path());

    let mut parts = EngineParts::default();
    let (led, _) = add_actuators(&mut parts);
    parts.sensors.push(Box::new(SimulatedSensor::temperature(
        "bc_temperature",
        &[33.0, 35.0, 37.0, 39.0],
        Duration::from_millis(10),
    )));

    let engine = Engine::start(&config, parts, logger, stats).unwrap();
    assert!(memory.wait_for_events(3, Duration::from_secs(5)));
    std::thread::sleep(Duration::from_millis(200));
    engine.shutdown();

    let records = memory.events();
    let labels: Vec<&str> = records.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["MEDIUM", "HIGH", "CRITICAL"]);

    for record in &records {
        assert_eq!(record.actuations.len(), 1);
        assert_eq!(record.succeeded(), 1);
    }

    // One actuation per transition, each stronger than the last
    let colors: Vec<[u8; 4]> = led
        .commands()
        .into_iter()
        .filter_map(|(_, params)| match params {
            ActuationParams::Light { color, .. } => Some(color),
            _ => None,
        })
        .collect();
    assert_eq!(
        colors,
        vec![[255, 255, 0, 0], [255, 165, 0, 0], [255, 0, 0, 0]]
    );

    let persisted = TransparencyLog::read_persisted(&config.stats_path()).unwrap();
    assert_eq!(persisted.events_dispatched, 3);
    assert_eq!(persisted.samples_received, 4);
}

/// The stateless activity mapper logs every sample as an event; the policy
/// cooldown is what keeps the feedback to a single actuation.
#[test]
fn test_constant_activity_logs_every_event_but_actuates_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.sensors = vec![sensor("bc_activity", FeatureType::Activity)];

    let memory = Arc::new(MemoryLogger::new());
    let logger: SharedLogger = memory.clone();

    let mut parts = EngineParts::default();
    let (led, meta) = add_actuators(&mut parts);
    parts.sensors.push(Box::new(SimulatedSensor::activity(
        "bc_activity",
        &[2; 10],
        Duration::from_millis(5),
    )));

    let engine = Engine::start(&config, parts, logger, create_shared_log()).unwrap();
    assert!(memory.wait_for_events(10, Duration::from_secs(5)));
    engine.shutdown();

    let records = memory.events();
    assert_eq!(records.len(), 10);
    let actuated: Vec<_> = records.iter().filter(|r| r.has_actuations()).collect();
    assert_eq!(actuated.len(), 1);
    assert_eq!(actuated[0].label, Label::new("WALKING"));
    assert_eq!(led.commands().len() + meta.commands().len(), 1);
}

#[test]
fn test_logged_outcomes_match_actuator_results() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.sensors = vec![temperature_sensor()];

    let memory = Arc::new(MemoryLogger::new());
    let logger: SharedLogger = memory.clone();
    let stats = create_shared_log();

    let mut parts = EngineParts::default();
    let (led, _) = add_actuators(&mut parts);
    led.fail_executes(true);
    parts.sensors.push(Box::new(SimulatedSensor::temperature(
        "bc_temperature",
        &[35.0, 37.0],
        Duration::from_millis(10),
    )));

    let engine = Engine::start(&config, parts, logger, stats.clone()).unwrap();
    assert!(memory.wait_for_events(2, Duration::from_secs(5)));
    engine.shutdown();

    for record in memory.events() {
        assert_eq!(record.actuations.len(), 1);
        assert!(!record.actuations[0].outcome.is_success());
    }
    assert_eq!(stats.stats().actuations_failed, 2);
    assert_eq!(stats.stats().actuations_succeeded, 0);
    assert!(memory.system_contains("Error triggering actuator"));
}

#[test]
fn test_imu_group_runs_through_classifier() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.sensors = vec![sensor("bc_left", FeatureType::Imu)];
    config.sync.sources = vec!["bc_left".into()];
    config.window.capacity = 10;
    config.window.hop = 10;
    config.window.warmup_windows = 1;

    let memory = Arc::new(MemoryLogger::new());
    let logger: SharedLogger = memory.clone();
    let stats = create_shared_log();

    let calls: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = calls.clone();
    let classifier = move |window: &Window, calibrate: bool| -> Result<Label, ClassifierError> {
        seen.lock().unwrap().push(calibrate && window.len() == 10);
        Ok(stereotypy_label(2))
    };

    let mut parts = EngineParts::default();
    let (led, _) = add_actuators(&mut parts);
    parts.classifier = Some(Box::new(classifier));
    parts.sensors.push(Box::new(SimulatedSensor::imu(
        "bc_left",
        60,
        Duration::from_millis(5),
    )));

    let engine = Engine::start(&config, parts, logger, stats.clone()).unwrap();
    assert!(memory.wait_for_events(2, Duration::from_secs(5)));
    engine.shutdown();

    let records = memory.events();
    assert!(records[0].gated);
    assert!(records[0].actuations.is_empty());
    assert_eq!(records[0].source_id, "dual_wrist");
    assert_eq!(records[0].feature_type, FeatureType::Imu);

    assert!(!records[1].gated);
    assert_eq!(records[1].label.as_str(), "DANGEROUS");
    assert!(records[1].has_actuations());
    assert!(!led.commands().is_empty());

    let calls = calls.lock().unwrap();
    assert!(calls[0]);
    assert!(calls[1..].iter().all(|c| !c));
    assert_eq!(stats.stats().windows_skipped, 1);
    assert!(stats.stats().tuples_synced >= 20);
}

#[test]
fn test_unreachable_sensors_do_not_stop_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.sensors = vec![temperature_sensor()];

    let memory = Arc::new(MemoryLogger::new());
    let logger: SharedLogger = memory.clone();

    let mut parts = EngineParts::default();
    add_actuators(&mut parts);
    parts.sensors.push(Box::new(
        SimulatedSensor::temperature("bc_temperature", &[35.0], Duration::from_millis(5))
            .unreachable(),
    ));

    let engine = Engine::start(&config, parts, logger, create_shared_log()).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    engine.shutdown();

    assert!(memory.system_contains("Not reachable at startup"));
    assert!(memory.system_contains("No sensor reachable at startup"));
    assert!(memory.system_contains("STOPme agent stopped"));
    assert!(memory.events().is_empty());
}

#[test]
fn test_missing_classifier_fails_before_anything_starts() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.sensors = vec![sensor("bc_left", FeatureType::Imu)];
    config.sync.sources = vec!["bc_left".into()];

    let memory = Arc::new(MemoryLogger::new());
    let logger: SharedLogger = memory.clone();

    let mut parts = EngineParts::default();
    let (led, meta) = add_actuators(&mut parts);
    parts.sensors.push(Box::new(SimulatedSensor::imu(
        "bc_left",
        10,
        Duration::from_millis(5),
    )));

    let result = Engine::start(&config, parts, logger, create_shared_log());
    assert!(matches!(result, Err(StartupError::Config(_))));

    std::thread::sleep(Duration::from_millis(100));
    assert!(led.connect_attempts().is_empty());
    assert!(meta.connect_attempts().is_empty());
    assert!(!memory.system_contains("[Dispatcher] Started"));
    assert!(!memory.system_contains("starting on"));
}
