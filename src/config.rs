//! Configuration for the STOPme agent.
//!
//! Read once at startup. Any validation failure is a [`ConfigError`] and the
//! pipeline never starts.

use crate::actuator::ActuatorKind;
use crate::collector::FeatureType;
use crate::core::queue::EnqueueMode;
use crate::core::synchronizer::LateSamplePolicy;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sensors to bind to feature listeners
    pub sensors: Vec<SensorConfig>,

    /// Actuators to register with the manager
    pub actuators: Vec<ActuatorConfig>,

    /// Connection policy for sensor links
    pub sensor_link: DeviceClassConfig,

    /// Connection policy per actuator class
    pub led_strip: DeviceClassConfig,
    pub speaker: DeviceClassConfig,
    pub vibration: DeviceClassConfig,

    pub listener: ListenerConfig,
    pub sync: SyncConfig,
    pub window: WindowConfig,
    pub queue: QueueConfig,
    pub policy: PolicyConfig,
    pub logging: LoggingConfig,

    /// Path for persisted transparency statistics
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stopme-agent");

        Self {
            sensors: vec![
                SensorConfig {
                    id: "bc_temperature".to_string(),
                    name: "BCN-TEMP".to_string(),
                    feature: FeatureType::Temperature,
                    thresholds: Some(Thresholds::default()),
                    hysteresis: 0.0,
                    enqueue: EnqueueMode::DropNewest,
                },
                SensorConfig {
                    id: "bc_activity".to_string(),
                    name: "BCN-ACT".to_string(),
                    feature: FeatureType::Activity,
                    thresholds: None,
                    hysteresis: 0.0,
                    enqueue: EnqueueMode::DropNewest,
                },
            ],
            actuators: vec![
                ActuatorConfig::new("led_192.168.1.100", ActuatorKind::LedStrip),
                ActuatorConfig::new("speaker_00:11:22:33:44:55", ActuatorKind::Speaker),
                ActuatorConfig::new("meta_F1:E2:D3:C4:B5:A6", ActuatorKind::VibrationMotor),
            ],
            sensor_link: DeviceClassConfig::default(),
            led_strip: DeviceClassConfig::default(),
            speaker: DeviceClassConfig::default(),
            vibration: DeviceClassConfig {
                fast_retry_attempts: 10,
                ..DeviceClassConfig::default()
            },
            listener: ListenerConfig::default(),
            sync: SyncConfig::default(),
            window: WindowConfig::default(),
            queue: QueueConfig::default(),
            policy: PolicyConfig::default(),
            logging: LoggingConfig {
                log_base_path: data_dir.join("logs"),
                ..LoggingConfig::default()
            },
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path, falling back to defaults
    /// when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
            let config: Config =
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the given path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stopme-agent")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.logging.log_base_path)
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    /// Path of the persisted transparency statistics.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("transparency.json")
    }

    pub fn sensor(&self, id: &str) -> Option<&SensorConfig> {
        self.sensors.iter().find(|s| s.id == id)
    }

    /// Connection policy for an actuator class.
    pub fn device_class(&self, kind: ActuatorKind) -> &DeviceClassConfig {
        match kind {
            ActuatorKind::LedStrip => &self.led_strip,
            ActuatorKind::Speaker => &self.speaker,
            ActuatorKind::VibrationMotor | ActuatorKind::Logger => &self.vibration,
        }
    }

    /// Whether a sensor's streams go through the synchronizer.
    pub fn is_synchronized(&self, sensor_id: &str) -> bool {
        self.sync.sources.iter().any(|s| s == sensor_id)
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids = HashSet::new();
        for sensor in &self.sensors {
            if sensor.id.is_empty() {
                return Err(ConfigError::Invalid("sensor id must not be empty".into()));
            }
            if !ids.insert(sensor.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate sensor id '{}'",
                    sensor.id
                )));
            }
            if let Some(t) = &sensor.thresholds {
                if !(t.low < t.medium && t.medium < t.high) {
                    return Err(ConfigError::Invalid(format!(
                        "thresholds for '{}' must satisfy low < medium < high",
                        sensor.id
                    )));
                }
            }
            if sensor.hysteresis < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "hysteresis for '{}' must be non-negative",
                    sensor.id
                )));
            }
            let synchronized = self.is_synchronized(&sensor.id);
            let has_recognizer = matches!(
                sensor.feature,
                FeatureType::Temperature | FeatureType::Activity
            );
            if !has_recognizer && !synchronized {
                return Err(ConfigError::Invalid(format!(
                    "{} sensor '{}' must belong to the synchronization group",
                    sensor.feature, sensor.id
                )));
            }
            if has_recognizer && synchronized {
                return Err(ConfigError::Invalid(format!(
                    "sensor '{}' has a recognizer and cannot be synchronized",
                    sensor.id
                )));
            }
        }

        for source in &self.sync.sources {
            if !ids.contains(source.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "synchronized source '{source}' is not a configured sensor"
                )));
            }
        }

        let mut actuator_ids = HashSet::new();
        for actuator in &self.actuators {
            if !actuator_ids.insert(actuator.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate actuator id '{}'",
                    actuator.id
                )));
            }
        }

        if self.window.capacity == 0 {
            return Err(ConfigError::Invalid("window capacity must be > 0".into()));
        }
        if self.window.hop == 0 || self.window.hop > self.window.capacity {
            return Err(ConfigError::Invalid(
                "window hop must be in 1..=capacity".into(),
            ));
        }
        if let Some(flush) = &self.window.flush {
            if flush.min_fill == 0 || flush.min_fill > self.window.capacity {
                return Err(ConfigError::Invalid(
                    "flush min_fill must be in 1..=capacity".into(),
                ));
            }
        }
        if self.queue.capacity == 0 {
            return Err(ConfigError::Invalid("queue capacity must be > 0".into()));
        }
        if self.sync.max_pending == 0 {
            return Err(ConfigError::Invalid("sync max_pending must be > 0".into()));
        }
        if self.listener.tuple_buffer == 0 {
            return Err(ConfigError::Invalid("listener tuple_buffer must be > 0".into()));
        }
        if self.policy.rotation_uses == 0 {
            return Err(ConfigError::Invalid("policy rotation_uses must be > 0".into()));
        }
        self.logging.timezone()?;

        Ok(())
    }
}

/// Temperature thresholds in degrees Celsius, strictly ordered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low: 28.0,
            medium: 32.0,
            high: 36.0,
        }
    }
}

/// One configured sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    pub id: String,
    /// Advertised device name used during discovery
    pub name: String,
    pub feature: FeatureType,
    #[serde(default)]
    pub thresholds: Option<Thresholds>,
    /// Margin a value must fall below a threshold before a downward transition
    #[serde(default)]
    pub hysteresis: f64,
    /// What to do when the event queue is full
    #[serde(default)]
    pub enqueue: EnqueueMode,
}

/// One configured actuator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorConfig {
    pub id: String,
    pub kind: ActuatorKind,
}

impl ActuatorConfig {
    pub fn new(id: impl Into<String>, kind: ActuatorKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// Connection and retry policy for one class of device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceClassConfig {
    #[serde(with = "duration_ms")]
    pub scan_timeout: Duration,
    pub fast_retry_attempts: u32,
    #[serde(with = "duration_ms")]
    pub retry_interval: Duration,
    #[serde(with = "duration_ms")]
    pub retry_sleep: Duration,
}

impl Default for DeviceClassConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(5),
            fast_retry_attempts: 5,
            retry_interval: Duration::from_secs(5),
            retry_sleep: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Longest a listener may block on downstream backpressure
    #[serde(with = "duration_ms")]
    pub max_block: Duration,
    /// Capacity of the channel between synchronizer and window stage
    pub tuple_buffer: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_block: Duration::from_millis(20),
            tuple_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Sensor ids whose streams must all contribute to a tuple
    pub sources: Vec<String>,
    /// Source id stamped on classifier events for this group
    pub group_id: String,
    #[serde(with = "duration_ms")]
    pub max_skew: Duration,
    #[serde(with = "duration_ms")]
    pub sync_timeout: Duration,
    /// Pending samples retained per stream while waiting for partners
    pub max_pending: usize,
    pub late_sample_policy: LateSamplePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            group_id: "dual_wrist".to_string(),
            max_skew: Duration::from_millis(25),
            sync_timeout: Duration::from_millis(500),
            max_pending: 16,
            late_sample_policy: LateSamplePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub capacity: usize,
    /// New tuples required between two complete windows
    pub hop: usize,
    /// Periodic flush of partially filled windows
    pub flush: Option<FlushConfig>,
    /// Windows skipped entirely before calibration
    pub warmup_windows: u32,
    /// Suppress actuation for the calibration window's event
    pub gate_during_calibration: bool,
    /// Wake-up interval of the window stage when no tuples arrive
    #[serde(with = "duration_ms")]
    pub tick: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            capacity: 150,
            hop: 75,
            flush: None,
            warmup_windows: 3,
            gate_during_calibration: true,
            tick: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlushConfig {
    pub min_fill: usize,
    #[serde(with = "duration_ms")]
    pub interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
    /// Bound for producers using [`EnqueueMode::Block`]
    #[serde(with = "duration_ms")]
    pub enqueue_timeout: Duration,
    /// Enqueue mode used by the classifier stage
    pub classifier_mode: EnqueueMode,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            enqueue_timeout: Duration::from_millis(50),
            classifier_mode: EnqueueMode::DropOldest,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Minimum interval between identical actuations for one trigger
    #[serde(with = "duration_ms")]
    pub cooldown: Duration,
    #[serde(with = "duration_ms")]
    pub escalation_window: Duration,
    /// Triggers of the same label within the window that cause escalation
    pub escalation_count: usize,
    /// Consecutive uses of one actuator before rotating to the next
    pub rotation_uses: u32,
    /// Labels that reset state and actuate nothing
    pub rest_labels: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(10),
            escalation_window: Duration::from_secs(60),
            escalation_count: 3,
            rotation_uses: 3,
            rest_labels: vec![
                "STATIONARY".to_string(),
                "NO_CLASS".to_string(),
                "NON_STEREOTYPY".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_base_path: PathBuf,
    pub enable_system_log: bool,
    /// Include actuation parameters in diary lines
    pub actuation_details: bool,
    pub console_system: bool,
    pub console_events: bool,
    /// IANA timezone for diary timestamps (UTC when unset)
    pub timezone: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_base_path: PathBuf::from("logs"),
            enable_system_log: true,
            actuation_details: true,
            console_system: false,
            console_events: false,
            timezone: None,
        }
    }
}

impl LoggingConfig {
    pub fn timezone(&self) -> Result<chrono_tz::Tz, ConfigError> {
        match &self.timezone {
            Some(name) => name
                .parse::<chrono_tz::Tz>()
                .map_err(|e| ConfigError::Invalid(format!("timezone '{name}': {e}"))),
            None => Ok(chrono_tz::UTC),
        }
    }
}

/// Serde support for Duration as milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window.capacity, 150);
        assert_eq!(config.sync.max_skew, Duration::from_millis(25));
        assert_eq!(config.vibration.fast_retry_attempts, 10);
    }

    #[test]
    fn test_unordered_thresholds_rejected() {
        let mut config = Config::default();
        config.sensors[0].thresholds = Some(Thresholds {
            low: 30.0,
            medium: 29.0,
            high: 40.0,
        });
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_sync_source_rejected() {
        let mut config = Config::default();
        config.sync.sources = vec!["bc_missing".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_imu_requires_sync_group() {
        let mut config = Config::default();
        config.sensors.push(SensorConfig {
            id: "bc_left".into(),
            name: "BCN-L".into(),
            feature: FeatureType::Imu,
            thresholds: None,
            hysteresis: 0.0,
            enqueue: EnqueueMode::DropNewest,
        });
        assert!(config.validate().is_err());

        config.sync.sources = vec!["bc_left".into()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_timezone_rejected() {
        let mut config = Config::default();
        config.logging.timezone = Some("Mars/Olympus".into());
        assert!(config.validate().is_err());

        config.logging.timezone = Some("Europe/Rome".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.policy.cooldown = Duration::from_millis(1500);
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.policy.cooldown, Duration::from_millis(1500));
        assert_eq!(loaded.sensors.len(), 2);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "queue": { "capacity": 8 } }"#).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.queue.capacity, 8);
        assert_eq!(loaded.window.hop, 75);
    }
}
