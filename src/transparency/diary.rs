//! Event and system diary.
//!
//! The [`Logger`] trait is the append-only sink every stage writes to.
//! [`FileLogger`] produces one folder per day with a system log and a
//! per-source event diary (plain text and CSV). [`MemoryLogger`] keeps
//! records in memory for tests and the `simulate` command.

use crate::actuator::{ActionType, ActuationOutcome, ActuationParams, ActuatorId};
use crate::collector::{FeatureType, SampleValue};
use crate::config::LoggingConfig;
use crate::core::event::Label;
use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Severity of a system record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("INFO"),
            Severity::Warning => f.write_str("WARNING"),
            Severity::Error => f.write_str("ERROR"),
        }
    }
}

/// One attempted actuation and how it ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuationRecord {
    pub actuator_id: ActuatorId,
    pub action_type: ActionType,
    pub params: ActuationParams,
    pub outcome: ActuationOutcome,
}

impl ActuationRecord {
    fn render(&self, details: bool) -> String {
        if details {
            format!(
                "{}({}): {}",
                self.actuator_id,
                self.params.describe(),
                self.outcome
            )
        } else {
            format!("{}: {}", self.actuator_id, self.outcome)
        }
    }
}

/// A processed event with every actuation decided for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    pub feature_type: FeatureType,
    pub label: Label,
    pub raw_value: Option<SampleValue>,
    /// Logged without actuation because calibration had not completed
    pub gated: bool,
    pub actuations: Vec<ActuationRecord>,
}

impl EventRecord {
    pub fn has_actuations(&self) -> bool {
        !self.actuations.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.actuations
            .iter()
            .filter(|a| a.outcome.is_success())
            .count()
    }

    /// Diary rendering of the actuations: `GATED`, `NONE`, or each target
    /// with its outcome.
    pub fn render_actuations(&self, details: bool) -> String {
        if self.gated {
            return "GATED".to_string();
        }
        if self.actuations.is_empty() {
            return "NONE".to_string();
        }
        self.actuations
            .iter()
            .map(|a| a.render(details))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// A connection, retry, drop or lifecycle message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemRecord {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
}

/// Append-only, thread-safe diary sink.
pub trait Logger: Send + Sync {
    /// Record a dispatched event. Called once per event, after every
    /// actuation attempt for it has finished.
    fn log_event(&self, record: &EventRecord);

    fn log_system(&self, timestamp: DateTime<Utc>, severity: Severity, message: &str);

    fn info(&self, message: &str) {
        self.log_system(Utc::now(), Severity::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log_system(Utc::now(), Severity::Warning, message);
    }

    fn error(&self, message: &str) {
        self.log_system(Utc::now(), Severity::Error, message);
    }
}

pub type SharedLogger = Arc<dyn Logger>;

fn mirror_to_tracing(severity: Severity, message: &str) {
    match severity {
        Severity::Info => tracing::info!(target: "stopme::system", "{message}"),
        Severity::Warning => tracing::warn!(target: "stopme::system", "{message}"),
        Severity::Error => tracing::error!(target: "stopme::system", "{message}"),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

const CSV_HEADER: &str = "date,timestamp,feature,event,actuation,outcome";

/// Diary written to day folders under `log_base_path`.
pub struct FileLogger {
    base: PathBuf,
    timezone: Tz,
    enable_system_log: bool,
    actuation_details: bool,
    console_system: bool,
    console_events: bool,
    // Serializes every write across threads
    write_lock: Mutex<()>,
}

impl FileLogger {
    pub fn new(config: &LoggingConfig) -> Result<Self, ConfigError> {
        let timezone = config.timezone()?;
        std::fs::create_dir_all(&config.log_base_path)
            .map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(Self {
            base: config.log_base_path.clone(),
            timezone,
            enable_system_log: config.enable_system_log,
            actuation_details: config.actuation_details,
            console_system: config.console_system,
            console_events: config.console_events,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    /// Day folder for a timestamp, in the configured timezone.
    pub fn day_dir(&self, timestamp: DateTime<Utc>) -> PathBuf {
        let local = timestamp.with_timezone(&self.timezone);
        self.base.join(local.format("%d-%m-%Y").to_string())
    }

    fn stamp(&self, timestamp: DateTime<Utc>) -> String {
        timestamp
            .with_timezone(&self.timezone)
            .format("%d-%m-%Y %H:%M:%S")
            .to_string()
    }

    fn append(path: &Path, line: &str, header: Option<&str>) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let fresh = !path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if fresh {
            if let Some(header) = header {
                writeln!(file, "{header}")?;
            }
        }
        writeln!(file, "{line}")
    }

    fn csv_field(value: &str) -> String {
        if value.contains([',', '"', '\n']) {
            format!("\"{}\"", value.replace('"', "\"\""))
        } else {
            value.to_string()
        }
    }

    fn csv_row(&self, record: &EventRecord) -> String {
        let local = record.timestamp.with_timezone(&self.timezone);
        let (actuation, outcome) = if record.gated {
            ("GATED".to_string(), String::new())
        } else {
            let targets: Vec<String> = record
                .actuations
                .iter()
                .map(|a| {
                    if self.actuation_details {
                        format!("{}({})", a.actuator_id, a.params.describe())
                    } else {
                        a.actuator_id.to_string()
                    }
                })
                .collect();
            let outcomes: Vec<String> =
                record.actuations.iter().map(|a| a.outcome.to_string()).collect();
            (targets.join("; "), outcomes.join("; "))
        };

        [
            local.format("%d-%m-%Y").to_string(),
            local.format("%H:%M:%S").to_string(),
            record.feature_type.as_str().to_uppercase(),
            record.label.to_string(),
            actuation,
            outcome,
        ]
        .iter()
        .map(|f| Self::csv_field(f))
        .collect::<Vec<_>>()
        .join(",")
    }
}

impl Logger for FileLogger {
    fn log_event(&self, record: &EventRecord) {
        let line = format!(
            "[{}] - {} - {} - {}",
            self.stamp(record.timestamp),
            record.feature_type.as_str().to_uppercase(),
            record.label,
            record.render_actuations(self.actuation_details)
        );
        let day = self.day_dir(record.timestamp);
        let stem = format!("Event_Diary_{}", record.source_id);

        let _guard = lock(&self.write_lock);
        if let Err(e) = Self::append(&day.join(format!("{stem}.log")), &line, None) {
            tracing::error!("Failed to write event diary: {e}");
        }
        if let Err(e) = Self::append(
            &day.join(format!("{stem}.csv")),
            &self.csv_row(record),
            Some(CSV_HEADER),
        ) {
            tracing::error!("Failed to write event CSV: {e}");
        }
        if self.console_events {
            println!("{line}");
        }
    }

    fn log_system(&self, timestamp: DateTime<Utc>, severity: Severity, message: &str) {
        mirror_to_tracing(severity, message);
        if !self.enable_system_log {
            return;
        }

        let line = format!("[{}] - {severity} - {message}", self.stamp(timestamp));
        let path = self.day_dir(timestamp).join("System_Log.log");

        let _guard = lock(&self.write_lock);
        if let Err(e) = Self::append(&path, &line, None) {
            tracing::error!("Failed to write system log: {e}");
        }
        if self.console_system {
            println!("{line}");
        }
    }
}

/// In-memory diary.
#[derive(Default)]
pub struct MemoryLogger {
    events: Mutex<Vec<EventRecord>>,
    system: Mutex<Vec<SystemRecord>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        lock(&self.events).clone()
    }

    pub fn system_records(&self) -> Vec<SystemRecord> {
        lock(&self.system).clone()
    }

    pub fn system_contains(&self, needle: &str) -> bool {
        lock(&self.system).iter().any(|r| r.message.contains(needle))
    }

    /// Poll until at least `count` events are recorded or `timeout` elapses.
    pub fn wait_for_events(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if lock(&self.events).len() >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Logger for MemoryLogger {
    fn log_event(&self, record: &EventRecord) {
        lock(&self.events).push(record.clone());
    }

    fn log_system(&self, timestamp: DateTime<Utc>, severity: Severity, message: &str) {
        mirror_to_tracing(severity, message);
        lock(&self.system).push(SystemRecord {
            timestamp,
            severity,
            message: message.to_string(),
        });
    }
}
