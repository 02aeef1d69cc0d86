//! Pipeline transparency counters.
//!
//! Tracks how many samples, windows, events and actuations passed through
//! (or were dropped by) each stage, and persists the totals as JSON so the
//! `status` command can report them after the agent exits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

macro_rules! counters {
    ($($field:ident => $record:ident),* $(,)?) => {
        /// Transparency statistics for the current session.
        #[derive(Debug)]
        pub struct TransparencyLog {
            $($field: AtomicU64,)*
            /// Session start time
            session_start: DateTime<Utc>,
            /// Path for persisting stats
            persist_path: Option<PathBuf>,
        }

        impl TransparencyLog {
            /// Create a new transparency log.
            pub fn new() -> Self {
                Self {
                    $($field: AtomicU64::new(0),)*
                    session_start: Utc::now(),
                    persist_path: None,
                }
            }

            $(
                pub fn $record(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            /// Get the current statistics.
            pub fn stats(&self) -> TransparencyStats {
                TransparencyStats {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                    session_start: self.session_start,
                    session_duration_secs: (Utc::now() - self.session_start)
                        .num_seconds()
                        .max(0) as u64,
                }
            }

            fn restore(&self, persisted: &PersistedStats) {
                $(self.$field.store(persisted.$field, Ordering::Relaxed);)*
            }

            fn persisted(&self) -> PersistedStats {
                PersistedStats {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                    last_updated: Utc::now(),
                }
            }

            /// Reset all counters.
            pub fn reset(&self) {
                $(self.$field.store(0, Ordering::Relaxed);)*
            }
        }

        /// Snapshot of transparency statistics.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct TransparencyStats {
            $(pub $field: u64,)*
            pub session_start: DateTime<Utc>,
            pub session_duration_secs: u64,
        }

        /// Stats format for persistence.
        #[derive(Debug, Serialize, Deserialize)]
        pub struct PersistedStats {
            $(#[serde(default)] pub $field: u64,)*
            pub last_updated: DateTime<Utc>,
        }
    };
}

counters! {
    samples_received => record_sample_received,
    samples_dropped => record_sample_dropped,
    samples_unmatched => record_sample_unmatched,
    tuples_synced => record_tuple_synced,
    windows_emitted => record_window_emitted,
    windows_skipped => record_window_skipped,
    windows_classified => record_window_classified,
    events_enqueued => record_event_enqueued,
    events_dropped => record_event_dropped,
    events_dispatched => record_event_dispatched,
    events_gated => record_event_gated,
    actuations_succeeded => record_actuation_succeeded,
    actuations_failed => record_actuation_failed,
    reconnections => record_reconnection,
}

impl TransparencyLog {
    /// Create a transparency log with persistence.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        // Try to load existing stats
        if let Err(e) = log.load() {
            tracing::warn!("Could not load previous transparency stats: {e}");
        }

        log
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Samples received: {} (dropped {}, unmatched {})\n\
             - Synchronized tuples: {}\n\
             - Windows emitted: {} (skipped {}, classified {})\n\
             - Events enqueued: {} (dropped {})\n\
             - Events dispatched: {} (gated {})\n\
             - Actuations: {} succeeded, {} failed\n\
             - Reconnections: {}\n\
             - Session duration: {} seconds",
            stats.samples_received,
            stats.samples_dropped,
            stats.samples_unmatched,
            stats.tuples_synced,
            stats.windows_emitted,
            stats.windows_skipped,
            stats.windows_classified,
            stats.events_enqueued,
            stats.events_dropped,
            stats.events_dispatched,
            stats.events_gated,
            stats.actuations_succeeded,
            stats.actuations_failed,
            stats.reconnections,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let json =
                serde_json::to_string_pretty(&self.persisted()).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load stats from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let persisted = Self::read_persisted(path)?;
                self.restore(&persisted);
            }
        }
        Ok(())
    }

    /// Read a stats file written by [`TransparencyLog::save`].
    pub fn read_persisted(path: &std::path::Path) -> Result<PersistedStats, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(std::io::Error::other)
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

/// Create a new shared transparency log.
pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

/// Create a new shared transparency log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}
