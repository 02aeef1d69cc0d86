//! Transparency module for the STOPme agent.
//!
//! This module records what the pipeline saw and did: the event and system
//! diary, and running counters for every stage.

pub mod diary;
pub mod log;

// Re-export commonly used types
pub use diary::{
    ActuationRecord, EventRecord, FileLogger, Logger, MemoryLogger, Severity, SharedLogger,
    SystemRecord,
};
pub use log::{
    create_shared_log, create_shared_log_with_persistence, PersistedStats, SharedTransparencyLog,
    TransparencyLog, TransparencyStats,
};
