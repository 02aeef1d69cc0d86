//! Error types for the STOPme agent.
//!
//! Only [`ConfigError`] is fatal, and only at startup. Everything else is
//! logged by the loop that hit it and processing continues.

use thiserror::Error;

/// Errors raised while moving samples and events through the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A bounded queue or buffer was full; the item was dropped.
    #[error("{stage} saturated: {detail}")]
    Saturation { stage: &'static str, detail: String },

    /// A pending sample never found a partner and was discarded.
    #[error("unmatched sample on {stream} discarded after {age_ms} ms")]
    SynchronizationTimeout { stream: String, age_ms: i64 },

    /// A sample arrived for a stream that no synchronization group requires.
    #[error("unknown stream: {0}")]
    UnknownStream(String),

    /// A raw value had the wrong shape or was not finite.
    #[error("malformed sample on {stream}: {detail}")]
    Malformed { stream: String, detail: String },

    /// The pipeline is stopping and no longer accepts work.
    #[error("pipeline is shutting down")]
    ShuttingDown,
}

/// Transient connection failures. These trigger the retry policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("device not found during scan")]
    NotFound,

    #[error("connection attempt timed out")]
    Timeout,

    #[error("link error: {0}")]
    Link(String),

    #[error("device disconnected")]
    Disconnected,
}

/// Failure of a single actuation attempt. Never retried within a decision.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActuationError {
    #[error("actuator not connected")]
    NotConnected,

    #[error("actuator busy reconnecting")]
    Busy,

    #[error("unknown actuator: {0}")]
    UnknownActuator(String),

    #[error("parameters not supported by {0}")]
    UnsupportedParams(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("device disconnected during execute")]
    Disconnected,
}

/// Configuration errors. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Failure to bring the engine up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn {worker} thread: {source}")]
    Spawn {
        worker: String,
        #[source]
        source: std::io::Error,
    },
}

/// Error returned by a classifier strategy.
#[derive(Debug, Error)]
#[error("classifier error: {0}")]
pub struct ClassifierError(pub String);
