//! STOPme agent - multisensory feedback for wearable sensor streams.
//!
//! This library turns readings from wireless wearable sensors into light,
//! sound and vibration feedback, logging every decision it takes.
//!
//! # Guarantees
//!
//! - **Bounded memory**: every queue and buffer between stages has a fixed
//!   capacity; overflow drops are logged, never silent
//! - **Ordering**: samples are timestamp-monotonic per stream and events from
//!   one source reach the dispatcher in emission order
//! - **Exactly-once dispatch**: every dequeued event produces one diary record,
//!   written after all of its actuations were attempted
//! - **Resilient links**: sensors and actuators reconnect on their own threads
//!   with a two-tier backoff
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          STOPme Agent                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌──────────────┐   ┌──────────┐   ┌───────────┐  │
//! │  │ Listener │──▶│ Synchronizer │──▶│  Window  │──▶│Classifier │  │
//! │  │(per link)│   │ (IMU group)  │   │ (sliding)│   │  (stage)  │  │
//! │  └──────────┘   └──────────────┘   └──────────┘   └───────────┘  │
//! │       │ recognized labels                               │        │
//! │       ▼                                                 ▼        │
//! │  ┌─────────────────────── EventQueue ──────────────────────┐     │
//! │  └─────────────────────────────┬───────────────────────────┘     │
//! │                                ▼                                 │
//! │  ┌────────────┐   ┌──────────────────┐   ┌─────────────────┐     │
//! │  │ Dispatcher │──▶│ ActivationPolicy │──▶│ ActuatorManager │     │
//! │  └────────────┘   └──────────────────┘   └─────────────────┘     │
//! │         │                                                        │
//! │         ▼                                                        │
//! │  ┌─────────────┐                                                 │
//! │  │ Transparency│  event diary, system log, counters              │
//! │  └─────────────┘                                                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use stopme_agent::actuator::{ActuatorId, ActuatorKind, SimulatedActuator};
//! use stopme_agent::collector::SimulatedSensor;
//! use stopme_agent::engine::{Engine, EngineParts};
//! use stopme_agent::transparency::{create_shared_log, MemoryLogger};
//! use stopme_agent::Config;
//!
//! let config = Config::default();
//! let mut parts = EngineParts::default();
//! parts.sensors.push(Box::new(SimulatedSensor::temperature(
//!     "bc_temperature",
//!     &[30.0, 33.0, 37.0],
//!     Duration::from_millis(100),
//! )));
//! parts.actuators.push((
//!     ActuatorId::new("led_1"),
//!     Box::new(SimulatedActuator::new(ActuatorKind::LedStrip)),
//! ));
//!
//! let engine = Engine::start(&config, parts, Arc::new(MemoryLogger::new()), create_shared_log())
//!     .expect("invalid configuration");
//! std::thread::sleep(Duration::from_secs(1));
//! engine.shutdown();
//! ```

pub mod actuator;
pub mod collector;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod transparency;

// Re-export key types at crate root for convenience
pub use config::Config;
pub use engine::{Engine, EngineParts};
pub use error::{ActuationError, ConfigError, ConnectionError, PipelineError, StartupError};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
