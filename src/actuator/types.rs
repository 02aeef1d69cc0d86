//! Actuation request and outcome types.

use crate::error::ActuationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a physical actuator, e.g. `led_192.168.1.100`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActuatorId(String);

impl ActuatorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActuatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActuatorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Capability class of an actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorKind {
    LedStrip,
    Speaker,
    VibrationMotor,
    /// Writes the actuation to the diary instead of driving hardware
    Logger,
}

impl ActuatorKind {
    /// Whether this actuator class can execute the given parameters.
    pub fn accepts(&self, params: &ActuationParams) -> bool {
        matches!(
            (self, params),
            (ActuatorKind::LedStrip, ActuationParams::Light { .. })
                | (ActuatorKind::Speaker, ActuationParams::Sound { .. })
                | (ActuatorKind::VibrationMotor, ActuationParams::Vibration { .. })
                | (ActuatorKind::Logger, ActuationParams::Record { .. })
        )
    }
}

impl fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActuatorKind::LedStrip => "led_strip",
            ActuatorKind::Speaker => "speaker",
            ActuatorKind::VibrationMotor => "vibration_motor",
            ActuatorKind::Logger => "logger",
        };
        f.write_str(name)
    }
}

/// Why an actuation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Regular feedback for an event
    Feedback,
    /// Stronger feedback after repeated triggers
    Escalated,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Feedback => f.write_str("feedback"),
            ActionType::Escalated => f.write_str("escalated"),
        }
    }
}

/// Per-kind actuation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActuationParams {
    /// RGBW color, animation speed and brightness (0-100)
    Light {
        color: [u8; 4],
        speed: u8,
        intensity: u8,
    },
    /// Audio clip name from the clip library
    Sound { clip: String },
    /// Motor duty cycle (0-100) and duration
    Vibration { duty: u8, duration_ms: u32 },
    Record { label: String },
}

impl ActuationParams {
    /// Compact `k=v` rendering used in diary lines.
    pub fn describe(&self) -> String {
        match self {
            ActuationParams::Light {
                color,
                speed,
                intensity,
            } => format!(
                "color=({}, {}, {}, {}), speed={speed}, intensity={intensity}",
                color[0], color[1], color[2], color[3]
            ),
            ActuationParams::Sound { clip } => format!("file={clip}"),
            ActuationParams::Vibration { duty, duration_ms } => {
                format!("duty={duty}, duration={duration_ms}")
            }
            ActuationParams::Record { label } => format!("label={label}"),
        }
    }
}

/// One actuation decided by the policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuationRequest {
    pub actuator_id: ActuatorId,
    pub action_type: ActionType,
    pub params: ActuationParams,
}

/// Result of a trigger attempt, as recorded in the event diary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActuationOutcome {
    Success,
    NotConnected,
    Failed { reason: String },
}

impl ActuationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ActuationOutcome::Success)
    }
}

impl From<Result<(), ActuationError>> for ActuationOutcome {
    fn from(result: Result<(), ActuationError>) -> Self {
        match result {
            Ok(()) => ActuationOutcome::Success,
            Err(ActuationError::NotConnected) | Err(ActuationError::Busy) => {
                ActuationOutcome::NotConnected
            }
            Err(e) => ActuationOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }
}

impl fmt::Display for ActuationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuationOutcome::Success => f.write_str("success"),
            ActuationOutcome::NotConnected => f.write_str("not_connected"),
            ActuationOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}
