//! Feedback devices: LED strips, speakers, haptic bands and the diary.

pub mod device;
pub mod manager;
pub mod simulated;
pub mod types;

pub use device::{Actuator, LogActuator};
pub use manager::{ActuatorHandle, ActuatorManager, ConnectionState};
pub use simulated::{ActuatorControls, SimulatedActuator};
pub use types::{
    ActionType, ActuationOutcome, ActuationParams, ActuationRequest, ActuatorId, ActuatorKind,
};
