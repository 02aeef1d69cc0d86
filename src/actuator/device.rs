//! Actuator capability interface.
//!
//! Hardware drivers (LED strip over Wi-Fi, Bluetooth speaker, haptic band)
//! live outside this crate and plug in by implementing [`Actuator`]. The
//! manager looks implementations up by [`ActuatorId`](super::ActuatorId).

use super::types::{ActionType, ActuationParams, ActuatorKind};
use crate::error::{ActuationError, ConnectionError};
use crate::transparency::SharedLogger;
use std::time::Duration;

/// A physical (or virtual) feedback device.
pub trait Actuator: Send {
    fn kind(&self) -> ActuatorKind;

    /// Discovery phase before connecting, bounded by `timeout`.
    fn scan(&mut self, _timeout: Duration) -> Result<(), ConnectionError> {
        Ok(())
    }

    fn connect(&mut self) -> Result<(), ConnectionError>;

    fn disconnect(&mut self);

    /// Perform one actuation. Must not retry internally.
    fn execute(
        &mut self,
        action_type: ActionType,
        params: &ActuationParams,
    ) -> Result<(), ActuationError>;

    fn is_connected(&self) -> bool;
}

/// Actuator that writes each actuation to the system diary.
pub struct LogActuator {
    name: String,
    logger: SharedLogger,
    connected: bool,
}

impl LogActuator {
    pub fn new(name: impl Into<String>, logger: SharedLogger) -> Self {
        Self {
            name: name.into(),
            logger,
            connected: false,
        }
    }
}

impl Actuator for LogActuator {
    fn kind(&self) -> ActuatorKind {
        ActuatorKind::Logger
    }

    fn connect(&mut self) -> Result<(), ConnectionError> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn execute(
        &mut self,
        action_type: ActionType,
        params: &ActuationParams,
    ) -> Result<(), ActuationError> {
        if !self.connected {
            return Err(ActuationError::NotConnected);
        }
        match params {
            ActuationParams::Record { .. } => {
                self.logger.info(&format!(
                    "[{}] {action_type}: {}",
                    self.name,
                    params.describe()
                ));
                Ok(())
            }
            _ => Err(ActuationError::UnsupportedParams(self.name.clone())),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transparency::MemoryLogger;
    use std::sync::Arc;

    #[test]
    fn test_log_actuator_records() {
        let memory = Arc::new(MemoryLogger::new());
        let mut actuator = LogActuator::new("diary", memory.clone());
        let params = ActuationParams::Record {
            label: "DANGEROUS".into(),
        };

        assert_eq!(
            actuator.execute(ActionType::Feedback, &params),
            Err(ActuationError::NotConnected)
        );
        actuator.connect().unwrap();
        actuator.execute(ActionType::Escalated, &params).unwrap();
        assert!(memory.system_contains("[diary] escalated: label=DANGEROUS"));
    }
}
