//! Scripted actuator used by the `simulate` command and the tests.

use super::device::Actuator;
use super::types::{ActionType, ActuationParams, ActuatorKind};
use crate::error::{ActuationError, ConnectionError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

#[derive(Debug, Default)]
struct ControlState {
    failing_connects: u32,
    failing_executes: bool,
    link_down: bool,
    connect_attempts: Vec<Instant>,
    commands: Vec<(ActionType, ActuationParams)>,
}

/// Shared view into a [`SimulatedActuator`] for scripting faults and
/// inspecting what it was asked to do.
#[derive(Debug, Clone, Default)]
pub struct ActuatorControls {
    state: Arc<Mutex<ControlState>>,
}

impl ActuatorControls {
    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_connects(&self, n: u32) {
        self.lock().failing_connects = n;
    }

    pub fn fail_executes(&self, failing: bool) {
        self.lock().failing_executes = failing;
    }

    /// Simulate the device going out of range.
    pub fn drop_link(&self) {
        self.lock().link_down = true;
    }

    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.lock().connect_attempts.clone()
    }

    pub fn commands(&self) -> Vec<(ActionType, ActuationParams)> {
        self.lock().commands.clone()
    }
}

pub struct SimulatedActuator {
    kind: ActuatorKind,
    connected: bool,
    controls: ActuatorControls,
}

impl SimulatedActuator {
    pub fn new(kind: ActuatorKind) -> Self {
        Self {
            kind,
            connected: false,
            controls: ActuatorControls::default(),
        }
    }

    pub fn controls(&self) -> ActuatorControls {
        self.controls.clone()
    }
}

impl Actuator for SimulatedActuator {
    fn kind(&self) -> ActuatorKind {
        self.kind
    }

    fn connect(&mut self) -> Result<(), ConnectionError> {
        let mut state = self.controls.lock();
        state.connect_attempts.push(Instant::now());
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(ConnectionError::Timeout);
        }
        state.link_down = false;
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
        if !self.is_connected() {
            self.connected = false;
            return Err(ActuationError::Disconnected);
        }
        let mut state = self.controls.lock();
        if state.failing_executes {
            return Err(ActuationError::Device("simulated fault".into()));
        }
        state.commands.push((action_type, params.clone()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected && !self.controls.lock().link_down
    }
}
