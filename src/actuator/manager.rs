//! Actuator registry, triggering and reconnection.
//!
//! Each registered actuator gets an [`ActuatorHandle`] holding the device
//! behind its own mutex plus a small connection state machine. A dedicated
//! worker thread per handle connects with the two-tier backoff, watches the
//! link, and reconnects after a drop. [`ActuatorManager::trigger`] never
//! waits on a reconnect in progress: it checks the state and uses
//! `try_lock`, reporting `NotConnected` instead of blocking.

use super::device::Actuator;
use super::types::{ActionType, ActuationOutcome, ActuationParams, ActuatorId, ActuatorKind};
use crate::config::DeviceClassConfig;
use crate::core::retry::connect_with_backoff;
use crate::core::shutdown::ShutdownSignal;
use crate::error::{ActuationError, ConnectionError};
use crate::transparency::{SharedLogger, SharedTransparencyLog};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often a connected worker checks that the link is still up.
const LINK_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Retrying,
}

pub struct ActuatorHandle {
    id: ActuatorId,
    kind: ActuatorKind,
    class: DeviceClassConfig,
    device: Mutex<Box<dyn Actuator>>,
    state: Mutex<ConnectionState>,
    link_lost_tx: Sender<()>,
    link_lost_rx: Receiver<()>,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ActuatorHandle {
    fn new(id: ActuatorId, device: Box<dyn Actuator>, class: DeviceClassConfig) -> Self {
        let (link_lost_tx, link_lost_rx) = bounded(1);
        Self {
            kind: device.kind(),
            id,
            class,
            device: Mutex::new(device),
            state: Mutex::new(ConnectionState::Disconnected),
            link_lost_tx,
            link_lost_rx,
        }
    }

    pub fn id(&self) -> &ActuatorId {
        &self.id
    }

    pub fn kind(&self) -> ActuatorKind {
        self.kind
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    /// Mark the link as lost and wake the reconnection worker.
    fn report_link_lost(&self) {
        self.set_state(ConnectionState::Disconnected);
        let _ = self.link_lost_tx.try_send(());
    }

    fn execute(
        &self,
        action_type: ActionType,
        params: &ActuationParams,
    ) -> Result<(), ActuationError> {
        if self.state() != ConnectionState::Connected {
            return Err(ActuationError::NotConnected);
        }
        let mut device = match self.device.try_lock() {
            Ok(device) => device,
            Err(TryLockError::WouldBlock) => return Err(ActuationError::Busy),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let result = device.execute(action_type, params);
        if matches!(result, Err(ActuationError::Disconnected)) || !device.is_connected() {
            drop(device);
            self.report_link_lost();
        }
        result
    }
}

pub struct ActuatorManager {
    handles: BTreeMap<ActuatorId, Arc<ActuatorHandle>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: ShutdownSignal,
    logger: SharedLogger,
    stats: SharedTransparencyLog,
}

impl ActuatorManager {
    pub fn new(logger: SharedLogger, stats: SharedTransparencyLog) -> Self {
        logger.info("[ActuatorManager] Initialized");
        Self {
            handles: BTreeMap::new(),
            workers: Mutex::new(Vec::new()),
            shutdown: ShutdownSignal::new(),
            logger,
            stats,
        }
    }

    /// Add an actuator to the registry. Ids must be unique; a repeated id
    /// replaces the earlier registration.
    pub fn register(
        &mut self,
        id: ActuatorId,
        device: Box<dyn Actuator>,
        class: DeviceClassConfig,
    ) {
        let handle = ActuatorHandle::new(id.clone(), device, class);
        self.logger.info(&format!(
            "[ActuatorManager] Registered {} {id}",
            handle.kind
        ));
        if self.handles.insert(id.clone(), Arc::new(handle)).is_some() {
            self.logger
                .warn(&format!("[ActuatorManager] Replaced existing actuator {id}"));
        }
    }

    /// Spawn one connection worker per registered actuator.
    pub fn start(&self) -> std::io::Result<()> {
        let mut workers = lock(&self.workers);
        for handle in self.handles.values() {
            let handle = Arc::clone(handle);
            let shutdown = self.shutdown.clone();
            let logger = Arc::clone(&self.logger);
            let stats = Arc::clone(&self.stats);
            let worker = thread::Builder::new()
                .name(format!("actuator-{}", handle.id))
                .spawn(move || connection_worker(handle, shutdown, logger, stats))?;
            workers.push(worker);
        }
        self.logger
            .info("[ActuatorManager] Actuators initialization complete");
        Ok(())
    }

    /// Forward one actuation to an actuator. Never blocks on reconnection
    /// and never panics; every failure becomes an outcome.
    pub fn trigger(
        &self,
        actuator_id: &ActuatorId,
        action_type: ActionType,
        params: &ActuationParams,
    ) -> ActuationOutcome {
        let Some(handle) = self.handles.get(actuator_id) else {
            self.logger.warn(&format!(
                "[ActuatorManager] Attempted to trigger unknown actuator: {actuator_id}"
            ));
            self.stats.record_actuation_failed();
            return ActuationOutcome::Failed {
                reason: ActuationError::UnknownActuator(actuator_id.to_string()).to_string(),
            };
        };

        if !handle.kind.accepts(params) {
            self.logger.error(&format!(
                "[ActuatorManager] {actuator_id} cannot execute {}",
                params.describe()
            ));
            self.stats.record_actuation_failed();
            return ActuationOutcome::Failed {
                reason: ActuationError::UnsupportedParams(actuator_id.to_string()).to_string(),
            };
        }

        let result = handle.execute(action_type, params);
        match &result {
            Ok(()) => {
                self.stats.record_actuation_succeeded();
                self.logger.info(&format!(
                    "[ActuatorManager] Triggered {action_type} on {actuator_id}: {}",
                    params.describe()
                ));
            }
            Err(ActuationError::NotConnected) | Err(ActuationError::Busy) => {
                self.stats.record_actuation_failed();
                self.logger.warn(&format!(
                    "[ActuatorManager] {actuator_id} not connected, skipping {action_type}"
                ));
            }
            Err(e) => {
                self.stats.record_actuation_failed();
                self.logger.error(&format!(
                    "[ActuatorManager] Error triggering actuator {actuator_id}: {e}"
                ));
            }
        }
        result.into()
    }

    pub fn state_of(&self, actuator_id: &ActuatorId) -> Option<ConnectionState> {
        self.handles.get(actuator_id).map(|h| h.state())
    }

    /// Registered actuators in id order.
    pub fn actuators(&self) -> Vec<(ActuatorId, ActuatorKind)> {
        self.handles
            .values()
            .map(|h| (h.id.clone(), h.kind))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Poll until every actuator is connected or `timeout` elapses.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self
                .handles
                .values()
                .all(|h| h.state() == ConnectionState::Connected)
            {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Stop every worker, disconnect every device and join the threads.
    pub fn stop_all(&self) {
        self.logger
            .info("[ActuatorManager] Stopping all actuator threads...");
        self.shutdown.trigger();

        let workers: Vec<JoinHandle<()>> = lock(&self.workers).drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                self.logger
                    .error("[ActuatorManager] Actuator worker panicked");
            }
        }
        self.logger
            .info("[ActuatorManager] All actuator threads stopped.");
    }
}

fn connection_worker(
    handle: Arc<ActuatorHandle>,
    shutdown: ShutdownSignal,
    logger: SharedLogger,
    stats: SharedTransparencyLog,
) {
    let name = handle.id.to_string();
    let mut first_connection = true;

    loop {
        handle.set_state(ConnectionState::Connecting);
        let mut attempts = 0u32;
        let connected = connect_with_backoff(&name, &handle.class, &shutdown, &logger, || {
            if attempts > 0 {
                handle.set_state(ConnectionState::Retrying);
            }
            attempts += 1;
            let mut device = lock(&handle.device);
            if first_connection && attempts == 1 {
                device.scan(handle.class.scan_timeout)?;
            }
            device.connect()?;
            if device.is_connected() {
                Ok(())
            } else {
                Err(ConnectionError::Disconnected)
            }
        });

        if !connected {
            break;
        }
        // Drain a stale notification from before this connection
        let _ = handle.link_lost_rx.try_recv();
        handle.set_state(ConnectionState::Connected);
        if !first_connection {
            stats.record_reconnection();
        }
        first_connection = false;

        // Watch the link until it drops or shutdown is requested.
        let lost = loop {
            select! {
                recv(handle.link_lost_rx) -> _ => break true,
                recv(shutdown.receiver()) -> _ => break false,
                default(LINK_POLL) => {
                    let up = match handle.device.try_lock() {
                        Ok(device) => device.is_connected(),
                        // Busy executing; check again next poll
                        Err(TryLockError::WouldBlock) => true,
                        Err(TryLockError::Poisoned(p)) => p.into_inner().is_connected(),
                    };
                    if !up {
                        break true;
                    }
                }
            }
        };
        if !lost || shutdown.is_triggered() {
            break;
        }

        handle.set_state(ConnectionState::Disconnected);
        logger.warn(&format!("[{name}] Disconnected, reconnecting"));
    }

    lock(&handle.device).disconnect();
    handle.set_state(ConnectionState::Disconnected);
    logger.info(&format!("[{name}] Stopped"));
}
