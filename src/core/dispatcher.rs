//! Event dispatcher: the single consumer of the event queue.
//!
//! For every dequeued event it asks the [`ActivationPolicy`] what to do,
//! triggers each decided actuation through the [`ActuatorManager`], and only
//! then writes one [`EventRecord`] carrying the final outcomes. The policy is
//! owned by the dispatcher thread, so it needs no lock.

use crate::actuator::ActuatorManager;
use crate::core::event::Event;
use crate::core::policy::ActivationPolicy;
use crate::core::queue::EventQueue;
use crate::core::shutdown::ShutdownSignal;
use crate::transparency::{ActuationRecord, EventRecord, SharedLogger, SharedTransparencyLog};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatcherState {
    Idle = 0,
    Dispatching = 1,
    Draining = 2,
    Stopped = 3,
}

impl DispatcherState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => DispatcherState::Idle,
            1 => DispatcherState::Dispatching,
            2 => DispatcherState::Draining,
            _ => DispatcherState::Stopped,
        }
    }
}

/// Shared view of the dispatcher's state machine.
#[derive(Debug, Clone)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(DispatcherState::Idle as u8)))
    }

    pub fn get(&self) -> DispatcherState {
        DispatcherState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: DispatcherState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Move from `from` to `to` only if the state is still `from`.
    fn transition(&self, from: DispatcherState, to: DispatcherState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

pub struct EventDispatcher {
    queue: EventQueue,
    policy: ActivationPolicy,
    actuators: Arc<ActuatorManager>,
    state: StateCell,
    logger: SharedLogger,
    stats: SharedTransparencyLog,
}

impl EventDispatcher {
    pub fn new(
        queue: EventQueue,
        policy: ActivationPolicy,
        actuators: Arc<ActuatorManager>,
        logger: SharedLogger,
        stats: SharedTransparencyLog,
    ) -> Self {
        Self {
            queue,
            policy,
            actuators,
            state: StateCell::new(),
            logger,
            stats,
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.state.get()
    }

    /// Process one event: decide, trigger, then log the final outcome.
    pub fn dispatch(&mut self, event: Event) -> EventRecord {
        let actuations = if event.gated {
            self.stats.record_event_gated();
            Vec::new()
        } else {
            self.policy
                .decide(&event)
                .into_iter()
                .map(|request| {
                    let outcome = self.actuators.trigger(
                        &request.actuator_id,
                        request.action_type,
                        &request.params,
                    );
                    ActuationRecord {
                        actuator_id: request.actuator_id,
                        action_type: request.action_type,
                        params: request.params,
                        outcome,
                    }
                })
                .collect()
        };

        let record = EventRecord {
            timestamp: event.timestamp,
            source_id: event.source_id,
            feature_type: event.feature_type,
            label: event.label,
            raw_value: event.raw_value,
            gated: event.gated,
            actuations,
        };

        tracing::debug!(
            event_id = %event.id,
            source = %record.source_id,
            label = %record.label,
            actuations = record.actuations.len(),
            "Event dispatched"
        );
        self.logger.log_event(&record);
        self.stats.record_event_dispatched();
        record
    }

    /// Run the dispatch loop on its own thread.
    ///
    /// On shutdown the event in flight is finished and logged; events still
    /// queued are left unprocessed. A stop requested while an event is in
    /// flight moves the state to `Draining` until that event is logged.
    pub fn spawn(mut self, shutdown: ShutdownSignal) -> std::io::Result<DispatcherHandle> {
        let state = self.state.clone();
        let signal = shutdown.clone();
        let handle = thread::Builder::new()
            .name("dispatcher".into())
            .spawn(move || {
                self.logger.info("[Dispatcher] Started");
                loop {
                    if shutdown.is_triggered() {
                        break;
                    }
                    let Some(event) = self.queue.dequeue(&shutdown) else {
                        break;
                    };
                    self.state.set(DispatcherState::Dispatching);
                    self.dispatch(event);
                    let resumed = self
                        .state
                        .transition(DispatcherState::Dispatching, DispatcherState::Idle);
                    if !resumed || shutdown.is_triggered() {
                        break;
                    }
                }
                self.state.set(DispatcherState::Draining);
                let left = self.queue.len();
                if left > 0 {
                    self.logger.warn(&format!(
                        "[Dispatcher] Stopping with {left} event(s) still queued"
                    ));
                }
                self.state.set(DispatcherState::Stopped);
                self.logger.info("[Dispatcher] Stopped");
            })?;
        Ok(DispatcherHandle {
            state,
            shutdown: signal,
            handle,
        })
    }
}

pub struct DispatcherHandle {
    state: StateCell,
    shutdown: ShutdownSignal,
    handle: JoinHandle<()>,
}

impl DispatcherHandle {
    pub fn state(&self) -> DispatcherState {
        self.state.get()
    }

    /// Signal shutdown without waiting. An event in flight keeps going and
    /// the state reads `Draining` until it has been logged.
    pub fn request_stop(&self) {
        self.shutdown.trigger();
        self.state
            .transition(DispatcherState::Dispatching, DispatcherState::Draining);
    }

    /// Request a stop and wait for the loop to exit.
    pub fn stop(self) -> std::thread::Result<()> {
        self.request_stop();
        self.join()
    }

    pub fn join(self) -> std::thread::Result<()> {
        self.handle.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{
        ActionType, ActuationParams, Actuator, ActuatorId, ActuatorKind, ActuatorControls,
        SimulatedActuator,
    };
    use crate::error::{ActuationError, ConnectionError};
    use crossbeam_channel::{bounded, Receiver, Sender};
    use crate::collector::{FeatureType, SampleValue};
    use crate::config::{DeviceClassConfig, PolicyConfig};
    use crate::core::event::Label;
    use crate::core::queue::EnqueueMode;
    use crate::transparency::{create_shared_log, MemoryLogger};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn class() -> DeviceClassConfig {
        DeviceClassConfig {
            scan_timeout: Duration::from_millis(5),
            fast_retry_attempts: 2,
            retry_interval: Duration::from_millis(5),
            retry_sleep: Duration::from_millis(20),
        }
    }

    struct Rig {
        dispatcher: EventDispatcher,
        queue: EventQueue,
        manager: Arc<ActuatorManager>,
        memory: Arc<MemoryLogger>,
        controls: Vec<ActuatorControls>,
    }

    fn rig(kinds: &[(&str, ActuatorKind)]) -> Rig {
        let memory = Arc::new(MemoryLogger::new());
        let stats = create_shared_log();
        let mut manager = ActuatorManager::new(memory.clone(), stats.clone());
        let mut controls = Vec::new();
        for (id, kind) in kinds {
            let device = SimulatedActuator::new(*kind);
            controls.push(device.controls());
            manager.register(ActuatorId::new(*id), Box::new(device), class());
        }
        manager.start().unwrap();
        assert!(manager.wait_connected(Duration::from_secs(5)));
        let manager = Arc::new(manager);

        let queue = EventQueue::new(16, Duration::from_millis(5), memory.clone(), stats.clone());
        let policy = ActivationPolicy::new(
            PolicyConfig {
                cooldown: Duration::from_secs(1),
                ..PolicyConfig::default()
            },
            manager.actuators(),
        );
        let dispatcher =
            EventDispatcher::new(queue.clone(), policy, manager.clone(), memory.clone(), stats);
        Rig {
            dispatcher,
            queue,
            manager,
            memory,
            controls,
        }
    }

    fn event(secs: i64, label: &str) -> Event {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap() + chrono::Duration::seconds(secs);
        Event::new(ts, "bc_temperature", FeatureType::Temperature, Label::new(label))
            .with_value(SampleValue::Scalar(37.0))
    }

    #[test]
    fn test_record_outcomes_match_manager() {
        let mut rig = rig(&[
            ("led_1", ActuatorKind::LedStrip),
            ("meta_1", ActuatorKind::VibrationMotor),
        ]);
        rig.controls[0].fail_executes(true);

        let record = rig.dispatcher.dispatch(event(0, "HIGH"));
        assert_eq!(record.actuations.len(), 1);
        assert!(!record.actuations[0].outcome.is_success());

        let logged = rig.memory.events();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0], record);
        rig.manager.stop_all();
    }

    #[test]
    fn test_gated_event_is_logged_without_actuation() {
        let mut rig = rig(&[("led_1", ActuatorKind::LedStrip)]);
        let record = rig.dispatcher.dispatch(event(0, "DANGEROUS").gated(true));

        assert!(record.gated);
        assert!(record.actuations.is_empty());
        assert!(rig.controls[0].commands().is_empty());
        assert_eq!(rig.memory.events().len(), 1);
        rig.manager.stop_all();
    }

    #[test]
    fn test_cooldown_suppression_still_logs() {
        let mut rig = rig(&[("led_1", ActuatorKind::LedStrip)]);
        let first = rig.dispatcher.dispatch(event(0, "HIGH"));
        let second = rig.dispatcher.dispatch(event(0, "HIGH"));

        assert_eq!(first.succeeded(), 1);
        assert!(second.actuations.is_empty());
        assert_eq!(rig.memory.events().len(), 2);
        assert_eq!(rig.controls[0].commands().len(), 1);
        rig.manager.stop_all();
    }

    #[test]
    fn test_loop_processes_queue_and_stops() {
        let rig = rig(&[("led_1", ActuatorKind::LedStrip)]);
        let Rig {
            dispatcher,
            queue,
            manager,
            memory,
            ..
        } = rig;

        for (i, label) in ["MEDIUM", "HIGH", "CRITICAL"].iter().enumerate() {
            queue
                .enqueue(event(i as i64 * 5, label), EnqueueMode::DropNewest)
                .unwrap();
        }

        let shutdown = ShutdownSignal::new();
        let handle = dispatcher.spawn(shutdown.clone()).unwrap();
        assert!(memory.wait_for_events(3, Duration::from_secs(5)));
        shutdown.trigger();
        handle.join().unwrap();

        let labels: Vec<String> = memory.events().iter().map(|r| r.label.to_string()).collect();
        assert_eq!(labels, vec!["MEDIUM", "HIGH", "CRITICAL"]);
        assert!(memory.system_contains("[Dispatcher] Stopped"));
        manager.stop_all();
    }

    /// LED strip whose every execute waits for the test to release it.
    struct HeldStrip {
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl Actuator for HeldStrip {
        fn kind(&self) -> ActuatorKind {
            ActuatorKind::LedStrip
        }

        fn connect(&mut self) -> Result<(), ConnectionError> {
            Ok(())
        }

        fn disconnect(&mut self) {}

        fn execute(&mut self, _: ActionType, _: &ActuationParams) -> Result<(), ActuationError> {
            let _ = self.entered.send(());
            let _ = self.release.recv_timeout(Duration::from_secs(5));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_stop_during_dispatch_drains_in_flight_event() {
        let memory = Arc::new(MemoryLogger::new());
        let stats = create_shared_log();
        let (entered_tx, entered_rx) = bounded(4);
        let (release_tx, release_rx) = bounded(4);

        let mut manager = ActuatorManager::new(memory.clone(), stats.clone());
        manager.register(
            ActuatorId::new("led_1"),
            Box::new(HeldStrip {
                entered: entered_tx,
                release: release_rx,
            }),
            class(),
        );
        manager.start().unwrap();
        assert!(manager.wait_connected(Duration::from_secs(5)));
        let manager = Arc::new(manager);

        let queue = EventQueue::new(16, Duration::from_millis(5), memory.clone(), stats.clone());
        let policy = ActivationPolicy::new(PolicyConfig::default(), manager.actuators());
        let dispatcher =
            EventDispatcher::new(queue.clone(), policy, manager.clone(), memory.clone(), stats);
        let handle = dispatcher.spawn(ShutdownSignal::new()).unwrap();

        queue
            .enqueue(event(0, "HIGH"), EnqueueMode::DropNewest)
            .unwrap();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(handle.state(), DispatcherState::Dispatching);
        queue
            .enqueue(event(1, "CRITICAL"), EnqueueMode::DropNewest)
            .unwrap();

        handle.request_stop();
        assert_eq!(handle.state(), DispatcherState::Draining);
        assert!(memory.events().is_empty());

        release_tx.send(()).unwrap();
        handle.join().unwrap();

        let logged = memory.events();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].label.as_str(), "HIGH");
        assert_eq!(logged[0].succeeded(), 1);
        assert!(memory.system_contains("Stopping with 1 event(s) still queued"));
        manager.stop_all();
    }
}
