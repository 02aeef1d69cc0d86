//! Startup and shutdown of every pipeline thread.
//!
//! Start order: actuators, event queue, dispatcher, synchronizer and
//! classification stage, then sensor workers. Shutdown runs the other way so
//! that producers stop before their consumers: sensors, classification stage,
//! dispatcher, actuators. Transparency counters are saved last.

use crate::actuator::{Actuator, ActuatorId, ActuatorManager};
use crate::collector::{FeatureListener, Route, SensorHub, SensorLink, SensorWorker, StreamKey};
use crate::config::Config;
use crate::core::{
    ActivationPolicy, ClassificationStage, Classifier, DispatcherHandle, DispatcherState,
    EventDispatcher, EventQueue, ShutdownSignal, StreamSynchronizer,
};
use crate::error::{ConfigError, StartupError};
use crate::transparency::{SharedLogger, SharedTransparencyLog};
use crate::VERSION;
use crossbeam_channel::bounded;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How long a sensor worker waits for a sample before re-checking shutdown.
const SENSOR_POLL: Duration = Duration::from_millis(100);

/// Device drivers and classifier handed to the engine.
///
/// Radio transports and the classification model live outside the crate;
/// the binary binds simulated devices.
#[derive(Default)]
pub struct EngineParts {
    pub sensors: Vec<Box<dyn SensorLink>>,
    pub actuators: Vec<(ActuatorId, Box<dyn Actuator>)>,
    pub classifier: Option<Box<dyn Classifier>>,
}

pub struct Engine {
    sensor_shutdown: ShutdownSignal,
    stage_shutdown: ShutdownSignal,
    sensors: Vec<SensorWorker>,
    classification: Option<JoinHandle<()>>,
    dispatcher: Option<DispatcherHandle>,
    actuators: Arc<ActuatorManager>,
    synchronizer: Option<Arc<StreamSynchronizer>>,
    queue: EventQueue,
    logger: SharedLogger,
    stats: SharedTransparencyLog,
}

fn spawn_error(worker: impl Into<String>) -> impl FnOnce(std::io::Error) -> StartupError {
    let worker = worker.into();
    move |source| StartupError::Spawn { worker, source }
}

impl Engine {
    /// Validate the configuration and start every worker thread.
    ///
    /// Nothing is spawned until the configuration and parts have been
    /// checked. If a thread cannot be spawned, everything already started is
    /// stopped and joined before the error is returned.
    pub fn start(
        config: &Config,
        parts: EngineParts,
        logger: SharedLogger,
        stats: SharedTransparencyLog,
    ) -> Result<Self, StartupError> {
        config.validate()?;

        let EngineParts {
            sensors,
            actuators,
            classifier,
        } = parts;

        let sync_group = if config.sync.sources.is_empty() {
            None
        } else {
            let classifier = classifier.ok_or_else(|| {
                ConfigError::Invalid("synchronized sensors require a classifier".into())
            })?;
            let streams: Vec<StreamKey> = config
                .sync
                .sources
                .iter()
                .filter_map(|id| config.sensor(id))
                .flat_map(|sensor| {
                    sensor
                        .feature
                        .streams()
                        .into_iter()
                        .map(|feature| StreamKey::new(sensor.id.clone(), feature))
                })
                .collect();
            Some((classifier, streams))
        };

        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        logger.info(&format!("STOPme agent v{VERSION} starting on {host}"));

        let mut manager = ActuatorManager::new(logger.clone(), stats.clone());
        for (id, device) in actuators {
            let class = config.device_class(device.kind()).clone();
            manager.register(id, device, class);
        }
        if let Err(e) = manager.start() {
            manager.stop_all();
            return Err(spawn_error("actuator")(e));
        }
        let grace = [&config.led_strip, &config.speaker, &config.vibration]
            .iter()
            .map(|class| class.scan_timeout)
            .max()
            .unwrap_or_default();
        if !manager.wait_connected(grace) {
            logger.warn("Not every actuator connected at startup, continuing");
        }
        let manager = Arc::new(manager);

        let queue = EventQueue::new(
            config.queue.capacity,
            config.queue.enqueue_timeout,
            logger.clone(),
            stats.clone(),
        );

        let policy = ActivationPolicy::new(config.policy.clone(), manager.actuators());
        let dispatcher = match EventDispatcher::new(
            queue.clone(),
            policy,
            manager.clone(),
            logger.clone(),
            stats.clone(),
        )
        .spawn(ShutdownSignal::new())
        {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                manager.stop_all();
                return Err(spawn_error("dispatcher")(e));
            }
        };

        let mut engine = Self {
            sensor_shutdown: ShutdownSignal::new(),
            stage_shutdown: ShutdownSignal::new(),
            sensors: Vec::new(),
            classification: None,
            dispatcher: Some(dispatcher),
            actuators: manager,
            synchronizer: None,
            queue,
            logger,
            stats,
        };

        if let Some((classifier, streams)) = sync_group {
            engine.logger.info(&format!(
                "[sync] Group {} waits on {} streams",
                config.sync.group_id,
                streams.len()
            ));

            let (tx, rx) = bounded(config.listener.tuple_buffer);
            let synchronizer = Arc::new(StreamSynchronizer::new(
                streams,
                &config.sync,
                config.listener.max_block,
                tx,
                engine.logger.clone(),
                engine.stats.clone(),
            ));
            let stage = ClassificationStage::new(
                config,
                classifier,
                engine.queue.clone(),
                engine.logger.clone(),
                engine.stats.clone(),
            )
            .with_synchronizer(synchronizer.clone());
            match stage.spawn(rx, engine.stage_shutdown.clone(), config.window.tick) {
                Ok(handle) => {
                    engine.synchronizer = Some(synchronizer);
                    engine.classification = Some(handle);
                }
                Err(e) => return Err(engine.abort(spawn_error("classification")(e))),
            }
        }

        let total = sensors.len();
        let mut reachable = 0;
        for mut link in sensors {
            let source_id = link.source_id().to_string();
            let Some(sensor) = config.sensor(&source_id) else {
                engine.logger.warn(&format!(
                    "[{source_id}] No sensor configuration for this link, ignored"
                ));
                continue;
            };

            match link.scan(config.sensor_link.scan_timeout) {
                Ok(()) => reachable += 1,
                Err(e) => engine
                    .logger
                    .warn(&format!("[{source_id}] Not reachable at startup: {e}")),
            }

            let route = match (&engine.synchronizer, config.is_synchronized(&source_id)) {
                (Some(sync), true) => Route::Synchronized(sync.clone()),
                _ => Route::Direct {
                    queue: engine.queue.clone(),
                    mode: sensor.enqueue,
                },
            };
            let listener = FeatureListener::from_config(
                sensor,
                route,
                engine.logger.clone(),
                engine.stats.clone(),
            );
            let hub = SensorHub::new(listener, engine.logger.clone(), engine.stats.clone());
            match SensorWorker::spawn(
                link,
                hub,
                config.sensor_link.clone(),
                SENSOR_POLL,
                engine.sensor_shutdown.clone(),
                engine.logger.clone(),
            ) {
                Ok(worker) => engine.sensors.push(worker),
                Err(e) => return Err(engine.abort(spawn_error(format!("sensor {source_id}"))(e))),
            }
        }

        for sensor in &config.sensors {
            if !engine.sensors.iter().any(|w| w.source_id() == sensor.id) {
                engine
                    .logger
                    .warn(&format!("[{}] Configured but no link provided", sensor.id));
            }
        }
        if total > 0 && reachable == 0 {
            engine.logger.error(
                "No sensor reachable at startup, continuing with dispatch and logging only",
            );
        }

        engine.logger.info(&format!(
            "STOPme agent running: {} sensor(s), {} actuator(s)",
            engine.sensors.len(),
            engine.actuators.len()
        ));

        Ok(engine)
    }

    /// Stop whatever was started and hand back the startup error.
    fn abort(mut self, error: StartupError) -> StartupError {
        self.logger.error(&format!("Startup failed: {error}"));
        self.stop_workers();
        error
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn actuators(&self) -> &Arc<ActuatorManager> {
        &self.actuators
    }

    pub fn synchronizer(&self) -> Option<&Arc<StreamSynchronizer>> {
        self.synchronizer.as_ref()
    }

    pub fn dispatcher_state(&self) -> DispatcherState {
        self.dispatcher
            .as_ref()
            .map_or(DispatcherState::Stopped, |d| d.state())
    }

    pub fn stats(&self) -> &SharedTransparencyLog {
        &self.stats
    }

    /// Stop every thread in order and persist the counters.
    pub fn shutdown(mut self) {
        self.logger.info("Shutting down...");
        self.stop_workers();

        if let Err(e) = self.stats.save() {
            self.logger
                .error(&format!("Could not save transparency stats: {e}"));
        }
        self.logger.info("STOPme agent stopped");
    }

    fn stop_workers(&mut self) {
        self.sensor_shutdown.trigger();
        for worker in self.sensors.drain(..) {
            let source_id = worker.source_id().to_string();
            if worker.join().is_err() {
                self.logger
                    .error(&format!("[{source_id}] Sensor worker panicked"));
            }
        }

        self.stage_shutdown.trigger();
        if let Some(handle) = self.classification.take() {
            if handle.join().is_err() {
                self.logger.error("Classification stage panicked");
            }
        }

        if let Some(handle) = self.dispatcher.take() {
            if handle.stop().is_err() {
                self.logger.error("[Dispatcher] Dispatcher panicked");
            }
        }

        self.actuators.stop_all();
    }
}
