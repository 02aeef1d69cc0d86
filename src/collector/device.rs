//! Sensor connections.
//!
//! The radio driver is an external collaborator behind [`SensorLink`]. Each
//! link runs on its own [`SensorWorker`] thread, which connects with the
//! two-tier backoff, feeds samples into a [`SensorHub`] and reconnects when the
//! link drops.

use super::listener::FeatureListener;
use super::types::RawSample;
use crate::config::DeviceClassConfig;
use crate::core::retry::connect_with_backoff;
use crate::core::shutdown::ShutdownSignal;
use crate::error::ConnectionError;
use crate::transparency::{SharedLogger, SharedTransparencyLog};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Driver for one physical sensor.
pub trait SensorLink: Send {
    fn source_id(&self) -> &str;

    /// Look for the device. Links that need no discovery succeed immediately.
    fn scan(&mut self, _timeout: Duration) -> Result<(), ConnectionError> {
        Ok(())
    }

    fn connect(&mut self) -> Result<(), ConnectionError>;

    fn disconnect(&mut self);

    /// Wait up to `timeout` for the next raw value.
    ///
    /// `Ok(None)` means nothing arrived in time. An error means the link is
    /// gone and must be re-established.
    fn next_sample(&mut self, timeout: Duration) -> Result<Option<RawSample>, ConnectionError>;
}

/// Callbacks a sensor worker drives: connection transitions and samples.
pub struct SensorHub {
    listener: FeatureListener,
    logger: SharedLogger,
    stats: SharedTransparencyLog,
    connections: u32,
}

impl SensorHub {
    pub fn new(
        listener: FeatureListener,
        logger: SharedLogger,
        stats: SharedTransparencyLog,
    ) -> Self {
        Self {
            listener,
            logger,
            stats,
            connections: 0,
        }
    }

    pub fn source_id(&self) -> &str {
        self.listener.source_id()
    }

    pub fn on_connect(&mut self) {
        self.connections += 1;
        if self.connections > 1 {
            self.stats.record_reconnection();
            self.listener.reset();
        }
        self.logger.info(&format!(
            "[{}] Streaming {} data",
            self.listener.source_id(),
            self.listener.feature()
        ));
    }

    pub fn on_disconnect(&mut self, error: &ConnectionError) {
        self.logger.warn(&format!(
            "[{}] Disconnected ({error}), reconnecting",
            self.listener.source_id()
        ));
    }

    /// Deliver one raw value. Failures were already logged downstream.
    pub fn on_raw_sample(&mut self, raw: RawSample) {
        if let Err(e) = self.listener.on_sample(raw) {
            tracing::debug!(source = %self.listener.source_id(), error = %e, "Sample not delivered");
        }
    }
}

/// Thread hosting one sensor link.
pub struct SensorWorker {
    source_id: String,
    handle: JoinHandle<()>,
}

impl SensorWorker {
    pub fn spawn(
        mut link: Box<dyn SensorLink>,
        mut hub: SensorHub,
        class: DeviceClassConfig,
        poll: Duration,
        shutdown: ShutdownSignal,
        logger: SharedLogger,
    ) -> std::io::Result<Self> {
        let source_id = link.source_id().to_string();
        let name = source_id.clone();

        let handle = thread::Builder::new()
            .name(format!("sensor-{source_id}"))
            .spawn(move || {
                'session: loop {
                    let connected = connect_with_backoff(&name, &class, &shutdown, &logger, || {
                        link.scan(class.scan_timeout)?;
                        link.connect()
                    });
                    if !connected {
                        break;
                    }
                    hub.on_connect();

                    loop {
                        if shutdown.is_triggered() {
                            break 'session;
                        }
                        match link.next_sample(poll) {
                            Ok(Some(raw)) => hub.on_raw_sample(raw),
                            Ok(None) => {}
                            Err(e) => {
                                hub.on_disconnect(&e);
                                link.disconnect();
                                continue 'session;
                            }
                        }
                    }
                }
                link.disconnect();
                logger.info(&format!("[{name}] Stopped"));
            })?;

        Ok(Self { source_id, handle })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn join(self) -> std::thread::Result<()> {
        self.handle.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::listener::Route;
    use crate::collector::simulated::SimulatedSensor;
    use crate::collector::types::FeatureType;
    use crate::config::{SensorConfig, Thresholds};
    use crate::core::queue::{EnqueueMode, EventQueue};
    use crate::transparency::{create_shared_log, MemoryLogger};
    use std::sync::Arc;
    use std::time::Instant;

    fn fast_class() -> DeviceClassConfig {
        DeviceClassConfig {
            scan_timeout: Duration::from_millis(5),
            fast_retry_attempts: 3,
            retry_interval: Duration::from_millis(5),
            retry_sleep: Duration::from_millis(20),
        }
    }

    fn hub(
        memory: &Arc<MemoryLogger>,
        stats: &SharedTransparencyLog,
    ) -> (SensorHub, EventQueue) {
        let queue = EventQueue::new(32, Duration::from_millis(5), memory.clone(), stats.clone());
        let sensor = SensorConfig {
            id: "bc_temperature".into(),
            name: "BCN-TEMP".into(),
            feature: FeatureType::Temperature,
            thresholds: Some(Thresholds {
                low: 34.0,
                medium: 36.0,
                high: 38.0,
            }),
            hysteresis: 0.0,
            enqueue: EnqueueMode::DropNewest,
        };
        let listener = FeatureListener::from_config(
            &sensor,
            Route::Direct {
                queue: queue.clone(),
                mode: EnqueueMode::DropNewest,
            },
            memory.clone(),
            stats.clone(),
        );
        (SensorHub::new(listener, memory.clone(), stats.clone()), queue)
    }

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn test_worker_streams_after_failed_connects() {
        let memory = Arc::new(MemoryLogger::new());
        let stats = create_shared_log();
        let (hub, queue) = hub(&memory, &stats);
        let link = SimulatedSensor::temperature(
            "bc_temperature",
            &[33.0, 35.0, 37.0],
            Duration::from_millis(2),
        )
        .with_fail_connects(2);

        let shutdown = ShutdownSignal::new();
        let worker = SensorWorker::spawn(
            Box::new(link),
            hub,
            fast_class(),
            Duration::from_millis(10),
            shutdown.clone(),
            memory.clone(),
        )
        .unwrap();

        assert!(wait_until(Duration::from_secs(5), || queue.len() == 2));
        shutdown.trigger();
        worker.join().unwrap();

        assert!(memory.system_contains("[bc_temperature] Retry 1/3 failed"));
        assert!(memory.system_contains("[bc_temperature] Streaming temperature data"));
        assert!(memory.system_contains("[bc_temperature] Stopped"));
    }

    #[test]
    fn test_worker_reconnects_after_link_drop() {
        let memory = Arc::new(MemoryLogger::new());
        let stats = create_shared_log();
        let (hub, _queue) = hub(&memory, &stats);
        let link = SimulatedSensor::temperature(
            "bc_temperature",
            &[33.0, 35.0, 37.0, 39.0],
            Duration::from_millis(2),
        )
        .with_disconnect_after(2);

        let shutdown = ShutdownSignal::new();
        let worker = SensorWorker::spawn(
            Box::new(link),
            hub,
            fast_class(),
            Duration::from_millis(10),
            shutdown.clone(),
            memory.clone(),
        )
        .unwrap();

        assert!(wait_until(Duration::from_secs(5), || stats
            .stats()
            .reconnections
            >= 1));
        shutdown.trigger();
        worker.join().unwrap();

        assert!(memory.system_contains("Disconnected"));
    }
}
