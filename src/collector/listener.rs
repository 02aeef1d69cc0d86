//! Feature listener: the entry point for raw sensor values.
//!
//! A listener stamps each raw value with wall-clock time (clamped so it
//! never goes backwards per stream), validates its shape, and routes it:
//! recognizer-backed features go straight to the [`EventQueue`], inertial
//! streams go to the [`StreamSynchronizer`]. It never blocks longer than the
//! bound configured on the downstream queue or synchronizer.

use super::recognizer::{self, Recognizer};
use super::types::{FeatureType, RawSample, Sample};
use crate::config::SensorConfig;
use crate::core::event::Event;
use crate::core::queue::{EnqueueMode, EventQueue};
use crate::core::synchronizer::StreamSynchronizer;
use crate::error::PipelineError;
use crate::transparency::{SharedLogger, SharedTransparencyLog};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Where a listener delivers its output.
#[derive(Clone)]
pub enum Route {
    /// Recognized events go to the queue with the given overflow mode
    Direct { queue: EventQueue, mode: EnqueueMode },
    /// Samples go to the synchronization group
    Synchronized(Arc<StreamSynchronizer>),
}

pub struct FeatureListener {
    source_id: String,
    feature: FeatureType,
    recognizer: Option<Box<dyn Recognizer>>,
    route: Route,
    last_timestamp: HashMap<FeatureType, DateTime<Utc>>,
    logger: SharedLogger,
    stats: SharedTransparencyLog,
}

impl FeatureListener {
    pub fn new(
        source_id: impl Into<String>,
        feature: FeatureType,
        recognizer: Option<Box<dyn Recognizer>>,
        route: Route,
        logger: SharedLogger,
        stats: SharedTransparencyLog,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            feature,
            recognizer,
            route,
            last_timestamp: HashMap::new(),
            logger,
            stats,
        }
    }

    /// Build the listener for a configured sensor with its recognizer.
    pub fn from_config(
        sensor: &SensorConfig,
        route: Route,
        logger: SharedLogger,
        stats: SharedTransparencyLog,
    ) -> Self {
        Self::new(
            sensor.id.clone(),
            sensor.feature,
            recognizer::for_sensor(sensor),
            route,
            logger,
            stats,
        )
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn feature(&self) -> FeatureType {
        self.feature
    }

    /// Handle a raw value delivered by the sensor link, stamped now.
    pub fn on_sample(&mut self, raw: RawSample) -> Result<(), PipelineError> {
        self.on_sample_at(raw, Utc::now())
    }

    /// Handle a raw value with an explicit receive time.
    pub fn on_sample_at(
        &mut self,
        raw: RawSample,
        received_at: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        self.stats.record_sample_received();
        let stream = format!("{}/{}", raw.source_id, raw.feature_type);

        if raw.source_id != self.source_id || !self.feature.streams().contains(&raw.feature_type)
        {
            self.stats.record_sample_dropped();
            self.logger
                .warn(&format!("[{}] Unexpected stream {stream} ignored", self.source_id));
            return Err(PipelineError::UnknownStream(stream));
        }

        if let Err(detail) = validate(&raw) {
            self.stats.record_sample_dropped();
            let err = PipelineError::Malformed { stream, detail };
            self.logger.warn(&format!("[{}] {err}", self.source_id));
            return Err(err);
        }

        let timestamp = self.stamp(raw.feature_type, received_at);
        let sample = Sample::new(raw.source_id, raw.feature_type, raw.value, timestamp);

        match &self.route {
            Route::Synchronized(sync) => sync.submit(sample),
            Route::Direct { queue, mode } => {
                let Some(recognizer) = self.recognizer.as_mut() else {
                    return Ok(());
                };
                match recognizer.recognize(&sample) {
                    Some(label) => {
                        let event =
                            Event::new(sample.timestamp, sample.source_id, sample.feature_type, label)
                                .with_value(sample.value);
                        queue.enqueue(event, *mode)
                    }
                    None => Ok(()),
                }
            }
        }
    }

    /// Non-decreasing timestamp per stream.
    fn stamp(&mut self, feature: FeatureType, received_at: DateTime<Utc>) -> DateTime<Utc> {
        let last = self.last_timestamp.entry(feature).or_insert(received_at);
        if received_at > *last {
            *last = received_at;
        }
        *last
    }

    /// Clear recognizer state, e.g. after the link was re-established.
    pub fn reset(&mut self) {
        if let Some(recognizer) = self.recognizer.as_mut() {
            recognizer.reset();
        }
    }
}

fn validate(raw: &RawSample) -> Result<(), String> {
    if let Some(arity) = raw.feature_type.arity() {
        if raw.value.len() != arity {
            return Err(format!(
                "expected {arity} component(s), got {}",
                raw.value.len()
            ));
        }
    }
    if raw.value.components().iter().any(|c| !c.is_finite()) {
        return Err("non-finite component".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::{SampleValue, StreamKey};
    use crate::config::{SyncConfig, Thresholds};
    use crate::transparency::{create_shared_log, MemoryLogger};
    use chrono::{Duration, TimeZone};
    use crossbeam_channel::bounded;

    fn temperature_sensor() -> SensorConfig {
        SensorConfig {
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
        }
    }

    fn direct() -> (FeatureListener, EventQueue, Arc<MemoryLogger>) {
        let memory = Arc::new(MemoryLogger::new());
        let stats = create_shared_log();
        let queue = EventQueue::new(
            16,
            std::time::Duration::from_millis(5),
            memory.clone(),
            stats.clone(),
        );
        let route = Route::Direct {
            queue: queue.clone(),
            mode: EnqueueMode::DropNewest,
        };
        let listener =
            FeatureListener::from_config(&temperature_sensor(), route, memory.clone(), stats);
        (listener, queue, memory)
    }

    fn raw(value: f64) -> RawSample {
        RawSample::new(
            "bc_temperature",
            FeatureType::Temperature,
            SampleValue::Scalar(value),
        )
    }

    #[test]
    fn test_transitions_reach_queue() {
        let (mut listener, queue, _) = direct();
        for v in [33.0, 35.0, 35.5, 37.0, 39.0, 39.5] {
            listener.on_sample(raw(v)).unwrap();
        }
        let labels: Vec<String> = std::iter::from_fn(|| queue.try_dequeue())
            .map(|e| e.label.to_string())
            .collect();
        assert_eq!(labels, vec!["MEDIUM", "HIGH", "CRITICAL"]);
    }

    #[test]
    fn test_event_carries_raw_value() {
        let (mut listener, queue, _) = direct();
        listener.on_sample(raw(36.4)).unwrap();
        let event = queue.try_dequeue().unwrap();
        assert_eq!(event.raw_value, Some(SampleValue::Scalar(36.4)));
        assert_eq!(event.source_id, "bc_temperature");
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let (mut listener, queue, _) = direct();
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        listener.on_sample_at(raw(35.0), t0).unwrap();
        listener.on_sample_at(raw(37.0), t0 - Duration::seconds(5)).unwrap();

        let first = queue.try_dequeue().unwrap();
        let second = queue.try_dequeue().unwrap();
        assert!(second.timestamp >= first.timestamp);
    }

    #[test]
    fn test_malformed_value_is_dropped() {
        let (mut listener, queue, memory) = direct();
        let bad = RawSample::new(
            "bc_temperature",
            FeatureType::Temperature,
            SampleValue::Vector(vec![1.0, 2.0]),
        );
        assert!(matches!(
            listener.on_sample(bad),
            Err(PipelineError::Malformed { .. })
        ));
        assert!(listener.on_sample(raw(f64::NAN)).is_err());
        assert!(queue.is_empty());
        assert!(memory.system_contains("malformed sample"));
    }

    #[test]
    fn test_foreign_stream_rejected() {
        let (mut listener, _, _) = direct();
        let other = RawSample::new("bc_other", FeatureType::Temperature, SampleValue::Scalar(1.0));
        assert!(matches!(
            listener.on_sample(other),
            Err(PipelineError::UnknownStream(_))
        ));
    }

    #[test]
    fn test_imu_samples_go_to_synchronizer() {
        let memory = Arc::new(MemoryLogger::new());
        let stats = create_shared_log();
        let (tx, rx) = bounded(4);
        let key = StreamKey::new("bc_left", FeatureType::Accelerometer);
        let sync = Arc::new(StreamSynchronizer::new(
            vec![key.clone()],
            &SyncConfig::default(),
            std::time::Duration::from_millis(5),
            tx,
            memory.clone(),
            stats.clone(),
        ));
        let mut listener = FeatureListener::new(
            "bc_left",
            FeatureType::Imu,
            None,
            Route::Synchronized(sync),
            memory,
            stats,
        );

        let acc = RawSample::new(
            "bc_left",
            FeatureType::Accelerometer,
            SampleValue::Vector(vec![0.0, 10.0, 980.0]),
        );
        listener.on_sample(acc).unwrap();

        let tuple = rx.try_recv().unwrap();
        assert_eq!(tuple.get(&key).unwrap().value.len(), 3);
    }
}
