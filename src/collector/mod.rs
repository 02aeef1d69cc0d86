//! Sensor side of the pipeline.
//!
//! Sensor links deliver raw values to a [`FeatureListener`], which stamps
//! them and either recognizes labels directly or hands the samples to the
//! stream synchronizer.

pub mod device;
pub mod listener;
pub mod recognizer;
pub mod simulated;
pub mod types;

pub use device::{SensorHub, SensorLink, SensorWorker};
pub use listener::{FeatureListener, Route};
pub use recognizer::{
    activity_label, ActivityRecognizer, Recognizer, TemperatureBand, TemperatureRecognizer,
};
pub use simulated::SimulatedSensor;
pub use types::{FeatureType, RawSample, Sample, SampleValue, StreamKey};
