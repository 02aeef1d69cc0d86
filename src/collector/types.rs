//! Sample types produced by feature listeners.
//!
//! A [`Sample`] is immutable once stamped. Timestamps are wall-clock UTC and
//! non-decreasing per stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of feature a sensor stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    /// Skin/ambient temperature in degrees Celsius
    Temperature,
    /// On-device activity classification code
    Activity,
    /// Accelerometer, 3 axes in mg
    Accelerometer,
    /// Gyroscope, 3 axes in dps
    Gyroscope,
    /// Sensor-fusion quaternion (x, y, z, w)
    Quaternion,
    /// Fused inertial stream (accelerometer + gyroscope + quaternion)
    Imu,
}

impl FeatureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureType::Temperature => "temperature",
            FeatureType::Activity => "activity",
            FeatureType::Accelerometer => "accelerometer",
            FeatureType::Gyroscope => "gyroscope",
            FeatureType::Quaternion => "quaternion",
            FeatureType::Imu => "imu",
        }
    }

    /// Number of components a raw value of this feature must carry.
    pub fn arity(&self) -> Option<usize> {
        match self {
            FeatureType::Temperature | FeatureType::Activity => Some(1),
            FeatureType::Accelerometer | FeatureType::Gyroscope => Some(3),
            FeatureType::Quaternion => Some(4),
            FeatureType::Imu => None,
        }
    }

    /// The physical streams a sensor configured with this feature produces.
    pub fn streams(&self) -> Vec<FeatureType> {
        match self {
            FeatureType::Imu => vec![
                FeatureType::Accelerometer,
                FeatureType::Gyroscope,
                FeatureType::Quaternion,
            ],
            other => vec![*other],
        }
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw feature value: a single number or a fixed-size vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl SampleValue {
    /// The value as a scalar, if it has exactly one component.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            SampleValue::Scalar(v) => Some(*v),
            SampleValue::Vector(v) if v.len() == 1 => Some(v[0]),
            SampleValue::Vector(_) => None,
        }
    }

    pub fn components(&self) -> &[f64] {
        match self {
            SampleValue::Scalar(v) => std::slice::from_ref(v),
            SampleValue::Vector(v) => v,
        }
    }

    pub fn len(&self) -> usize {
        self.components().len()
    }

    pub fn is_empty(&self) -> bool {
        self.components().is_empty()
    }

    /// Euclidean norm of the components.
    pub fn magnitude(&self) -> f64 {
        self.components().iter().map(|c| c * c).sum::<f64>().sqrt()
    }
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleValue::Scalar(v) => write!(f, "{v:.2}"),
            SampleValue::Vector(v) => {
                let parts: Vec<String> = v.iter().map(|c| format!("{c:.2}")).collect();
                write!(f, "({})", parts.join(", "))
            }
        }
    }
}

/// Identity of one synchronizable stream: a feature on a given source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    pub source_id: String,
    pub feature_type: FeatureType,
}

impl StreamKey {
    pub fn new(source_id: impl Into<String>, feature_type: FeatureType) -> Self {
        Self {
            source_id: source_id.into(),
            feature_type,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source_id, self.feature_type)
    }
}

/// A value delivered by the sensor link, before the listener stamps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub source_id: String,
    pub feature_type: FeatureType,
    pub value: SampleValue,
    /// Device-side timestamp, if the firmware provides one. Informational only.
    pub device_timestamp: Option<u64>,
}

impl RawSample {
    pub fn new(source_id: impl Into<String>, feature_type: FeatureType, value: SampleValue) -> Self {
        Self {
            source_id: source_id.into(),
            feature_type,
            value,
            device_timestamp: None,
        }
    }
}

/// A stamped feature sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub source_id: String,
    pub feature_type: FeatureType,
    pub value: SampleValue,
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn new(
        source_id: impl Into<String>,
        feature_type: FeatureType,
        value: SampleValue,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            feature_type,
            value,
            timestamp,
        }
    }

    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(self.source_id.clone(), self.feature_type)
    }
}
