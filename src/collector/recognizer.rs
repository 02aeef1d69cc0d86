//! Recognizers turn raw feature values into semantic labels.

use super::types::{FeatureType, Sample};
use crate::config::{SensorConfig, Thresholds};
use crate::core::event::Label;

/// Maps samples of one stream to labels. Returning `Some` emits an event.
pub trait Recognizer: Send {
    fn recognize(&mut self, sample: &Sample) -> Option<Label>;

    /// Forget any state, e.g. after the sensor reconnects.
    fn reset(&mut self) {}
}

/// Temperature bands delimited by the ordered thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TemperatureBand {
    BelowLow,
    LowMedium,
    MediumHigh,
    AboveHigh,
}

impl TemperatureBand {
    pub fn classify(value: f64, t: &Thresholds) -> Self {
        if value < t.low {
            TemperatureBand::BelowLow
        } else if value < t.medium {
            TemperatureBand::LowMedium
        } else if value < t.high {
            TemperatureBand::MediumHigh
        } else {
            TemperatureBand::AboveHigh
        }
    }

    pub fn label(&self) -> Label {
        match self {
            TemperatureBand::BelowLow => Label::new("LOW"),
            TemperatureBand::LowMedium => Label::new("MEDIUM"),
            TemperatureBand::MediumHigh => Label::new("HIGH"),
            TemperatureBand::AboveHigh => Label::new("CRITICAL"),
        }
    }
}

/// Threshold-crossing state machine. Emits only on band transitions.
///
/// Upward transitions happen as soon as a threshold is reached. Downward
/// transitions require the value to fall `hysteresis` below the threshold.
/// The machine starts in [`TemperatureBand::BelowLow`].
#[derive(Debug, Clone)]
pub struct TemperatureRecognizer {
    thresholds: Thresholds,
    hysteresis: f64,
    band: TemperatureBand,
}

impl TemperatureRecognizer {
    pub fn new(thresholds: Thresholds, hysteresis: f64) -> Self {
        Self {
            thresholds,
            hysteresis: hysteresis.max(0.0),
            band: TemperatureBand::BelowLow,
        }
    }

    pub fn band(&self) -> TemperatureBand {
        self.band
    }

    fn next_band(&self, value: f64) -> TemperatureBand {
        let raw = TemperatureBand::classify(value, &self.thresholds);
        if raw >= self.band {
            return raw;
        }
        TemperatureBand::classify(value + self.hysteresis, &self.thresholds).min(self.band)
    }
}

impl Recognizer for TemperatureRecognizer {
    fn recognize(&mut self, sample: &Sample) -> Option<Label> {
        let value = sample.value.as_scalar()?;
        if !value.is_finite() {
            return None;
        }
        let next = self.next_band(value);
        if next == self.band {
            return None;
        }
        tracing::debug!(
            source = %sample.source_id,
            value,
            from = ?self.band,
            to = ?next,
            "Temperature band changed"
        );
        self.band = next;
        Some(next.label())
    }

    fn reset(&mut self) {
        self.band = TemperatureBand::BelowLow;
    }
}

/// Map an on-device activity code to its label.
pub fn activity_label(code: i64) -> Label {
    match code {
        1 => Label::new("STATIONARY"),
        2 => Label::new("WALKING"),
        3 => Label::new("WALKING_FAST"),
        4 => Label::new("RUNNING"),
        _ => Label::new("UNKNOWN"),
    }
}

/// Stateless activity mapper. Every sample yields a label and an event.
/// Repeats still reach the diary; only their actuation is suppressed, by the
/// activation policy's cooldown.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityRecognizer;

impl Recognizer for ActivityRecognizer {
    fn recognize(&mut self, sample: &Sample) -> Option<Label> {
        let value = sample.value.as_scalar()?;
        value.is_finite().then(|| activity_label(value.round() as i64))
    }
}

/// The recognizer a configured sensor needs, if any.
pub fn for_sensor(sensor: &SensorConfig) -> Option<Box<dyn Recognizer>> {
    match sensor.feature {
        FeatureType::Temperature => Some(Box::new(TemperatureRecognizer::new(
            sensor.thresholds.unwrap_or_default(),
            sensor.hysteresis,
        ))),
        FeatureType::Activity => Some(Box::new(ActivityRecognizer)),
        _ => None,
    }
}
