//! Scripted sensor link for the `simulate` command and the tests.

use super::device::SensorLink;
use super::types::{FeatureType, RawSample, SampleValue};
use crate::error::ConnectionError;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One scripted delivery: every value in a batch arrives at the same tick.
pub type Batch = Vec<(FeatureType, SampleValue)>;

pub struct SimulatedSensor {
    source_id: String,
    script: Vec<Batch>,
    interval: Duration,
    repeat: bool,
    reachable: bool,
    failing_connects: u32,
    disconnect_after: Option<usize>,
    connected: bool,
    cursor: usize,
    delivered: usize,
    pending: VecDeque<RawSample>,
    last_tick: Option<Instant>,
}

impl SimulatedSensor {
    pub fn new(source_id: impl Into<String>, script: Vec<Batch>, interval: Duration) -> Self {
        Self {
            source_id: source_id.into(),
            script,
            interval,
            repeat: false,
            reachable: true,
            failing_connects: 0,
            disconnect_after: None,
            connected: false,
            cursor: 0,
            delivered: 0,
            pending: VecDeque::new(),
            last_tick: None,
        }
    }

    /// Scalar temperature readings in degrees Celsius.
    pub fn temperature(source_id: impl Into<String>, values: &[f64], interval: Duration) -> Self {
        let script = values
            .iter()
            .map(|v| vec![(FeatureType::Temperature, SampleValue::Scalar(*v))])
            .collect();
        Self::new(source_id, script, interval)
    }

    /// On-device activity codes.
    pub fn activity(source_id: impl Into<String>, codes: &[i64], interval: Duration) -> Self {
        let script = codes
            .iter()
            .map(|c| vec![(FeatureType::Activity, SampleValue::Scalar(*c as f64))])
            .collect();
        Self::new(source_id, script, interval)
    }

    /// A wrist rocking with growing intensity: calm for the first third of
    /// the script, then moderate, then vigorous. Each tick carries an
    /// accelerometer, gyroscope and quaternion value.
    pub fn imu(source_id: impl Into<String>, ticks: usize, interval: Duration) -> Self {
        let script = (0..ticks)
            .map(|i| {
                let amplitude = match i * 3 / ticks.max(1) {
                    0 => 40.0,
                    1 => 120.0,
                    _ => 300.0,
                };
                let (s, c) = (i as f64 * 0.3).sin_cos();
                vec![
                    (
                        FeatureType::Accelerometer,
                        SampleValue::Vector(vec![amplitude * s, 0.3 * amplitude * c, 980.0]),
                    ),
                    (
                        FeatureType::Gyroscope,
                        SampleValue::Vector(vec![0.2 * amplitude * c, 15.0 * s, 5.0]),
                    ),
                    (
                        FeatureType::Quaternion,
                        SampleValue::Vector(vec![0.1 * s, 0.0, 0.0, (1.0 - 0.01 * s * s).sqrt()]),
                    ),
                ]
            })
            .collect();
        Self::new(source_id, script, interval)
    }

    /// Loop the script instead of going quiet at the end.
    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    /// Fail the first `n` connection attempts.
    pub fn with_fail_connects(mut self, n: u32) -> Self {
        self.failing_connects = n;
        self
    }

    /// Drop the link once, after `n` values have been delivered.
    pub fn with_disconnect_after(mut self, n: usize) -> Self {
        self.disconnect_after = Some(n);
        self
    }

    /// Never answer scans.
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    fn next_batch(&mut self) -> Option<&Batch> {
        if self.cursor >= self.script.len() {
            if !self.repeat || self.script.is_empty() {
                return None;
            }
            self.cursor = 0;
        }
        self.cursor += 1;
        self.script.get(self.cursor - 1)
    }
}

impl SensorLink for SimulatedSensor {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn scan(&mut self, _timeout: Duration) -> Result<(), ConnectionError> {
        if self.reachable {
            Ok(())
        } else {
            Err(ConnectionError::NotFound)
        }
    }

    fn connect(&mut self) -> Result<(), ConnectionError> {
        if !self.reachable {
            return Err(ConnectionError::NotFound);
        }
        if self.failing_connects > 0 {
            self.failing_connects -= 1;
            return Err(ConnectionError::Timeout);
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.pending.clear();
    }

    fn next_sample(&mut self, timeout: Duration) -> Result<Option<RawSample>, ConnectionError> {
        if !self.connected {
            return Err(ConnectionError::Disconnected);
        }
        if self.disconnect_after == Some(self.delivered) {
            self.disconnect_after = None;
            self.connected = false;
            return Err(ConnectionError::Link("simulated link loss".into()));
        }
        if let Some(raw) = self.pending.pop_front() {
            self.delivered += 1;
            return Ok(Some(raw));
        }

        if let Some(last) = self.last_tick {
            let due = last + self.interval;
            let now = Instant::now();
            if due > now {
                let wait = due - now;
                if wait > timeout {
                    std::thread::sleep(timeout);
                    return Ok(None);
                }
                std::thread::sleep(wait);
            }
        }

        let source_id = self.source_id.clone();
        let Some(batch) = self.next_batch().cloned() else {
            std::thread::sleep(timeout);
            return Ok(None);
        };
        self.last_tick = Some(Instant::now());
        self.pending.extend(
            batch
                .into_iter()
                .map(|(feature, value)| RawSample::new(source_id.clone(), feature, value)),
        );

        match self.pending.pop_front() {
            Some(raw) => {
                self.delivered += 1;
                Ok(Some(raw))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_plays_in_order_then_goes_quiet() {
        let mut sensor =
            SimulatedSensor::activity("bc_activity", &[1, 2], Duration::from_millis(1));
        sensor.connect().unwrap();

        let first = sensor.next_sample(Duration::from_millis(50)).unwrap().unwrap();
        let second = sensor.next_sample(Duration::from_millis(50)).unwrap().unwrap();
        assert_eq!(first.value, SampleValue::Scalar(1.0));
        assert_eq!(second.value, SampleValue::Scalar(2.0));
        assert_eq!(sensor.next_sample(Duration::from_millis(5)).unwrap(), None);
    }

    #[test]
    fn test_imu_batches_carry_three_streams() {
        let mut sensor = SimulatedSensor::imu("bc_left", 1, Duration::from_millis(1));
        sensor.connect().unwrap();
        let features: Vec<FeatureType> = (0..3)
            .map(|_| {
                sensor
                    .next_sample(Duration::from_millis(50))
                    .unwrap()
                    .unwrap()
                    .feature_type
            })
            .collect();
        assert_eq!(
            features,
            vec![
                FeatureType::Accelerometer,
                FeatureType::Gyroscope,
                FeatureType::Quaternion
            ]
        );
    }

    #[test]
    fn test_scripted_faults() {
        let mut sensor = SimulatedSensor::temperature("t", &[30.0], Duration::from_millis(1))
            .with_fail_connects(1)
            .with_disconnect_after(0);
        assert_eq!(sensor.connect(), Err(ConnectionError::Timeout));
        sensor.connect().unwrap();
        assert!(sensor.next_sample(Duration::from_millis(5)).is_err());
        sensor.connect().unwrap();
        assert!(sensor.next_sample(Duration::from_millis(50)).unwrap().is_some());

        let mut gone = SimulatedSensor::temperature("t", &[], Duration::from_millis(1)).unreachable();
        assert_eq!(gone.scan(Duration::from_millis(1)), Err(ConnectionError::NotFound));
    }
}
