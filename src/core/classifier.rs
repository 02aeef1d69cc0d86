//! Classifier strategy and the window/classification stage.
//!
//! The stage owns the [`SlidingWindowBuffer`] for one synchronization group.
//! It receives tuples from the synchronizer, skips the configured warm-up
//! windows, hands the first processed window to the classifier as the
//! calibration window, and enqueues one event per classified window.

use crate::collector::{FeatureType, StreamKey};
use crate::config::Config;
use crate::core::event::{Event, Label};
use crate::core::queue::{EnqueueMode, EventQueue};
use crate::core::shutdown::ShutdownSignal;
use crate::core::synchronizer::{StreamSynchronizer, SyncedTuple};
use crate::core::windowing::{SlidingWindowBuffer, Window};
use crate::error::ClassifierError;
use crate::transparency::{SharedLogger, SharedTransparencyLog};
use chrono::{DateTime, Utc};
use crossbeam_channel::{select, Receiver};
use statrs::statistics::Statistics;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Strategy turning a window of synchronized samples into a label.
pub trait Classifier: Send {
    /// `calibrate` is true exactly once, for the first window after warm-up.
    fn classify(&mut self, window: &Window, calibrate: bool) -> Result<Label, ClassifierError>;
}

impl<F> Classifier for F
where
    F: FnMut(&Window, bool) -> Result<Label, ClassifierError> + Send,
{
    fn classify(&mut self, window: &Window, calibrate: bool) -> Result<Label, ClassifierError> {
        self(window, calibrate)
    }
}

/// Map a numeric stereotypy class to its label.
pub fn stereotypy_label(tag: i64) -> Label {
    match tag {
        0 => Label::new("NO_CLASS"),
        1 => Label::new("NON_DANGEROUS"),
        2 => Label::new("DANGEROUS"),
        3 => Label::new("NON_STEREOTYPY"),
        other => Label::new(other.to_string()),
    }
}

/// Reference classifier scoring wrist motion against a calibrated baseline.
///
/// The calibration window fixes the baseline spread of accelerometer
/// magnitude. Later windows are labelled by how many times that spread they
/// show.
#[derive(Debug, Clone)]
pub struct MotionEnergyClassifier {
    baseline: f64,
    non_dangerous_ratio: f64,
    dangerous_ratio: f64,
}

impl MotionEnergyClassifier {
    /// Baseline spread never drops below this, in mg.
    const MIN_BASELINE: f64 = 1.0;

    pub fn new() -> Self {
        Self {
            baseline: Self::MIN_BASELINE,
            non_dangerous_ratio: 2.0,
            dangerous_ratio: 4.0,
        }
    }

    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    fn spread(window: &Window) -> Result<f64, ClassifierError> {
        let keys: Vec<StreamKey> = window
            .tuples
            .first()
            .map(|t| {
                t.values
                    .keys()
                    .filter(|k| k.feature_type == FeatureType::Accelerometer)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if keys.is_empty() {
            return Err(ClassifierError("no accelerometer samples in window".into()));
        }

        let spreads: Vec<f64> = keys
            .iter()
            .map(|k| window.magnitudes(k).iter().std_dev())
            .map(|sd| if sd.is_finite() { sd } else { 0.0 })
            .collect();
        Ok(spreads.into_iter().fold(0.0, f64::max))
    }
}

impl Default for MotionEnergyClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for MotionEnergyClassifier {
    fn classify(&mut self, window: &Window, calibrate: bool) -> Result<Label, ClassifierError> {
        let spread = Self::spread(window)?;
        if calibrate {
            self.baseline = spread.max(Self::MIN_BASELINE);
            tracing::info!(baseline = self.baseline, "Motion baseline calibrated");
            return Ok(stereotypy_label(0));
        }

        let ratio = spread / self.baseline;
        let tag = if ratio >= self.dangerous_ratio {
            2
        } else if ratio >= self.non_dangerous_ratio {
            1
        } else {
            3
        };
        Ok(stereotypy_label(tag))
    }
}

pub struct ClassificationStage {
    classifier: Box<dyn Classifier>,
    buffer: SlidingWindowBuffer,
    synchronizer: Option<Arc<StreamSynchronizer>>,
    queue: EventQueue,
    mode: EnqueueMode,
    group_id: String,
    warmup_remaining: u32,
    calibrated: bool,
    gate_during_calibration: bool,
    logger: SharedLogger,
    stats: SharedTransparencyLog,
}

impl ClassificationStage {
    pub fn new(
        config: &Config,
        classifier: Box<dyn Classifier>,
        queue: EventQueue,
        logger: SharedLogger,
        stats: SharedTransparencyLog,
    ) -> Self {
        Self {
            classifier,
            buffer: SlidingWindowBuffer::from_config(&config.window),
            synchronizer: None,
            queue,
            mode: config.queue.classifier_mode,
            group_id: config.sync.group_id.clone(),
            warmup_remaining: config.window.warmup_windows,
            calibrated: false,
            gate_during_calibration: config.window.gate_during_calibration,
            logger,
            stats,
        }
    }

    /// Expire stale pending samples of this synchronizer on every tick.
    pub fn with_synchronizer(mut self, synchronizer: Arc<StreamSynchronizer>) -> Self {
        self.synchronizer = Some(synchronizer);
        self
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one tuple. Returns the event enqueued for it, if any.
    pub fn on_tuple(&mut self, tuple: SyncedTuple) -> Option<Event> {
        let window = self.buffer.push(tuple)?;
        self.process(window)
    }

    /// Periodic housekeeping when no tuples arrive.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<Event> {
        if let Some(sync) = &self.synchronizer {
            sync.expire(now);
        }
        let window = self.buffer.flush_due(now)?;
        self.process(window)
    }

    fn process(&mut self, window: Window) -> Option<Event> {
        self.stats.record_window_emitted();

        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            self.stats.record_window_skipped();
            tracing::debug!(remaining = self.warmup_remaining, "Warm-up window skipped");
            return None;
        }

        let calibrate = !self.calibrated;
        let label = match self.classifier.classify(&window, calibrate) {
            Ok(label) => label,
            Err(e) => {
                self.logger
                    .error(&format!("[{}] Classification failed: {e}", self.group_id));
                return None;
            }
        };
        self.stats.record_window_classified();

        if calibrate {
            self.calibrated = true;
            self.logger
                .info(&format!("[{}] Calibration complete", self.group_id));
        }

        let timestamp = window.end().unwrap_or_else(Utc::now);
        let event = Event::new(timestamp, self.group_id.clone(), FeatureType::Imu, label)
            .gated(calibrate && self.gate_during_calibration);

        match self.queue.enqueue(event.clone(), self.mode) {
            Ok(()) => Some(event),
            // Already logged by the queue
            Err(_) => None,
        }
    }

    /// Run the stage on its own thread until shutdown or until the tuple
    /// channel closes.
    pub fn spawn(
        mut self,
        tuples: Receiver<SyncedTuple>,
        shutdown: ShutdownSignal,
        tick: Duration,
    ) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("classification".into())
            .spawn(move || {
                tracing::info!(group = %self.group_id, "Classification stage started");
                loop {
                    if shutdown.is_triggered() {
                        break;
                    }
                    select! {
                        recv(tuples) -> msg => match msg {
                            Ok(tuple) => {
                                self.on_tuple(tuple);
                            }
                            Err(_) => break,
                        },
                        recv(shutdown.receiver()) -> _ => break,
                        default(tick) => {
                            self.tick(Utc::now());
                        }
                    }
                }
                tracing::info!(group = %self.group_id, "Classification stage stopped");
            })
    }
}
