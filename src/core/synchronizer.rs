//! Multi-stream sample alignment.
//!
//! Each required stream keeps a short FIFO of pending samples. Whenever
//! every stream has a head and the heads lie within `max_skew` of each
//! other, the heads are emitted together as one [`SyncedTuple`]. Heads that
//! can no longer be matched are discarded per [`LateSamplePolicy`], and
//! samples waiting longer than `sync_timeout` expire. Every discard is
//! logged; nothing is ever merged retroactively.
//!
//! Completed tuples go to an outbox under the state lock and are sent after
//! it is released, by one drainer at a time, so a saturated window stage
//! never holds up other streams' listeners.

use crate::collector::{Sample, StreamKey};
use crate::config::SyncConfig;
use crate::error::PipelineError;
use crate::transparency::{SharedLogger, SharedTransparencyLog};
use chrono::{DateTime, Utc};
use crossbeam_channel::{SendTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::Duration;

/// What to discard when the pending heads are further apart than `max_skew`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LateSamplePolicy {
    /// Drop only the oldest head; the others keep waiting for partners
    #[default]
    DiscardOldest,
    /// Drop every pending sample of the group and start over
    DiscardGroup,
}

/// Time span covered by the samples of one tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimestampWindow {
    pub fn skew(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// One aligned sample per required stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedTuple {
    pub timestamp_window: TimestampWindow,
    pub values: BTreeMap<StreamKey, Sample>,
}

impl SyncedTuple {
    pub fn get(&self, key: &StreamKey) -> Option<&Sample> {
        self.values.get(key)
    }

    /// Timestamp of the latest constituent sample.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp_window.end
    }
}

/// Per-stream emission and discard counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub emitted: u64,
    /// Pending overflow and skew discards, keyed by stream
    pub dropped: BTreeMap<String, u64>,
    /// Samples that expired waiting for partners
    pub unmatched: BTreeMap<String, u64>,
}

struct SyncState {
    pending: BTreeMap<StreamKey, VecDeque<Sample>>,
    /// Completed tuples waiting to be sent, in emission order
    outbox: VecDeque<SyncedTuple>,
    stats: SyncStats,
}

pub struct StreamSynchronizer {
    streams: Vec<StreamKey>,
    max_skew: chrono::Duration,
    sync_timeout: chrono::Duration,
    max_pending: usize,
    policy: LateSamplePolicy,
    max_block: Duration,
    output: Sender<SyncedTuple>,
    state: Mutex<SyncState>,
    /// Held by the one thread currently sending the outbox
    drainer: Mutex<()>,
    logger: SharedLogger,
    stats: SharedTransparencyLog,
}

impl StreamSynchronizer {
    pub fn new(
        streams: Vec<StreamKey>,
        config: &SyncConfig,
        max_block: Duration,
        output: Sender<SyncedTuple>,
        logger: SharedLogger,
        stats: SharedTransparencyLog,
    ) -> Self {
        let pending = streams
            .iter()
            .map(|key| (key.clone(), VecDeque::with_capacity(config.max_pending)))
            .collect();

        Self {
            streams,
            max_skew: to_chrono(config.max_skew),
            sync_timeout: to_chrono(config.sync_timeout),
            max_pending: config.max_pending.max(1),
            policy: config.late_sample_policy,
            max_block,
            output,
            state: Mutex::new(SyncState {
                pending,
                outbox: VecDeque::new(),
                stats: SyncStats::default(),
            }),
            drainer: Mutex::new(()),
            logger,
            stats,
        }
    }

    pub fn streams(&self) -> &[StreamKey] {
        &self.streams
    }

    pub fn requires(&self, key: &StreamKey) -> bool {
        self.streams.contains(key)
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a sample and emit every tuple that becomes complete.
    ///
    /// Blocks at most `max_block` per sent tuple when the window stage is
    /// saturated; the tuple is dropped and logged in that case. Never blocks
    /// while holding the state lock.
    pub fn submit(&self, sample: Sample) -> Result<(), PipelineError> {
        let key = sample.stream_key();
        if !self.requires(&key) {
            self.logger
                .warn(&format!("[sync] Sample for unknown stream {key} ignored"));
            return Err(PipelineError::UnknownStream(key.to_string()));
        }

        let mut state = self.lock();
        self.expire_locked(&mut state, sample.timestamp);

        let overflow = {
            let queue = state.pending.entry(key.clone()).or_default();
            queue.push_back(sample);
            if queue.len() > self.max_pending {
                queue.pop_front()
            } else {
                None
            }
        };
        if let Some(old) = overflow {
            *state.stats.dropped.entry(key.to_string()).or_default() += 1;
            self.stats.record_sample_dropped();
            self.logger.warn(&format!(
                "[sync] Pending buffer for {key} full, dropped sample at {}",
                old.timestamp
            ));
        }

        while let Some(tuple) = self.next_tuple(&mut state) {
            state.stats.emitted += 1;
            if state.outbox.len() >= self.max_pending {
                self.stats.record_sample_dropped();
                self.logger.warn(&format!(
                    "[sync] Outbox full, dropped tuple ending at {}",
                    tuple.timestamp()
                ));
                continue;
            }
            state.outbox.push_back(tuple);
        }
        drop(state);

        self.drain_outbox()
    }

    /// Send queued tuples unless another thread is already doing so.
    fn drain_outbox(&self) -> Result<(), PipelineError> {
        let mut result = Ok(());
        loop {
            let _drainer = match self.drainer.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return result,
            };
            loop {
                let next = self.lock().outbox.pop_front();
                let Some(tuple) = next else {
                    break;
                };
                if let Err(e) = self.emit(tuple) {
                    result = Err(e);
                }
            }
            drop(_drainer);

            // A tuple queued while we were releasing would otherwise wait for
            // the next submit.
            if self.lock().outbox.is_empty() {
                return result;
            }
        }
    }

    fn next_tuple(&self, state: &mut SyncState) -> Option<SyncedTuple> {
        loop {
            let mut oldest: Option<(&StreamKey, DateTime<Utc>)> = None;
            let mut newest: Option<DateTime<Utc>> = None;
            for key in &self.streams {
                let head = state.pending.get(key)?.front()?;
                if oldest.map_or(true, |(_, ts)| head.timestamp < ts) {
                    oldest = Some((key, head.timestamp));
                }
                if newest.map_or(true, |ts| head.timestamp > ts) {
                    newest = Some(head.timestamp);
                }
            }
            let ((oldest_key, start), end) = (oldest?, newest?);

            if end - start <= self.max_skew {
                let values = self
                    .streams
                    .iter()
                    .filter_map(|key| {
                        let sample = state.pending.get_mut(key)?.pop_front()?;
                        Some((key.clone(), sample))
                    })
                    .collect();
                return Some(SyncedTuple {
                    timestamp_window: TimestampWindow { start, end },
                    values,
                });
            }

            let oldest_key = oldest_key.clone();
            let skew_ms = (end - start).num_milliseconds();
            match self.policy {
                LateSamplePolicy::DiscardOldest => {
                    if let Some(queue) = state.pending.get_mut(&oldest_key) {
                        queue.pop_front();
                    }
                    *state
                        .stats
                        .dropped
                        .entry(oldest_key.to_string())
                        .or_default() += 1;
                    self.stats.record_sample_dropped();
                    self.logger.warn(&format!(
                        "[sync] Late sample on {oldest_key} discarded (skew {skew_ms} ms)"
                    ));
                }
                LateSamplePolicy::DiscardGroup => {
                    let mut discarded = 0;
                    for (key, queue) in state.pending.iter_mut() {
                        if !queue.is_empty() {
                            *state.stats.dropped.entry(key.to_string()).or_default() +=
                                queue.len() as u64;
                            discarded += queue.len();
                            queue.clear();
                        }
                    }
                    for _ in 0..discarded {
                        self.stats.record_sample_dropped();
                    }
                    self.logger.warn(&format!(
                        "[sync] Group out of alignment (skew {skew_ms} ms), discarded {discarded} pending samples"
                    ));
                    return None;
                }
            }
        }
    }

    fn emit(&self, tuple: SyncedTuple) -> Result<(), PipelineError> {
        match self.output.send_timeout(tuple, self.max_block) {
            Ok(()) => {
                self.stats.record_tuple_synced();
                Ok(())
            }
            Err(SendTimeoutError::Timeout(tuple)) => {
                self.stats.record_sample_dropped();
                self.logger.warn(&format!(
                    "[sync] Window stage saturated, dropped tuple ending at {}",
                    tuple.timestamp()
                ));
                Err(PipelineError::Saturation {
                    stage: "synchronizer",
                    detail: format!("tuple ending at {}", tuple.timestamp()),
                })
            }
            Err(SendTimeoutError::Disconnected(_)) => Err(PipelineError::ShuttingDown),
        }
    }

    /// Discard pending samples older than `sync_timeout` relative to `now`.
    pub fn expire(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        self.expire_locked(&mut state, now)
    }

    fn expire_locked(&self, state: &mut SyncState, now: DateTime<Utc>) -> usize {
        let mut expired = Vec::new();
        for (key, queue) in state.pending.iter_mut() {
            while let Some(front) = queue.front() {
                let age = now - front.timestamp;
                if age <= self.sync_timeout {
                    break;
                }
                queue.pop_front();
                expired.push(PipelineError::SynchronizationTimeout {
                    stream: key.to_string(),
                    age_ms: age.num_milliseconds(),
                });
            }
        }

        for err in &expired {
            if let PipelineError::SynchronizationTimeout { stream, .. } = err {
                *state.stats.unmatched.entry(stream.clone()).or_default() += 1;
            }
            self.stats.record_sample_unmatched();
            self.logger.warn(&format!("[sync] {err}"));
        }
        expired.len()
    }

    pub fn pending(&self, key: &StreamKey) -> usize {
        self.lock().pending.get(key).map_or(0, VecDeque::len)
    }

    pub fn stats(&self) -> SyncStats {
        self.lock().stats.clone()
    }

    /// Forget all pending samples, e.g. after a source reconnects.
    pub fn reset(&self) {
        let mut state = self.lock();
        for queue in state.pending.values_mut() {
            queue.clear();
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{FeatureType, SampleValue};
    use crate::transparency::{create_shared_log, MemoryLogger};
    use chrono::TimeZone;
    use crossbeam_channel::{bounded, Receiver};
    use std::sync::Arc;

    fn left() -> StreamKey {
        StreamKey::new("bc_left", FeatureType::Accelerometer)
    }

    fn right() -> StreamKey {
        StreamKey::new("bc_right", FeatureType::Accelerometer)
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn sample(key: &StreamKey, ms: i64) -> Sample {
        Sample::new(
            key.source_id.clone(),
            key.feature_type,
            SampleValue::Vector(vec![0.0, 0.0, 1000.0]),
            at(ms),
        )
    }

    fn left_gyro() -> StreamKey {
        StreamKey::new("bc_left", FeatureType::Gyroscope)
    }

    fn synchronizer(
        streams: Vec<StreamKey>,
        policy: LateSamplePolicy,
        buffer: usize,
        max_block: Duration,
    ) -> (StreamSynchronizer, Receiver<SyncedTuple>, Arc<MemoryLogger>) {
        let memory = Arc::new(MemoryLogger::new());
        let (tx, rx) = bounded(buffer);
        let config = SyncConfig {
            max_skew: Duration::from_millis(25),
            sync_timeout: Duration::from_millis(500),
            max_pending: 4,
            late_sample_policy: policy,
            ..SyncConfig::default()
        };
        let sync = StreamSynchronizer::new(
            streams,
            &config,
            max_block,
            tx,
            memory.clone(),
            create_shared_log(),
        );
        (sync, rx, memory)
    }

    fn setup(
        policy: LateSamplePolicy,
    ) -> (StreamSynchronizer, Receiver<SyncedTuple>, Arc<MemoryLogger>) {
        synchronizer(vec![left(), right()], policy, 16, Duration::from_millis(5))
    }

    #[test]
    fn test_emits_when_within_skew() {
        let (sync, rx, _) = setup(LateSamplePolicy::DiscardOldest);
        sync.submit(sample(&left(), 0)).unwrap();
        assert!(rx.try_recv().is_err());

        sync.submit(sample(&right(), 20)).unwrap();
        let tuple = rx.try_recv().unwrap();
        assert_eq!(tuple.values.len(), 2);
        assert_eq!(tuple.timestamp_window.skew(), chrono::Duration::milliseconds(20));
        assert_eq!(sync.pending(&left()), 0);
        assert_eq!(sync.stats().emitted, 1);
    }

    #[test]
    fn test_late_sample_discarded_never_emitted() {
        let (sync, rx, memory) = setup(LateSamplePolicy::DiscardOldest);
        sync.submit(sample(&left(), 0)).unwrap();
        sync.submit(sample(&right(), 100)).unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(sync.pending(&left()), 0);
        assert_eq!(sync.pending(&right()), 1);
        assert!(memory.system_contains("Late sample on bc_left/accelerometer"));

        // The survivor still pairs with a later partner.
        sync.submit(sample(&left(), 110)).unwrap();
        let tuple = rx.try_recv().unwrap();
        assert_eq!(tuple.get(&left()).unwrap().timestamp, at(110));
    }

    #[test]
    fn test_earliest_candidate_wins() {
        let (sync, rx, _) = setup(LateSamplePolicy::DiscardOldest);
        sync.submit(sample(&left(), 0)).unwrap();
        sync.submit(sample(&left(), 10)).unwrap();
        sync.submit(sample(&right(), 15)).unwrap();

        let tuple = rx.try_recv().unwrap();
        assert_eq!(tuple.get(&left()).unwrap().timestamp, at(0));
        assert_eq!(sync.pending(&left()), 1);
    }

    #[test]
    fn test_unmatched_sample_expires() {
        let (sync, rx, memory) = setup(LateSamplePolicy::DiscardOldest);
        sync.submit(sample(&left(), 0)).unwrap();

        assert_eq!(sync.expire(at(400)), 0);
        assert_eq!(sync.expire(at(600)), 1);
        assert!(rx.try_recv().is_err());
        assert!(memory.system_contains("discarded after 600 ms"));
        assert_eq!(sync.stats().unmatched.get("bc_left/accelerometer"), Some(&1));
    }

    #[test]
    fn test_discard_group_clears_everything() {
        let (sync, rx, _) = setup(LateSamplePolicy::DiscardGroup);
        sync.submit(sample(&left(), 0)).unwrap();
        sync.submit(sample(&left(), 5)).unwrap();
        sync.submit(sample(&right(), 100)).unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(sync.pending(&left()), 0);
        assert_eq!(sync.pending(&right()), 0);
    }

    #[test]
    fn test_unknown_stream_rejected() {
        let (sync, _, _) = setup(LateSamplePolicy::DiscardOldest);
        let stray = StreamKey::new("bc_left", FeatureType::Gyroscope);
        assert!(matches!(
            sync.submit(sample(&stray, 0)),
            Err(PipelineError::UnknownStream(_))
        ));
    }

    #[test]
    fn test_pending_overflow_drops_oldest() {
        let (sync, _, memory) = setup(LateSamplePolicy::DiscardOldest);
        for i in 0..5 {
            sync.submit(sample(&left(), i * 10)).unwrap();
        }
        assert_eq!(sync.pending(&left()), 4);
        assert!(memory.system_contains("Pending buffer for bc_left/accelerometer full"));
    }

    #[test]
    fn test_three_streams_drop_only_the_late_head() {
        let streams = vec![left(), right(), left_gyro()];
        let (sync, rx, memory) = synchronizer(
            streams,
            LateSamplePolicy::DiscardOldest,
            16,
            Duration::from_millis(5),
        );
        sync.submit(sample(&left(), 0)).unwrap();
        sync.submit(sample(&left_gyro(), 100)).unwrap();
        sync.submit(sample(&right(), 105)).unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(sync.pending(&left()), 0);
        assert_eq!(sync.pending(&left_gyro()), 1);
        assert_eq!(sync.pending(&right()), 1);
        assert!(memory.system_contains("Late sample on bc_left/accelerometer"));

        sync.submit(sample(&left(), 110)).unwrap();
        let tuple = rx.try_recv().unwrap();
        assert_eq!(tuple.values.len(), 3);
        assert_eq!(tuple.get(&left_gyro()).unwrap().timestamp, at(100));
        assert_eq!(tuple.get(&right()).unwrap().timestamp, at(105));
        assert_eq!(tuple.timestamp_window.skew(), chrono::Duration::milliseconds(10));
    }

    #[test]
    fn test_three_streams_discard_group_drops_all_heads() {
        let streams = vec![left(), right(), left_gyro()];
        let (sync, rx, _) = synchronizer(
            streams,
            LateSamplePolicy::DiscardGroup,
            16,
            Duration::from_millis(5),
        );
        sync.submit(sample(&left(), 0)).unwrap();
        sync.submit(sample(&left_gyro(), 100)).unwrap();
        sync.submit(sample(&right(), 105)).unwrap();

        assert_eq!(sync.pending(&left()), 0);
        assert_eq!(sync.pending(&left_gyro()), 0);
        assert_eq!(sync.pending(&right()), 0);

        sync.submit(sample(&left(), 110)).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(sync.stats().dropped.values().sum::<u64>(), 3);
    }

    #[test]
    fn test_saturated_send_does_not_block_other_streams() {
        let (sync, rx, _) = synchronizer(
            vec![left(), right()],
            LateSamplePolicy::DiscardOldest,
            1,
            Duration::from_millis(400),
        );
        // Fill the single slot of the output channel.
        sync.submit(sample(&left(), 0)).unwrap();
        sync.submit(sample(&right(), 0)).unwrap();

        std::thread::scope(|scope| {
            let blocked = scope.spawn(|| {
                sync.submit(sample(&left(), 50)).unwrap();
                sync.submit(sample(&right(), 50))
            });
            std::thread::sleep(Duration::from_millis(100));

            let started = std::time::Instant::now();
            sync.submit(sample(&left(), 100)).unwrap();
            assert_eq!(sync.pending(&left()), 1);
            assert!(started.elapsed() < Duration::from_millis(150));

            let result = blocked.join().unwrap();
            assert!(matches!(result, Err(PipelineError::Saturation { .. })));
        });
        assert_eq!(rx.len(), 1);
    }
}
