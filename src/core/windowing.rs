//! Sliding window over synchronized tuples.
//!
//! Tuples are kept in a fixed-capacity ring. A [`Window`] snapshot is handed
//! to the classifier path when the ring is full and `hop` new tuples arrived
//! since the last snapshot, or, in flush mode, when at least `min_fill`
//! tuples are buffered and the flush interval has elapsed.

use crate::collector::{SampleValue, StreamKey};
use crate::config::{FlushConfig, WindowConfig};
use crate::core::synchronizer::SyncedTuple;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Why a window was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowTrigger {
    Complete,
    Flush,
}

/// An ordered snapshot of buffered tuples, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Window {
    pub tuples: Vec<SyncedTuple>,
    pub capacity: usize,
    pub trigger: WindowTrigger,
}

impl Window {
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tuples.len() == self.capacity
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.tuples.first().map(|t| t.timestamp_window.start)
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.tuples.last().map(|t| t.timestamp_window.end)
    }

    /// Values of one stream across the window.
    pub fn series(&self, key: &StreamKey) -> Vec<&SampleValue> {
        self.tuples
            .iter()
            .filter_map(|t| t.get(key).map(|s| &s.value))
            .collect()
    }

    /// One component of one stream across the window, e.g. the z axis.
    pub fn component(&self, key: &StreamKey, index: usize) -> Vec<f64> {
        self.series(key)
            .into_iter()
            .filter_map(|v| v.components().get(index).copied())
            .collect()
    }

    /// Per-tuple magnitude of one stream.
    pub fn magnitudes(&self, key: &StreamKey) -> Vec<f64> {
        self.series(key).into_iter().map(SampleValue::magnitude).collect()
    }
}

/// Fixed-capacity FIFO ring of tuples.
pub struct SlidingWindowBuffer {
    capacity: usize,
    hop: usize,
    flush: Option<(usize, Duration)>,
    buffer: VecDeque<SyncedTuple>,
    /// Tuples pushed since the last emitted window
    since_emit: usize,
    last_emit: Option<DateTime<Utc>>,
    evicted: u64,
}

impl SlidingWindowBuffer {
    pub fn new(capacity: usize, hop: usize, flush: Option<FlushConfig>) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            hop: hop.clamp(1, capacity),
            flush: flush.map(|f| {
                (
                    f.min_fill.clamp(1, capacity),
                    Duration::from_std(f.interval).unwrap_or_else(|_| Duration::weeks(1)),
                )
            }),
            buffer: VecDeque::with_capacity(capacity),
            since_emit: 0,
            last_emit: None,
            evicted: 0,
        }
    }

    pub fn from_config(config: &WindowConfig) -> Self {
        Self::new(config.capacity, config.hop, config.flush)
    }

    /// Insert a tuple, evicting the oldest when full. Returns a window if one
    /// became due.
    pub fn push(&mut self, tuple: SyncedTuple) -> Option<Window> {
        let now = tuple.timestamp();
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
            self.evicted += 1;
        }
        self.buffer.push_back(tuple);
        self.since_emit += 1;
        self.last_emit.get_or_insert(now);

        if self.buffer.len() == self.capacity && self.since_emit >= self.hop {
            return Some(self.snapshot(now, WindowTrigger::Complete));
        }
        self.flush_due(now)
    }

    /// Emit a partial window if flush mode is on and the interval elapsed.
    pub fn flush_due(&mut self, now: DateTime<Utc>) -> Option<Window> {
        let (min_fill, interval) = self.flush?;
        let last = self.last_emit?;
        if self.since_emit > 0 && self.buffer.len() >= min_fill && now - last >= interval {
            return Some(self.snapshot(now, WindowTrigger::Flush));
        }
        None
    }

    fn snapshot(&mut self, now: DateTime<Utc>, trigger: WindowTrigger) -> Window {
        self.since_emit = 0;
        self.last_emit = Some(now);
        Window {
            tuples: self.buffer.iter().cloned().collect(),
            capacity: self.capacity,
            trigger,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn oldest(&self) -> Option<&SyncedTuple> {
        self.buffer.front()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.since_emit = 0;
        self.last_emit = None;
    }
}
