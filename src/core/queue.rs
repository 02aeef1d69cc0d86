//! Bounded event queue between producers (listeners, classifier stage) and
//! the dispatcher.
//!
//! Multi-producer, single-consumer. Events are delivered FIFO. Overflow is
//! resolved per call by an [`EnqueueMode`], and every drop is logged.

use crate::core::event::Event;
use crate::core::shutdown::ShutdownSignal;
use crate::error::PipelineError;
use crate::transparency::{SharedLogger, SharedTransparencyLog};
use crossbeam_channel::{bounded, select, Receiver, SendTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Overflow behavior of [`EventQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueMode {
    /// Reject the new event
    #[default]
    DropNewest,
    /// Evict the oldest queued event to make room
    DropOldest,
    /// Wait up to the queue's block timeout, then reject
    Block,
}

#[derive(Clone)]
pub struct EventQueue {
    sender: Sender<Event>,
    // Producers keep a receiver clone so drop-oldest can evict the head
    receiver: Receiver<Event>,
    capacity: usize,
    block_timeout: Duration,
    logger: SharedLogger,
    stats: SharedTransparencyLog,
}

impl EventQueue {
    pub fn new(
        capacity: usize,
        block_timeout: Duration,
        logger: SharedLogger,
        stats: SharedTransparencyLog,
    ) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
            block_timeout,
            logger,
            stats,
        }
    }

    /// Append an event. Never blocks longer than the configured timeout.
    pub fn enqueue(&self, event: Event, mode: EnqueueMode) -> Result<(), PipelineError> {
        let result = match mode {
            EnqueueMode::DropNewest => self.sender.try_send(event).map_err(|e| match e {
                TrySendError::Full(ev) => self.saturated(&ev, "queue full, new event dropped"),
                TrySendError::Disconnected(_) => PipelineError::ShuttingDown,
            }),
            EnqueueMode::Block => self
                .sender
                .send_timeout(event, self.block_timeout)
                .map_err(|e| match e {
                    SendTimeoutError::Timeout(ev) => self.saturated(
                        &ev,
                        &format!(
                            "queue full for {} ms, new event dropped",
                            self.block_timeout.as_millis()
                        ),
                    ),
                    SendTimeoutError::Disconnected(_) => PipelineError::ShuttingDown,
                }),
            EnqueueMode::DropOldest => self.enqueue_drop_oldest(event),
        };

        if result.is_ok() {
            self.stats.record_event_enqueued();
        }
        result
    }

    fn enqueue_drop_oldest(&self, event: Event) -> Result<(), PipelineError> {
        let event = match self.sender.try_send(event) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Disconnected(_)) => return Err(PipelineError::ShuttingDown),
            Err(TrySendError::Full(ev)) => ev,
        };

        if let Ok(oldest) = self.receiver.try_recv() {
            self.stats.record_event_dropped();
            self.logger.warn(&format!(
                "[queue] Full, dropped oldest event {} {} ({})",
                oldest.source_id, oldest.label, oldest.id
            ));
        }

        // Another producer may have refilled the slot in between
        self.sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(ev) => self.saturated(&ev, "queue full, new event dropped"),
            TrySendError::Disconnected(_) => PipelineError::ShuttingDown,
        })
    }

    fn saturated(&self, event: &Event, reason: &str) -> PipelineError {
        self.stats.record_event_dropped();
        self.logger.warn(&format!(
            "[queue] {reason}: {} {} ({})",
            event.source_id, event.label, event.id
        ));
        PipelineError::Saturation {
            stage: "event_queue",
            detail: format!("{} {}", event.source_id, event.label),
        }
    }

    /// Block until an event is available or shutdown is triggered.
    pub fn dequeue(&self, shutdown: &ShutdownSignal) -> Option<Event> {
        if shutdown.is_triggered() {
            return None;
        }
        select! {
            recv(self.receiver) -> event => event.ok(),
            recv(shutdown.receiver()) -> _ => None,
        }
    }

    pub fn try_dequeue(&self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::FeatureType;
    use crate::core::event::Label;
    use crate::transparency::{create_shared_log, MemoryLogger};
    use chrono::Utc;
    use std::sync::Arc;

    fn event(label: &str) -> Event {
        Event::new(Utc::now(), "bc_activity", FeatureType::Activity, Label::new(label))
    }

    fn queue(capacity: usize) -> (EventQueue, Arc<MemoryLogger>, SharedTransparencyLog) {
        let memory = Arc::new(MemoryLogger::new());
        let stats = create_shared_log();
        let q = EventQueue::new(
            capacity,
            Duration::from_millis(20),
            memory.clone(),
            stats.clone(),
        );
        (q, memory, stats)
    }

    #[test]
    fn test_fifo_order() {
        let (q, _, _) = queue(4);
        for label in ["A", "B", "C"] {
            q.enqueue(event(label), EnqueueMode::DropNewest).unwrap();
        }
        let out: Vec<String> = std::iter::from_fn(|| q.try_dequeue())
            .map(|e| e.label.to_string())
            .collect();
        assert_eq!(out, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_drop_newest_when_full() {
        let (q, memory, stats) = queue(2);
        q.enqueue(event("A"), EnqueueMode::DropNewest).unwrap();
        q.enqueue(event("B"), EnqueueMode::DropNewest).unwrap();

        let err = q.enqueue(event("C"), EnqueueMode::DropNewest).unwrap_err();
        assert!(matches!(err, PipelineError::Saturation { .. }));
        assert_eq!(q.len(), 2);
        assert_eq!(stats.stats().events_dropped, 1);
        assert!(memory.system_contains("new event dropped"));
        assert_eq!(q.try_dequeue().unwrap().label.as_str(), "A");
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let (q, memory, _) = queue(2);
        q.enqueue(event("A"), EnqueueMode::DropOldest).unwrap();
        q.enqueue(event("B"), EnqueueMode::DropOldest).unwrap();
        q.enqueue(event("C"), EnqueueMode::DropOldest).unwrap();

        assert_eq!(q.len(), 2);
        assert!(memory.system_contains("dropped oldest"));
        assert_eq!(q.try_dequeue().unwrap().label.as_str(), "B");
        assert_eq!(q.try_dequeue().unwrap().label.as_str(), "C");
    }

    #[test]
    fn test_block_times_out() {
        let (q, _, _) = queue(1);
        q.enqueue(event("A"), EnqueueMode::Block).unwrap();

        let start = std::time::Instant::now();
        assert!(q.enqueue(event("B"), EnqueueMode::Block).is_err());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_dequeue_returns_none_on_shutdown() {
        let (q, _, _) = queue(1);
        let shutdown = ShutdownSignal::new();
        let trigger = shutdown.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            trigger.trigger();
        });
        assert!(q.dequeue(&shutdown).is_none());
        handle.join().unwrap();
    }
}
