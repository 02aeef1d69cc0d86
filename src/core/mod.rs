//! Core pipeline for the STOPme agent.
//!
//! This module contains:
//! - Stream synchronization of inertial samples into tuples
//! - Sliding windows and the classifier stage
//! - The bounded event queue, activation policy and dispatcher
//! - Shutdown and reconnection helpers shared by every worker thread

pub mod classifier;
pub mod dispatcher;
pub mod event;
pub mod policy;
pub mod queue;
pub mod retry;
pub mod shutdown;
pub mod synchronizer;
pub mod windowing;

// Re-export commonly used types
pub use classifier::{stereotypy_label, ClassificationStage, Classifier, MotionEnergyClassifier};
pub use dispatcher::{DispatcherHandle, DispatcherState, EventDispatcher};
pub use event::{Event, Label};
pub use policy::{params_for, ActivationPolicy, Intensity};
pub use queue::{EnqueueMode, EventQueue};
pub use retry::{connect_with_backoff, Backoff};
pub use shutdown::ShutdownSignal;
pub use synchronizer::{LateSamplePolicy, StreamSynchronizer, SyncStats, SyncedTuple, TimestampWindow};
pub use windowing::{SlidingWindowBuffer, Window, WindowTrigger};
