//! Core notifications and the bus that fans them out.
//!
//! Collaborators (renderer, achievements, logging) subscribe and receive a bounded
//! crossbeam channel. Publishing never blocks the frame thread: a full subscriber drops the
//! event and the drop is counted.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::mapper::ParameterSet;
use crate::objects::ObjectId;
use crate::scheduler::PulseTick;
use crate::session::{IdentificationOutcome, SessionPhase};

const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// Always published before the matching `ParametersUpdated`
    ArousalChanged { old: f64, new: f64 },
    ParametersUpdated(ParameterSet),
    PhaseChanged {
        from: SessionPhase,
        to: SessionPhase,
        at_sec: f64,
    },
    PulseTick(PulseTick),
    IdentificationOutcome(IdentificationOutcome),
    BreathingEntered { at_sec: f64 },
    BreathingExited { duration_sec: f64 },
    TargetsShifted { promoted: ObjectId, demoted: ObjectId },
}

/// Bus delivery counters
#[derive(Debug, Default)]
pub struct BusMetrics {
    pub published: AtomicU64,
    pub dropped_full: AtomicU64,
    pub disconnected: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusMetricsSnapshot {
    pub published: u64,
    pub dropped_full: u64,
    pub disconnected: u64,
}

impl BusMetrics {
    pub fn snapshot(&self) -> BusMetricsSnapshot {
        BusMetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
            disconnected: self.disconnected.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable handle; clones publish to the same subscribers.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<CoreEvent>>>>,
    metrics: Arc<BusMetrics>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.subscribe_with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn subscribe_with_capacity(&self, capacity: usize) -> Receiver<CoreEvent> {
        let (tx, rx) = bounded(capacity.max(1));
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn publish(&self, event: CoreEvent) {
        self.metrics.published.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.metrics.dropped_full.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                self.metrics.disconnected.fetch_add(1, Ordering::Relaxed);
                false
            }
        });
    }

    pub fn metrics(&self) -> BusMetricsSnapshot {
        self.metrics.snapshot()
    }
}
