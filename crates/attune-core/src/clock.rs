//! Monotonic clock source
//!
//! Every component that needs "now" receives it through [`Clock`]. Production code injects
//! [`MonotonicClock`]; tests inject [`ManualClock`] and advance it explicitly, so a ten minute
//! session can be simulated without sleeping.
//!
//! # Invariants
//! - `now_us()` never decreases
//! - Nothing in the crate reads `std::time` directly except `MonotonicClock`

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time source, microsecond resolution.
pub trait Clock: Send + Sync {
    /// Microseconds since an arbitrary, fixed origin.
    fn now_us(&self) -> i64;

    /// Seconds since the same origin.
    fn now_sec(&self) -> f64 {
        self.now_us() as f64 / 1_000_000.0
    }
}

/// Compute a time delta in microseconds with saturating subtraction.
/// A clock that went backwards yields 0 instead of wrapping.
pub fn dt_us(now_us: i64, last_us: i64) -> u64 {
    if now_us >= last_us {
        (now_us - last_us) as u64
    } else {
        0
    }
}

/// Convenience wrapper around [`dt_us`] for floating-point calculations.
pub fn dt_sec(now_us: i64, last_us: i64) -> f64 {
    dt_us(now_us, last_us) as f64 / 1_000_000.0
}

/// Real monotonic clock backed by [`Instant`]. Unaffected by wall-clock adjustments.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> i64 {
        self.origin.elapsed().as_micros().min(i64::MAX as u128) as i64
    }
}

/// Controllable clock for deterministic tests and headless simulation.
///
/// Clones share the same underlying time, so a test can keep one handle and give another
/// (as `Arc<dyn Clock>`) to the engine.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_us: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start at a specific time.
    pub fn starting_at_us(ts_us: i64) -> Self {
        Self {
            now_us: Arc::new(AtomicI64::new(ts_us)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let us = by.as_micros().min(i64::MAX as u128) as i64;
        self.now_us.fetch_add(us, Ordering::SeqCst);
    }

    /// Advance by fractional seconds. Negative or non-finite values are ignored.
    pub fn advance_sec(&self, secs: f64) {
        if secs.is_finite() && secs > 0.0 {
            self.advance(Duration::from_secs_f64(secs));
        }
    }

    /// Jump to an absolute time.
    ///
    /// # Returns
    /// * `Ok(())` - Clock moved forward (or stayed put)
    /// * `Err(msg)` - If the requested time is earlier than now
    pub fn set_us(&self, ts_us: i64) -> Result<(), String> {
        let current = self.now_us.load(Ordering::SeqCst);
        if ts_us < current {
            return Err(format!(
                "Timestamp regression: requested={} < now={} (delta={}us)",
                ts_us,
                current,
                ts_us - current
            ));
        }
        self.now_us.store(ts_us, Ordering::SeqCst);
        Ok(())
    }

    /// Share this clock as a trait object.
    pub fn shared(&self) -> Arc<dyn Clock> {
        Arc::new(self.clone())
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> i64 {
        self.now_us.load(Ordering::SeqCst)
    }
}
