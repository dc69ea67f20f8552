//! Precision pulse scheduler
//!
//! Converts a mutable frequency into a tick stream driven by the host's frame callback.
//! Frame jitter does not leak into tick timing: each tick carries its *intended* timestamp,
//! advanced in exact `1/f` steps, and downstream channels schedule relative to that.
//!
//! # Invariants
//! - The accumulator is decremented, never reset, so phase error does not build up
//! - The first frame after `start()` only sets the baseline
//! - Falling behind the next intended tick by more than the resync threshold re-anchors
//!   instead of bursting
//! - Frequency is always finite and >= `MIN_FREQUENCY_HZ`

use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;

/// Floor applied to zero, negative or non-finite frequencies.
pub const MIN_FREQUENCY_HZ: f64 = 0.01;

/// One scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseTick {
    /// When the tick was meant to happen, in clock seconds
    pub intended_sec: f64,
    pub seq: u64,
}

#[inline]
fn sanitize_frequency(hz: f64) -> f64 {
    if hz.is_finite() && hz >= MIN_FREQUENCY_HZ {
        hz
    } else {
        MIN_FREQUENCY_HZ
    }
}

#[derive(Debug, Clone)]
pub struct PulseScheduler {
    frequency_hz: f64,
    running: bool,
    baseline_set: bool,
    accumulated_sec: f64,
    next_tick_sec: f64,
    seq: u64,
    resync_threshold_sec: f64,
    resync_count: u64,
}

impl PulseScheduler {
    pub fn new(frequency_hz: f64, cfg: &SchedulerConfig) -> Self {
        if !(frequency_hz.is_finite() && frequency_hz >= MIN_FREQUENCY_HZ) {
            log::warn!(
                "Scheduler frequency {} out of range, clamping to {}",
                frequency_hz,
                MIN_FREQUENCY_HZ
            );
        }
        Self {
            frequency_hz: sanitize_frequency(frequency_hz),
            running: false,
            baseline_set: false,
            accumulated_sec: 0.0,
            next_tick_sec: 0.0,
            seq: 0,
            resync_threshold_sec: cfg.resync_threshold_sec.max(f64::EPSILON),
            resync_count: 0,
        }
    }

    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    pub fn interval_sec(&self) -> f64 {
        1.0 / self.frequency_hz
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Total ticks emitted since construction.
    pub fn ticks_emitted(&self) -> u64 {
        self.seq
    }

    pub fn resync_count(&self) -> u64 {
        self.resync_count
    }

    /// Change frequency. Takes effect on the next accumulation check; the pending intended
    /// timestamp is re-anchored to the new interval so stamps stay consistent with the
    /// accumulator.
    pub fn set_frequency(&mut self, hz: f64) {
        let hz = sanitize_frequency(hz);
        if hz == self.frequency_hz {
            return;
        }
        let old_interval = self.interval_sec();
        self.frequency_hz = hz;
        if self.baseline_set {
            self.next_tick_sec += self.interval_sec() - old_interval;
        }
    }

    /// Idempotent.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.baseline_set = false;
        self.accumulated_sec = 0.0;
        log::debug!("Pulse scheduler started at {:.3} Hz", self.frequency_hz);
    }

    /// Idempotent. Discards accumulated time.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.baseline_set = false;
        self.accumulated_sec = 0.0;
        log::debug!("Pulse scheduler stopped after {} ticks", self.seq);
    }

    /// Feed one host frame. Calls `on_tick` for each tick due and returns how many fired.
    pub fn on_frame<F: FnMut(PulseTick)>(
        &mut self,
        timestamp_sec: f64,
        elapsed_sec: f64,
        mut on_tick: F,
    ) -> usize {
        if !self.running {
            return 0;
        }
        let interval = self.interval_sec();

        if !self.baseline_set {
            self.baseline_set = true;
            self.accumulated_sec = 0.0;
            self.next_tick_sec = timestamp_sec + interval;
            return 0;
        }

        let elapsed = if elapsed_sec.is_finite() && elapsed_sec > 0.0 {
            elapsed_sec
        } else {
            0.0
        };
        self.accumulated_sec += elapsed;

        let lag = timestamp_sec - self.next_tick_sec;
        if lag > self.resync_threshold_sec {
            log::warn!(
                "Pulse scheduler resync: lag={:.3}s elapsed={:.3}s, skipping catch-up",
                lag,
                elapsed
            );
            self.next_tick_sec = timestamp_sec;
            self.accumulated_sec = self.accumulated_sec.min(interval);
            self.resync_count += 1;
        }

        let mut fired = 0;
        while self.accumulated_sec >= interval {
            let tick = PulseTick {
                intended_sec: self.next_tick_sec,
                seq: self.seq,
            };
            self.seq += 1;
            self.next_tick_sec += interval;
            self.accumulated_sec -= interval;
            fired += 1;
            log::trace!("tick #{} at {:.4}", tick.seq, tick.intended_sec);
            on_tick(tick);
        }
        fired
    }

    /// Convenience wrapper collecting the frame's ticks.
    pub fn frame(&mut self, timestamp_sec: f64, elapsed_sec: f64) -> Vec<PulseTick> {
        let mut out = Vec::new();
        self.on_frame(timestamp_sec, elapsed_sec, |t| out.push(t));
        out
    }
}
