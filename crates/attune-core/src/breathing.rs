//! Breathing cycle generator
//!
//! Four-phase guided breathing (inhale / hold / exhale / hold) with two output paths:
//!
//! - **Visual**: [`BreathingCycle`] walks the phases frame by frame. A new spec is held as
//!   pending and only applied when the current cycle completes, so a cycle in progress never
//!   jumps.
//! - **Haptic**: the whole cycle is pre-rendered into an immutable [`HapticPattern`]. A new spec
//!   marks the pattern stale; [`BreathingCycle::take_haptic_rebuild`] regenerates it right away and
//!   the caller hot-swaps it, accepting a restart of the haptic cycle.
//!
//! The two paths intentionally update on different schedules.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::BreathingHapticConfig;
use crate::error::AttuneError;

/// Shortest phase the mapper will produce.
pub const MIN_BREATH_PHASE_SEC: f64 = 0.25;

/// Hard floor on inter-pulse delay, keeps pattern generation finite.
const MIN_PULSE_DELAY_SEC: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreathPhase {
    Inhale,
    HoldAfterInhale,
    Exhale,
    HoldAfterExhale,
}

impl BreathPhase {
    pub const ALL: [BreathPhase; 4] = [
        BreathPhase::Inhale,
        BreathPhase::HoldAfterInhale,
        BreathPhase::Exhale,
        BreathPhase::HoldAfterExhale,
    ];

    pub fn next(self) -> BreathPhase {
        match self {
            BreathPhase::Inhale => BreathPhase::HoldAfterInhale,
            BreathPhase::HoldAfterInhale => BreathPhase::Exhale,
            BreathPhase::Exhale => BreathPhase::HoldAfterExhale,
            BreathPhase::HoldAfterExhale => BreathPhase::Inhale,
        }
    }
}

/// Phase durations in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreathingCycleSpec {
    pub inhale: f64,
    pub hold_after_inhale: f64,
    pub exhale: f64,
    pub hold_after_exhale: f64,
}

impl BreathingCycleSpec {
    /// Build a spec, rejecting non-positive durations.
    pub fn new(
        inhale: f64,
        hold_after_inhale: f64,
        exhale: f64,
        hold_after_exhale: f64,
    ) -> Result<Self, AttuneError> {
        let spec = Self {
            inhale,
            hold_after_inhale,
            exhale,
            hold_after_exhale,
        };
        if spec.is_valid() {
            Ok(spec)
        } else {
            Err(AttuneError::InvalidBreathingSpec(format!(
                "all durations must be positive and finite: {:?}",
                spec
            )))
        }
    }

    pub fn is_valid(&self) -> bool {
        BreathPhase::ALL
            .iter()
            .all(|p| self.duration(*p).is_finite() && self.duration(*p) > 0.0)
    }

    pub fn duration(&self, phase: BreathPhase) -> f64 {
        match phase {
            BreathPhase::Inhale => self.inhale,
            BreathPhase::HoldAfterInhale => self.hold_after_inhale,
            BreathPhase::Exhale => self.exhale,
            BreathPhase::HoldAfterExhale => self.hold_after_exhale,
        }
    }

    /// Offset of `phase` from the start of the cycle.
    pub fn phase_start(&self, phase: BreathPhase) -> f64 {
        match phase {
            BreathPhase::Inhale => 0.0,
            BreathPhase::HoldAfterInhale => self.inhale,
            BreathPhase::Exhale => self.inhale + self.hold_after_inhale,
            BreathPhase::HoldAfterExhale => self.inhale + self.hold_after_inhale + self.exhale,
        }
    }

    /// Total cycle duration in seconds
    pub fn total(&self) -> f64 {
        self.inhale + self.hold_after_inhale + self.exhale + self.hold_after_exhale
    }

    /// Calculate breaths per minute for this cycle
    pub fn breaths_per_minute(&self) -> f64 {
        60.0 / self.total()
    }
}

/// One transient in a haptic pattern, timed from the start of the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HapticEvent {
    pub time_sec: f64,
    pub intensity: f32,
    pub sharpness: f32,
}

/// Immutable, time-sorted haptic event list for one breathing cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HapticPattern {
    events: Vec<HapticEvent>,
    duration_sec: f64,
}

impl HapticPattern {
    pub fn new(mut events: Vec<HapticEvent>, duration_sec: f64) -> Self {
        events.sort_by(|a, b| a.time_sec.total_cmp(&b.time_sec));
        Self {
            events,
            duration_sec,
        }
    }

    /// Single transient, used for tick-driven haptic pulses.
    pub fn transient(intensity: f32, sharpness: f32) -> Self {
        Self::new(
            vec![HapticEvent {
                time_sec: 0.0,
                intensity,
                sharpness,
            }],
            0.0,
        )
    }

    pub fn events(&self) -> &[HapticEvent] {
        &self.events
    }

    pub fn duration_sec(&self) -> f64 {
        self.duration_sec
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events whose time falls in `[start, end)`.
    pub fn events_between(&self, start: f64, end: f64) -> impl Iterator<Item = &HapticEvent> {
        self.events
            .iter()
            .filter(move |e| e.time_sec >= start && e.time_sec < end)
    }
}

#[inline]
fn ramp(from: f32, to: f32, frac: f64) -> f32 {
    let f = frac.clamp(0.0, 1.0) as f32;
    from + (to - from) * f
}

/// Render a full breathing cycle into a haptic pulse train.
///
/// - Inhale: delay shrinks as `base / factor` with `factor += acceleration` per pulse,
///   sharpness ramps max to min
/// - Hold after inhale: pulses at the shortest inhale delay, minimum sharpness
/// - Exhale: mirror of inhale, delay grows from the shortest delay, sharpness min to max
/// - Hold after exhale: silent
pub fn generate_haptic_pattern(
    spec: &BreathingCycleSpec,
    cfg: &BreathingHapticConfig,
) -> HapticPattern {
    let min_delay = cfg.min_delay_sec.max(MIN_PULSE_DELAY_SEC);
    let base_delay = cfg.base_delay_sec.max(min_delay);
    let accel = cfg.acceleration.max(0.0);
    let mut events = Vec::new();

    // Inhale: accelerating
    let offset = spec.phase_start(BreathPhase::Inhale);
    let duration = spec.inhale;
    let mut t = 0.0;
    let mut factor = 1.0;
    let mut shortest = base_delay;
    while t < duration {
        let frac = t / duration;
        events.push(HapticEvent {
            time_sec: offset + t,
            intensity: ramp(cfg.min_intensity, cfg.max_intensity, frac),
            sharpness: ramp(cfg.max_sharpness, cfg.min_sharpness, frac),
        });
        let delay = (base_delay / factor).max(min_delay);
        shortest = shortest.min(delay);
        t += delay;
        factor += accel;
    }

    // Hold after inhale: steady at the fastest rate reached
    let offset = spec.phase_start(BreathPhase::HoldAfterInhale);
    let duration = spec.hold_after_inhale;
    let mut t = 0.0;
    while t < duration {
        events.push(HapticEvent {
            time_sec: offset + t,
            intensity: cfg.max_intensity,
            sharpness: cfg.min_sharpness,
        });
        t += shortest;
    }

    // Exhale: decelerating
    let offset = spec.phase_start(BreathPhase::Exhale);
    let duration = spec.exhale;
    let mut t = 0.0;
    let mut factor = 1.0;
    while t < duration {
        let frac = t / duration;
        events.push(HapticEvent {
            time_sec: offset + t,
            intensity: ramp(cfg.max_intensity, cfg.min_intensity, frac),
            sharpness: ramp(cfg.min_sharpness, cfg.max_sharpness, frac),
        });
        t += shortest * factor;
        factor += accel;
    }

    HapticPattern::new(events, spec.total())
}

/// Result of advancing the visual cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BreathTick {
    /// Phases entered during this tick, in order
    pub entered: Vec<BreathPhase>,
    pub cycles_completed: u64,
}

/// Visual breathing driver with deferred spec changes and an eagerly rebuilt haptic pattern.
#[derive(Debug, Clone)]
pub struct BreathingCycle {
    phase: BreathPhase,
    elapsed_sec: f64,
    spec: BreathingCycleSpec,
    cycle_index: u64,
    /// Visual update, applied at the next cycle boundary
    pending_visual: Option<BreathingCycleSpec>,
    /// Latest requested spec for the haptic path
    haptic_spec: BreathingCycleSpec,
    haptic_rebuild_pending: bool,
    pattern: Arc<HapticPattern>,
    haptic_config: BreathingHapticConfig,
}

impl BreathingCycle {
    pub fn new(spec: BreathingCycleSpec, haptic_config: BreathingHapticConfig) -> Self {
        let pattern = Arc::new(generate_haptic_pattern(&spec, &haptic_config));
        Self {
            phase: BreathPhase::Inhale,
            elapsed_sec: 0.0,
            spec,
            cycle_index: 0,
            pending_visual: None,
            haptic_spec: spec,
            haptic_rebuild_pending: false,
            pattern,
            haptic_config,
        }
    }

    pub fn phase(&self) -> BreathPhase {
        self.phase
    }

    pub fn spec(&self) -> &BreathingCycleSpec {
        &self.spec
    }

    pub fn cycle_index(&self) -> u64 {
        self.cycle_index
    }

    pub fn pattern(&self) -> Arc<HapticPattern> {
        Arc::clone(&self.pattern)
    }

    pub fn has_pending_visual(&self) -> bool {
        self.pending_visual.is_some()
    }

    pub fn haptic_rebuild_pending(&self) -> bool {
        self.haptic_rebuild_pending
    }

    /// Request new durations. Invalid specs are ignored with a warning.
    pub fn update_spec(&mut self, spec: BreathingCycleSpec) {
        if !spec.is_valid() {
            log::warn!("Ignoring invalid breathing spec {:?}", spec);
            return;
        }
        let latest_visual = self.pending_visual.unwrap_or(self.spec);
        if spec != latest_visual {
            self.pending_visual = Some(spec);
        }
        if spec != self.haptic_spec {
            self.haptic_spec = spec;
            self.haptic_rebuild_pending = true;
        }
    }

    /// Regenerate the haptic pattern if durations changed since the last build.
    /// The caller swaps the returned pattern into the haptic player immediately.
    pub fn take_haptic_rebuild(&mut self) -> Option<Arc<HapticPattern>> {
        if !self.haptic_rebuild_pending {
            return None;
        }
        self.haptic_rebuild_pending = false;
        self.pattern = Arc::new(generate_haptic_pattern(
            &self.haptic_spec,
            &self.haptic_config,
        ));
        log::debug!(
            "Rebuilt breathing haptic pattern: {} events over {:.2}s",
            self.pattern.len(),
            self.pattern.duration_sec()
        );
        Some(Arc::clone(&self.pattern))
    }

    /// Restart the visual cycle from the top of inhale, applying any pending spec.
    pub fn restart(&mut self) {
        if let Some(next) = self.pending_visual.take() {
            self.spec = next;
        }
        self.phase = BreathPhase::Inhale;
        self.elapsed_sec = 0.0;
    }

    fn remaining_sec(&self) -> f64 {
        (self.spec.duration(self.phase) - self.elapsed_sec).max(0.0)
    }

    /// Move to the next phase; returns whether a cycle completed.
    fn transition(&mut self) -> bool {
        self.elapsed_sec = 0.0;
        let next = self.phase.next();
        let completed = next == BreathPhase::Inhale;
        if completed {
            self.cycle_index += 1;
            if let Some(spec) = self.pending_visual.take() {
                log::debug!("Applying pending breathing spec at cycle {}", self.cycle_index);
                self.spec = spec;
            }
        }
        self.phase = next;
        completed
    }

    /// Advance the visual cycle by `dt_sec`.
    pub fn tick(&mut self, dt_sec: f64) -> BreathTick {
        let mut out = BreathTick::default();
        if !dt_sec.is_finite() || dt_sec <= 0.0 {
            return out;
        }
        let mut dt = dt_sec;
        while dt > 0.0 {
            let left = self.remaining_sec();
            if dt < left {
                self.elapsed_sec += dt;
                break;
            }
            dt -= left;
            if self.transition() {
                out.cycles_completed += 1;
            }
            out.entered.push(self.phase);
        }
        out
    }

    /// Progress through the phase in [0, 1], for inhale/exhale animation.
    pub fn phase_progress(&self) -> f64 {
        let d = self.spec.duration(self.phase);
        if d <= 0.0 {
            return 0.0;
        }
        (self.elapsed_sec / d).clamp(0.0, 1.0)
    }

    /// Position within the whole cycle in [0, 1].
    pub fn cycle_phase_norm(&self) -> f64 {
        let total = self.spec.total();
        if total <= 0.0 {
            return 0.0;
        }
        ((self.spec.phase_start(self.phase) + self.elapsed_sec) / total).clamp(0.0, 1.0)
    }
}
