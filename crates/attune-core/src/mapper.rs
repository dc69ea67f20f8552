//! Arousal parameter mapper
//!
//! Pure mapping from a clamped arousal scalar to every gameplay, audio, visual and timing
//! parameter. Each output has its own curve:
//!
//! | Parameter                  | Input             | Curve                      |
//! |----------------------------|-------------------|----------------------------|
//! | timer frequency            | arousal           | quadratic ease-in          |
//! | audio freq / amp / square  | arousal           | linear                     |
//! | speed, speed SD            | tracking-norm     | linear                     |
//! | target count               | tracking-norm     | inverse, rounded, clamped  |
//! | identification duration    | tracking-norm     | inverse, floored           |
//! | shift / prompt intervals   | tracking-norm     | linear, min <= max         |
//! | colors                     | tracking-norm     | per-channel RGBA lerp      |
//! | breathing cycle            | tracking-norm     | linear, floored            |
//!
//! The tracking-normalized value rescales the configured arousal band to [0, 1], so the
//! tracking task saturates outside that band.

use serde::{Deserialize, Serialize};

use crate::breathing::{BreathingCycleSpec, MIN_BREATH_PHASE_SEC};
use crate::config::{IntervalCurve, MapperConfig};

#[inline]
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    // Endpoint-exact form: t = 0 yields a, t = 1 yields b
    a * (1.0 - t) + b * t
}

/// Clamp arousal into [0, 1]; non-finite input maps to 0.
#[inline]
pub fn clamp_arousal(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Straight-alpha RGBA color, channels in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Per-channel linear interpolation.
    pub fn lerp(&self, other: &Rgba, t: f64) -> Rgba {
        let t = t.clamp(0.0, 1.0) as f32;
        let mix = |x: f32, y: f32| x * (1.0 - t) + y * t;
        Rgba {
            r: mix(self.r, other.r),
            g: mix(self.g, other.g),
            b: mix(self.b, other.b),
            a: mix(self.a, other.a),
        }
    }
}

/// Closed interval in seconds. `min <= max` always holds for mapper output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalRange {
    pub min: f64,
    pub max: f64,
}

impl IntervalRange {
    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }
}

/// Full derived parameter bundle for one arousal value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    /// Arousal this set was computed from
    pub arousal: f64,
    /// Arousal rescaled over the tracking band
    pub tracking_normalized: f64,
    pub timer_frequency_hz: f64,
    pub target_speed_mean: f64,
    pub target_speed_sd: f64,
    pub target_count: u32,
    pub identification_duration_sec: f64,
    pub shift_interval: IntervalRange,
    pub identification_interval: IntervalRange,
    pub target_color: Rgba,
    pub distractor_color: Rgba,
    pub audio_frequency_hz: f64,
    pub audio_amplitude: f64,
    pub audio_squareness: f64,
    pub audio_pulse_rate_hz: f64,
    pub breathing: BreathingCycleSpec,
}

/// Rescale arousal over `[low, high]` to [0, 1], saturating outside the band.
pub fn tracking_normalized(arousal: f64, cfg: &MapperConfig) -> f64 {
    let low = cfg.tracking_low_threshold;
    let high = cfg.tracking_high_threshold;
    if !(high > low) {
        return 0.0;
    }
    (clamp_arousal(arousal).clamp(low, high) - low) / (high - low)
}

/// Quadratic ease-in so low-arousal adjustments feel subtler than high-arousal ones.
pub fn timer_frequency(arousal: f64, cfg: &MapperConfig) -> f64 {
    let a = clamp_arousal(arousal);
    cfg.min_frequency_hz + (cfg.max_frequency_hz - cfg.min_frequency_hz) * a * a
}

fn interval(curve: &IntervalCurve, t: f64) -> IntervalRange {
    let max = lerp(curve.max_at_low, curve.max_at_high, t);
    let min = lerp(curve.min_at_low, curve.min_at_high, t);
    // Curves may cross through configuration or rounding
    IntervalRange {
        min: min.min(max),
        max,
    }
}

fn target_count(t: f64, cfg: &MapperConfig) -> u32 {
    let lo = cfg.min_targets_high_arousal.min(cfg.max_targets_low_arousal);
    let hi = cfg.max_targets_low_arousal.max(cfg.min_targets_high_arousal);
    let raw = lerp(hi as f64, lo as f64, t).round();
    (raw.max(0.0) as u32).clamp(lo, hi)
}

/// Breathing durations follow the same tracking band, linear between the configured cycles.
pub fn breathing_cycle(t: f64, cfg: &MapperConfig) -> BreathingCycleSpec {
    let lo = &cfg.breathing_at_low;
    let hi = &cfg.breathing_at_high;
    let floor = |v: f64| v.max(MIN_BREATH_PHASE_SEC);
    BreathingCycleSpec {
        inhale: floor(lerp(lo.inhale, hi.inhale, t)),
        hold_after_inhale: floor(lerp(lo.hold_after_inhale, hi.hold_after_inhale, t)),
        exhale: floor(lerp(lo.exhale, hi.exhale, t)),
        hold_after_exhale: floor(lerp(lo.hold_after_exhale, hi.hold_after_exhale, t)),
    }
}

/// Compute the complete parameter set for `arousal`.
///
/// Deterministic: identical `(arousal, cfg)` yields an identical set.
pub fn compute_parameters(arousal: f64, cfg: &MapperConfig) -> ParameterSet {
    let a = clamp_arousal(arousal);
    let tn = tracking_normalized(a, cfg);
    let timer_frequency_hz = timer_frequency(a, cfg);

    ParameterSet {
        arousal: a,
        tracking_normalized: tn,
        timer_frequency_hz,
        target_speed_mean: lerp(cfg.speed_at_low, cfg.speed_at_high, tn),
        target_speed_sd: lerp(cfg.speed_sd_at_low, cfg.speed_sd_at_high, tn).max(0.0),
        target_count: target_count(tn, cfg),
        identification_duration_sec: lerp(
            cfg.identification_duration_at_low,
            cfg.identification_duration_at_high,
            tn,
        )
        .max(cfg.min_identification_duration_sec),
        shift_interval: interval(&cfg.shift_interval, tn),
        identification_interval: interval(&cfg.identification_interval, tn),
        target_color: cfg.target_color_low.lerp(&cfg.target_color_high, tn),
        distractor_color: cfg.distractor_color_low.lerp(&cfg.distractor_color_high, tn),
        audio_frequency_hz: lerp(cfg.audio_min_frequency_hz, cfg.audio_max_frequency_hz, a),
        audio_amplitude: lerp(cfg.audio_min_amplitude, cfg.audio_max_amplitude, a),
        audio_squareness: lerp(cfg.audio_min_squareness, cfg.audio_max_squareness, a)
            .clamp(0.0, 1.0),
        audio_pulse_rate_hz: timer_frequency_hz,
        breathing: breathing_cycle(tn, cfg),
    }
}
