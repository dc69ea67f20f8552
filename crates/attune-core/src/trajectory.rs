//! Arousal trajectory controller.
//!
//! Owns the single arousal scalar. Every accepted write recomputes the whole `ParameterSet`
//! and publishes `ArousalChanged` followed by `ParametersUpdated`.
//!
//! Writers:
//! - discrete steps through a wrapping ladder
//! - self-report mapping at session start
//! - session-long decay along a `SessionProfile`
//! - warmup ramp smoothing (takes priority over decay while active)

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::fmt;
use std::str::FromStr;

use crate::config::{MapperConfig, TrajectoryConfig};
use crate::error::AttuneError;
use crate::events::{CoreEvent, EventBus};
use crate::mapper::{clamp_arousal, compute_parameters, ParameterSet};

/// Shape of the session-long arousal trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionProfile {
    /// Exponential decay to about a third of the start level at mid-session
    #[default]
    Standard,
    /// Decay with a sinusoidal ripple
    Fluctuating,
    /// Decay with a raised-cosine bump late in the session
    Challenge,
    /// Decay held constant within equal segments
    Variable,
}

impl SessionProfile {
    pub const ALL: [SessionProfile; 4] = [
        SessionProfile::Standard,
        SessionProfile::Fluctuating,
        SessionProfile::Challenge,
        SessionProfile::Variable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionProfile::Standard => "standard",
            SessionProfile::Fluctuating => "fluctuating",
            SessionProfile::Challenge => "challenge",
            SessionProfile::Variable => "variable",
        }
    }
}

impl fmt::Display for SessionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(SessionProfile::Standard),
            "fluctuating" => Ok(SessionProfile::Fluctuating),
            "challenge" => Ok(SessionProfile::Challenge),
            "variable" => Ok(SessionProfile::Variable),
            other => Err(format!("unknown session profile '{}'", other)),
        }
    }
}

/// Session progress in [0, 1]. Non-positive totals count as finished.
pub fn session_progress(elapsed_sec: f64, total_sec: f64) -> f64 {
    if !(total_sec > 0.0) || !total_sec.is_finite() {
        return 1.0;
    }
    if !elapsed_sec.is_finite() {
        return 0.0;
    }
    (elapsed_sec / total_sec).clamp(0.0, 1.0)
}

fn decay(progress: f64, initial: f64, k: f64) -> f64 {
    initial * (-k * progress).exp()
}

/// Target arousal for a session progress, before any hand-off rescale.
pub fn session_arousal(
    profile: SessionProfile,
    progress: f64,
    initial: f64,
    cfg: &TrajectoryConfig,
) -> f64 {
    let p = progress.clamp(0.0, 1.0);
    let initial = clamp_arousal(initial);
    let k = cfg.decay_constant;
    let value = match profile {
        SessionProfile::Standard => decay(p, initial, k),
        SessionProfile::Fluctuating => {
            let ripple = 1.0 + cfg.fluctuation_amplitude * (TAU * cfg.fluctuation_cycles * p).sin();
            decay(p, initial, k) * ripple
        }
        SessionProfile::Challenge => {
            let offset = (p - cfg.challenge_peak_progress).abs();
            let bump = if cfg.challenge_half_width > 0.0 && offset < cfg.challenge_half_width {
                0.5 * (1.0 + (std::f64::consts::PI * offset / cfg.challenge_half_width).cos())
            } else {
                0.0
            };
            decay(p, initial, k) + initial * cfg.challenge_peak_gain * bump
        }
        SessionProfile::Variable => {
            let segments = cfg.variable_segments.max(1) as f64;
            let segment = (p * segments).floor().min(segments - 1.0);
            decay(segment / segments, initial, k)
        }
    };
    clamp_arousal(value)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct WarmupRamp {
    target: f64,
    increment: f64,
    rounds: u32,
    completed: u32,
    round_target: f64,
}

#[derive(Debug)]
pub struct ArousalController {
    arousal: f64,
    params: ParameterSet,
    mapper: MapperConfig,
    cfg: TrajectoryConfig,
    profile: SessionProfile,
    warmup: Option<WarmupRamp>,
    /// Set when a ramp finishes; the next progress update rescales the curve
    handoff_pending: bool,
    decay_scale: f64,
    bus: EventBus,
}

impl ArousalController {
    pub fn new(initial: f64, mapper: MapperConfig, cfg: TrajectoryConfig, bus: EventBus) -> Self {
        let arousal = clamp_arousal(initial);
        let params = compute_parameters(arousal, &mapper);
        let profile = cfg.profile;
        Self {
            arousal,
            params,
            mapper,
            cfg,
            profile,
            warmup: None,
            handoff_pending: false,
            decay_scale: 1.0,
            bus,
        }
    }

    pub fn arousal(&self) -> f64 {
        self.arousal
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    pub fn profile(&self) -> SessionProfile {
        self.profile
    }

    pub fn set_profile(&mut self, profile: SessionProfile) {
        if profile != self.profile {
            log::info!("Session profile {} -> {}", self.profile, profile);
            self.profile = profile;
        }
    }

    pub fn config(&self) -> &TrajectoryConfig {
        &self.cfg
    }

    pub fn warmup_active(&self) -> bool {
        self.warmup.is_some()
    }

    /// Arousal the current warmup round is smoothing toward.
    pub fn warmup_round_target(&self) -> Option<f64> {
        self.warmup.map(|r| r.round_target)
    }

    fn commit(&mut self, value: f64, epsilon: f64) -> bool {
        let new = clamp_arousal(value);
        let old = self.arousal;
        if (new - old).abs() <= epsilon {
            return false;
        }
        self.arousal = new;
        self.params = compute_parameters(new, &self.mapper);
        self.bus.publish(CoreEvent::ArousalChanged { old, new });
        self.bus.publish(CoreEvent::ParametersUpdated(self.params));
        true
    }

    /// Clamp and store. Returns whether the value changed.
    pub fn set_arousal(&mut self, value: f64) -> bool {
        let eps = self.cfg.change_epsilon;
        self.commit(value, eps)
    }

    /// Map a 0-100 self-report score linearly onto arousal.
    pub fn set_from_self_report(&mut self, score: f64) -> bool {
        self.set_arousal(score / 100.0)
    }

    /// Start a new session at `initial`. Clears any ramp and decay rescale and always
    /// publishes, so subscribers see the session's first parameter set.
    pub fn reset(&mut self, initial: f64) {
        self.warmup = None;
        self.handoff_pending = false;
        self.decay_scale = 1.0;
        let old = self.arousal;
        self.arousal = clamp_arousal(initial);
        self.params = compute_parameters(self.arousal, &self.mapper);
        self.bus.publish(CoreEvent::ArousalChanged {
            old,
            new: self.arousal,
        });
        self.bus.publish(CoreEvent::ParametersUpdated(self.params));
    }

    fn step_index(&self) -> Option<usize> {
        let tol = self.cfg.step_tolerance;
        self.cfg
            .step_ladder
            .iter()
            .position(|v| (v - self.arousal).abs() <= tol)
    }

    /// Next ladder value, wrapping from the top to the bottom. Returns the new arousal.
    pub fn step_up(&mut self) -> f64 {
        let ladder = &self.cfg.step_ladder;
        if ladder.is_empty() {
            return self.arousal;
        }
        let next = match self.step_index() {
            Some(i) => ladder[(i + 1) % ladder.len()],
            None => ladder
                .iter()
                .copied()
                .find(|v| *v > self.arousal)
                .unwrap_or(ladder[0]),
        };
        self.set_arousal(next);
        self.arousal
    }

    /// Previous ladder value, wrapping from the bottom to the top. Returns the new arousal.
    pub fn step_down(&mut self) -> f64 {
        let ladder = &self.cfg.step_ladder;
        if ladder.is_empty() {
            return self.arousal;
        }
        let len = ladder.len();
        let next = match self.step_index() {
            Some(i) => ladder[(i + len - 1) % len],
            None => ladder
                .iter()
                .rev()
                .copied()
                .find(|v| *v < self.arousal)
                .unwrap_or(ladder[len - 1]),
        };
        self.set_arousal(next);
        self.arousal
    }

    /// Move arousal along the session profile. Returns whether arousal changed.
    pub fn update_for_session_progress(
        &mut self,
        elapsed_sec: f64,
        total_sec: f64,
        initial: f64,
    ) -> bool {
        if self.warmup.is_some() {
            return false;
        }
        let p = session_progress(elapsed_sec, total_sec);
        let raw = session_arousal(self.profile, p, initial, &self.cfg);
        if self.handoff_pending {
            self.handoff_pending = false;
            self.decay_scale = if raw > 1e-9 { self.arousal / raw } else { 1.0 };
            log::info!(
                "Warmup hand-off at progress {:.3}: decay scaled by {:.3}",
                p,
                self.decay_scale
            );
        }
        let target = clamp_arousal(raw * self.decay_scale);
        if (target - self.arousal).abs() <= self.cfg.progress_update_threshold {
            return false;
        }
        self.commit(target, 0.0)
    }

    /// Begin a ramp from `target * start_multiplier` up to `target` over `rounds` rounds.
    pub fn start_warmup_ramp(&mut self, target: f64, rounds: u32) -> Result<(), AttuneError> {
        if rounds == 0 {
            log::warn!("Rejecting warmup ramp with zero rounds");
            return Err(AttuneError::InvalidWarmupRounds);
        }
        let target = clamp_arousal(target);
        let start = clamp_arousal(target * self.cfg.warmup_start_multiplier);
        let increment = (target - start) / rounds as f64;
        self.warmup = Some(WarmupRamp {
            target,
            increment,
            rounds,
            completed: 0,
            round_target: start + increment,
        });
        self.handoff_pending = false;
        self.commit(start, 0.0);
        log::info!(
            "Warmup ramp started: {:.3} -> {:.3} over {} rounds",
            start,
            target,
            rounds
        );
        Ok(())
    }

    /// Mark a round complete. Returns whether the ramp is still active.
    pub fn advance_warmup_ramp_round(&mut self) -> bool {
        let Some(ramp) = self.warmup.as_mut() else {
            return false;
        };
        ramp.completed += 1;
        if ramp.completed >= ramp.rounds {
            log::info!(
                "Warmup ramp complete at arousal {:.3} (target {:.3})",
                self.arousal,
                ramp.target
            );
            self.warmup = None;
            self.handoff_pending = true;
            return false;
        }
        ramp.round_target = (ramp.round_target + ramp.increment).min(ramp.target);
        true
    }

    /// Exponential approach toward the round target, independent of frame rate.
    pub fn update_warmup_ramp_smoothing(&mut self, dt_sec: f64) -> bool {
        let Some(ramp) = self.warmup else {
            return false;
        };
        if !dt_sec.is_finite() || dt_sec <= 0.0 {
            return false;
        }
        let gap = ramp.round_target - self.arousal;
        if gap.abs() <= self.cfg.snap_tolerance {
            return self.commit(ramp.round_target, 0.0);
        }
        let s = self.cfg.warmup_smoothing_factor.clamp(0.0, 1.0);
        let change = gap * (1.0 - (1.0 - s).powf(dt_sec));
        self.commit(self.arousal + change, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Receiver;

    fn controller(initial: f64) -> (ArousalController, Receiver<CoreEvent>) {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let c = ArousalController::new(
            initial,
            MapperConfig::default(),
            TrajectoryConfig::default(),
            bus,
        );
        (c, rx)
    }

    #[test]
    fn test_set_arousal_publishes_in_order() {
        let (mut c, rx) = controller(0.2);
        assert!(c.set_arousal(0.7));
        let events: Vec<CoreEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], CoreEvent::ArousalChanged { old, new } if old == 0.2 && new == 0.7));
        match &events[1] {
            CoreEvent::ParametersUpdated(p) => assert_eq!(p.arousal, 0.7),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_set_arousal_clamps_and_ignores_noise() {
        let (mut c, rx) = controller(0.5);
        assert!(c.set_arousal(3.0));
        assert_eq!(c.arousal(), 1.0);
        assert!(!c.set_arousal(1.0 + 1e-9));
        assert!(c.set_arousal(f64::NAN));
        assert_eq!(c.arousal(), 0.0);
        // Two accepted writes, two events each
        assert_eq!(rx.try_iter().count(), 4);
    }

    #[test]
    fn test_ladder_wraps() {
        let bus = EventBus::new();
        let cfg = TrajectoryConfig {
            step_ladder: vec![0.0, 0.5, 1.0],
            ..TrajectoryConfig::default()
        };
        let mut c = ArousalController::new(0.5, MapperConfig::default(), cfg, bus);
        assert_eq!(c.step_up(), 1.0);
        assert_eq!(c.step_up(), 0.0);
        assert_eq!(c.step_down(), 1.0);
        assert_eq!(c.step_down(), 0.5);
    }

    #[test]
    fn test_step_between_ladder_values() {
        let bus = EventBus::new();
        let cfg = TrajectoryConfig {
            step_ladder: vec![0.0, 0.5, 1.0],
            ..TrajectoryConfig::default()
        };
        let mut c = ArousalController::new(0.3, MapperConfig::default(), cfg.clone(), bus.clone());
        assert_eq!(c.step_up(), 0.5);
        let mut c = ArousalController::new(0.3, MapperConfig::default(), cfg, bus);
        assert_eq!(c.step_down(), 0.0);
    }

    #[test]
    fn test_default_ladder_step() {
        let (mut c, _rx) = controller(0.5);
        assert!((c.step_up() - 0.525).abs() < 1e-9);
        assert!((c.step_down() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_standard_decay_shape() {
        let cfg = TrajectoryConfig::default();
        let at = |p| session_arousal(SessionProfile::Standard, p, 0.9, &cfg);
        assert!((at(0.0) - 0.9).abs() < 1e-12);
        assert!((at(0.5) - 0.3).abs() < 1e-9);
        assert!(at(1.0) < 0.9 * 0.12);
        let mut last = at(0.0);
        for i in 1..=100 {
            let v = at(i as f64 / 100.0);
            assert!(v <= last + 1e-12);
            last = v;
        }
    }

    #[test]
    fn test_profiles_stay_in_range() {
        let cfg = TrajectoryConfig::default();
        for profile in SessionProfile::ALL {
            for i in 0..=200 {
                let v = session_arousal(profile, i as f64 / 200.0, 1.0, &cfg);
                assert!((0.0..=1.0).contains(&v), "{} at {}: {}", profile, i, v);
            }
        }
    }

    #[test]
    fn test_challenge_bump_and_variable_steps() {
        let cfg = TrajectoryConfig::default();
        let std = session_arousal(SessionProfile::Standard, 0.75, 0.6, &cfg);
        let ch = session_arousal(SessionProfile::Challenge, 0.75, 0.6, &cfg);
        assert!((ch - std - 0.6 * 0.3).abs() < 1e-9);

        let a = session_arousal(SessionProfile::Variable, 0.21, 0.6, &cfg);
        let b = session_arousal(SessionProfile::Variable, 0.39, 0.6, &cfg);
        assert_eq!(a, b);
        let c = session_arousal(SessionProfile::Standard, 0.2, 0.6, &cfg);
        assert!((a - c).abs() < 1e-12);
    }

    #[test]
    fn test_progress_update_threshold() {
        let (mut c, _rx) = controller(0.8);
        assert!(!c.update_for_session_progress(0.0, 600.0, 0.8));
        assert!(c.update_for_session_progress(300.0, 600.0, 0.8));
        assert!((c.arousal() - 0.8 / 3.0).abs() < 1e-9);
        // Zero total counts as finished
        assert!(c.update_for_session_progress(0.0, 0.0, 0.8));
        assert!((c.arousal() - 0.8 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_warmup_rejects_zero_rounds() {
        let (mut c, rx) = controller(0.4);
        assert!(matches!(
            c.start_warmup_ramp(0.8, 0),
            Err(AttuneError::InvalidWarmupRounds)
        ));
        assert_eq!(c.arousal(), 0.4);
        assert!(!c.warmup_active());
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_warmup_ramp_converges() {
        let (mut c, _rx) = controller(0.1);
        c.start_warmup_ramp(0.8, 3).unwrap();
        assert!((c.arousal() - 0.4).abs() < 1e-12);
        assert!(c.warmup_active());
        // Decay is suspended during the ramp
        assert!(!c.update_for_session_progress(300.0, 600.0, 0.8));

        for round in 0..3 {
            for _ in 0..600 {
                c.update_warmup_ramp_smoothing(1.0 / 60.0);
            }
            let target = c.warmup_round_target().unwrap();
            assert!((c.arousal() - target).abs() < 1e-6, "round {}", round);
            c.advance_warmup_ramp_round();
        }
        assert!(!c.warmup_active());
        assert!((c.arousal() - 0.8).abs() < 1e-3);
    }

    #[test]
    fn test_smoothing_is_frame_rate_independent() {
        let (mut slow, _a) = controller(0.0);
        let (mut fast, _b) = controller(0.0);
        slow.start_warmup_ramp(1.0, 1).unwrap();
        fast.start_warmup_ramp(1.0, 1).unwrap();
        for _ in 0..30 {
            slow.update_warmup_ramp_smoothing(1.0 / 30.0);
        }
        for _ in 0..120 {
            fast.update_warmup_ramp_smoothing(1.0 / 120.0);
        }
        assert!((slow.arousal() - fast.arousal()).abs() < 1e-9);
    }

    #[test]
    fn test_handoff_is_continuous() {
        let (mut c, _rx) = controller(0.2);
        c.start_warmup_ramp(0.6, 1).unwrap();
        for _ in 0..1200 {
            c.update_warmup_ramp_smoothing(1.0 / 60.0);
        }
        c.advance_warmup_ramp_round();
        let before = c.arousal();

        // Hand-off halfway through: raw curve would give 0.2, the rescaled one stays put
        c.update_for_session_progress(300.0, 600.0, 0.6);
        assert!((c.arousal() - before).abs() < 1e-2);
        c.update_for_session_progress(600.0, 600.0, 0.6);
        assert!((c.arousal() - before / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_self_report_mapping() {
        let (mut c, _rx) = controller(0.0);
        c.set_from_self_report(75.0);
        assert!((c.arousal() - 0.75).abs() < 1e-12);
        c.set_from_self_report(150.0);
        assert_eq!(c.arousal(), 1.0);
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!("Challenge".parse::<SessionProfile>(), Ok(SessionProfile::Challenge));
        assert!("bogus".parse::<SessionProfile>().is_err());
        for p in SessionProfile::ALL {
            assert_eq!(p.as_str().parse::<SessionProfile>(), Ok(p));
        }
    }
}
