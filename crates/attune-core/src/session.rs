//! Session/phase state machine.
//!
//! `SessionEngine` composes the clock, pulse scheduler, arousal controller, dispatcher,
//! breathing cycle and object field, and drives them from the host's frame callback.
//!
//! # Phases
//! - `Tracking`: objects move, pulses fire, prompt and shift timers run
//! - `Identifying`: objects frozen with identities hidden, taps are classified
//! - `Breathing`: scheduler stopped, breathing cycle and haptic pattern run
//! - `Paused`: nothing runs; resume returns to the previous phase with fresh timers
//!
//! Every phase change bumps the phase epoch, which invalidates queued pulse triggers.
//! Calls whose preconditions are not met are silent no-ops returning `false` / `None`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::breathing::BreathingCycle;
use crate::clock::{dt_sec, Clock};
use crate::config::{AttuneConfig, ConfigError};
use crate::dispatcher::{Backends, PulseDispatcher};
use crate::error::AttuneError;
use crate::events::{CoreEvent, EventBus};
use crate::mapper::{IntervalRange, ParameterSet};
use crate::objects::{ObjectField, ObjectId, TrackedObject};
use crate::scheduler::{PulseScheduler, PulseTick};
use crate::trajectory::{session_progress, ArousalController, SessionProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Tracking,
    Identifying,
    Breathing,
    Paused,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Tracking => "tracking",
            SessionPhase::Identifying => "identifying",
            SessionPhase::Breathing => "breathing",
            SessionPhase::Paused => "paused",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one identification round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IdentificationOutcome {
    pub identification_id: u64,
    pub success: bool,
    pub timed_out: bool,
    pub found: u32,
    pub total: u32,
    pub elapsed_sec: f64,
}

/// Classification of a tap during identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TapOutcome {
    /// A target not tapped before; `remaining` targets still to find
    Correct { remaining: u32 },
    AlreadyFound,
    /// A distractor; ends the round as a failure
    Incorrect,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub elapsed_sec: f64,
    pub identifications: u32,
    pub successes: u32,
    pub timeouts: u32,
    pub target_shifts: u32,
    pub breathing_sec: f64,
    pub paused_sec: f64,
    pub pulses: u64,
    pub initial_arousal: f64,
    pub final_arousal: f64,
    pub profile: SessionProfile,
}

impl SessionSummary {
    pub fn success_rate(&self) -> f64 {
        if self.identifications == 0 {
            0.0
        } else {
            self.successes as f64 / self.identifications as f64
        }
    }
}

#[derive(Debug, Clone)]
struct Identification {
    id: u64,
    started_at: f64,
    deadline: f64,
    total: u32,
    found: Vec<ObjectId>,
}

#[derive(Debug, Clone, Copy, Default)]
struct SessionStats {
    identifications: u32,
    successes: u32,
    timeouts: u32,
    target_shifts: u32,
    breathing_sec: f64,
    paused_sec: f64,
}

/// Uniform draw from `[min, max)`; degenerate ranges return `min`.
fn draw_interval(rng: &mut StdRng, range: IntervalRange) -> f64 {
    let lo = range.min.max(0.0);
    let hi = range.max.max(0.0);
    if hi > lo {
        rng.gen_range(lo..hi)
    } else {
        lo
    }
}

pub struct SessionEngine {
    config: AttuneConfig,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    scheduler: PulseScheduler,
    controller: ArousalController,
    dispatcher: PulseDispatcher,
    breathing: BreathingCycle,
    objects: ObjectField,
    rng: StdRng,

    phase: SessionPhase,
    paused_from: Option<SessionPhase>,
    paused_at_us: Option<i64>,
    epoch: u64,
    active: bool,
    session_elapsed_sec: f64,
    initial_arousal: f64,

    identification_due: bool,
    next_identification_at: Option<f64>,
    next_shift_at: Option<f64>,
    identification: Option<Identification>,
    identification_seq: u64,

    breathing_done: bool,
    breathing_auto: bool,
    breathing_bout_sec: f64,

    stats: SessionStats,
    pulses_at_start: u64,
    tick_buf: Vec<PulseTick>,
}

impl SessionEngine {
    pub fn new(
        config: AttuneConfig,
        clock: Arc<dyn Clock>,
        backends: Backends,
        bus: EventBus,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let initial = config.trajectory.default_initial_arousal;
        let controller = ArousalController::new(
            initial,
            config.mapper.clone(),
            config.trajectory.clone(),
            bus.clone(),
        );
        let params = *controller.parameters();
        let scheduler = PulseScheduler::new(params.timer_frequency_hz, &config.scheduler);
        let mut dispatcher = PulseDispatcher::new(&config.dispatch, backends);
        dispatcher.apply_parameters(&params);
        let breathing = BreathingCycle::new(params.breathing, config.breathing_haptics.clone());

        let seed = config.session.seed;
        let objects = ObjectField::new(config.session.arena_width, config.session.arena_height, seed);
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            config,
            clock,
            bus,
            scheduler,
            controller,
            dispatcher,
            breathing,
            objects,
            rng,
            phase: SessionPhase::Tracking,
            paused_from: None,
            paused_at_us: None,
            epoch: 0,
            active: false,
            session_elapsed_sec: 0.0,
            initial_arousal: initial,
            identification_due: false,
            next_identification_at: None,
            next_shift_at: None,
            identification: None,
            identification_seq: 0,
            breathing_done: false,
            breathing_auto: false,
            breathing_bout_sec: 0.0,
            stats: SessionStats::default(),
            pulses_at_start: 0,
            tick_buf: Vec::with_capacity(8),
        })
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn parameters(&self) -> &ParameterSet {
        self.controller.parameters()
    }

    pub fn arousal(&self) -> f64 {
        self.controller.arousal()
    }

    pub fn objects(&self) -> &[TrackedObject] {
        self.objects.objects()
    }

    pub fn controller(&self) -> &ArousalController {
        &self.controller
    }

    pub fn dispatcher(&self) -> &PulseDispatcher {
        &self.dispatcher
    }

    /// Channel enable/offset changes go through here.
    pub fn dispatcher_mut(&mut self) -> &mut PulseDispatcher {
        &mut self.dispatcher
    }

    pub fn scheduler(&self) -> &PulseScheduler {
        &self.scheduler
    }

    pub fn breathing(&self) -> &BreathingCycle {
        &self.breathing
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &AttuneConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn session_elapsed_sec(&self) -> f64 {
        self.session_elapsed_sec
    }

    pub fn progress(&self) -> f64 {
        session_progress(self.session_elapsed_sec, self.config.session.duration_sec)
    }

    pub fn identification_id(&self) -> Option<u64> {
        self.identification.as_ref().map(|i| i.id)
    }

    pub fn identification_deadline(&self) -> Option<f64> {
        self.identification.as_ref().map(|i| i.deadline)
    }

    pub fn identification_due(&self) -> bool {
        self.identification_due
    }

    // ------------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------------

    /// Begin a session at `initial_arousal`. Restarts any session in progress.
    pub fn start_session(&mut self, initial_arousal: f64) {
        let now = self.clock.now_sec();
        if self.active {
            log::warn!("Starting a new session over an active one");
        }

        self.controller.reset(initial_arousal);
        self.initial_arousal = self.controller.arousal();
        let params = *self.controller.parameters();

        self.objects.spawn(
            self.config.session.total_objects,
            params.target_count,
            params.target_speed_mean,
            params.target_speed_sd,
        );
        self.breathing = BreathingCycle::new(params.breathing, self.config.breathing_haptics.clone());
        self.on_parameters_changed();

        self.identification = None;
        self.paused_from = None;
        self.paused_at_us = None;
        self.breathing_done = false;
        self.breathing_auto = false;
        self.breathing_bout_sec = 0.0;
        self.session_elapsed_sec = 0.0;
        self.stats = SessionStats::default();
        self.pulses_at_start = self.scheduler.ticks_emitted();

        self.dispatcher.cancel_pending();
        self.dispatcher.clear_flash();
        self.dispatcher.clear_haptic_pattern();

        let from = self.phase;
        self.phase = SessionPhase::Tracking;
        self.epoch = self.epoch.wrapping_add(1);
        self.scheduler.stop();
        self.scheduler.start();
        self.active = true;
        if from != SessionPhase::Tracking {
            self.bus.publish(CoreEvent::PhaseChanged {
                from,
                to: SessionPhase::Tracking,
                at_sec: 0.0,
            });
        }
        self.schedule_timers(now);

        log::info!(
            "Session started: arousal={:.3} profile={} objects={} targets={}",
            self.initial_arousal,
            self.controller.profile(),
            self.objects.len(),
            self.objects.target_count()
        );
    }

    /// Start from a 0-100 self-report score.
    pub fn start_session_from_self_report(&mut self, score: f64) {
        self.start_session(score / 100.0);
    }

    /// Stop everything and report. `None` if no session is running.
    pub fn end_session(&mut self) -> Option<SessionSummary> {
        if !self.active {
            return None;
        }
        if self.phase == SessionPhase::Breathing
            || self.paused_from == Some(SessionPhase::Breathing)
        {
            self.stats.breathing_sec += self.breathing_bout_sec;
            self.breathing_bout_sec = 0.0;
        }
        self.dispatcher.clear_haptic_pattern();
        self.dispatcher.cancel_pending();
        self.scheduler.stop();
        self.clear_timers();
        if self.identification.take().is_some() {
            self.objects.restore_all();
            self.objects.reveal_identities();
        }
        self.paused_from = None;
        self.close_pause();
        self.active = false;
        self.epoch = self.epoch.wrapping_add(1);

        let summary = self.summary();
        log::info!(
            "Session ended after {:.1}s: {}/{} identifications, {:.1}s breathing",
            summary.elapsed_sec,
            summary.successes,
            summary.identifications,
            summary.breathing_sec
        );
        Some(summary)
    }

    /// Snapshot of the running totals.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            elapsed_sec: self.session_elapsed_sec,
            identifications: self.stats.identifications,
            successes: self.stats.successes,
            timeouts: self.stats.timeouts,
            target_shifts: self.stats.target_shifts,
            breathing_sec: self.stats.breathing_sec + self.breathing_bout_sec,
            paused_sec: self.stats.paused_sec,
            pulses: self.scheduler.ticks_emitted() - self.pulses_at_start,
            initial_arousal: self.initial_arousal,
            final_arousal: self.controller.arousal(),
            profile: self.controller.profile(),
        }
    }

    // ------------------------------------------------------------------------
    // Arousal requests
    // ------------------------------------------------------------------------

    pub fn set_profile(&mut self, profile: SessionProfile) {
        self.controller.set_profile(profile);
    }

    pub fn set_arousal(&mut self, value: f64) -> bool {
        let changed = self.controller.set_arousal(value);
        if changed {
            self.on_parameters_changed();
        }
        changed
    }

    pub fn step_arousal_up(&mut self) -> f64 {
        self.controller.step_up();
        self.on_parameters_changed();
        self.controller.arousal()
    }

    pub fn step_arousal_down(&mut self) -> f64 {
        self.controller.step_down();
        self.on_parameters_changed();
        self.controller.arousal()
    }

    /// Ramp up to `target` over `rounds` identification rounds.
    pub fn start_warmup(&mut self, target: f64, rounds: u32) -> Result<(), AttuneError> {
        self.controller.start_warmup_ramp(target, rounds)?;
        self.on_parameters_changed();
        Ok(())
    }

    fn on_parameters_changed(&mut self) {
        let params = *self.controller.parameters();
        self.scheduler.set_frequency(params.timer_frequency_hz);
        self.dispatcher.apply_parameters(&params);
        self.breathing.update_spec(params.breathing);
        self.objects.scale_speed(params.target_speed_mean);
    }

    /// Apply the session trajectory and the automatic breathing window.
    /// Returns whether arousal changed.
    pub fn update_session_progress(&mut self) -> bool {
        if !self.active || self.phase == SessionPhase::Paused {
            return false;
        }
        let now = self.clock.now_sec();
        let session = &self.config.session;
        let duration = session.duration_sec;
        let (window_start, window_end) = (session.breathing_window_start, session.breathing_window_end);
        let auto_breathing = session.auto_breathing;

        if auto_breathing {
            let p = session_progress(self.session_elapsed_sec, duration);
            let in_window = p >= window_start && p < window_end;
            if in_window && !self.breathing_done && self.phase == SessionPhase::Tracking {
                self.breathing_done = true;
                self.breathing_auto = true;
                self.begin_breathing(now);
            } else if !in_window && self.breathing_auto && self.phase == SessionPhase::Breathing {
                self.finish_breathing(now);
            }
        }

        let changed = self.controller.update_for_session_progress(
            self.session_elapsed_sec,
            duration,
            self.initial_arousal,
        );
        if changed {
            self.on_parameters_changed();
        }
        changed
    }

    // ------------------------------------------------------------------------
    // Frame loop
    // ------------------------------------------------------------------------

    /// Host frame callback. The timestamp comes from the injected clock.
    pub fn frame(&mut self, elapsed_sec: f64) {
        if !self.active || self.phase == SessionPhase::Paused {
            return;
        }
        let now = self.clock.now_sec();
        let dt = if elapsed_sec.is_finite() && elapsed_sec > 0.0 {
            elapsed_sec
        } else {
            0.0
        };
        self.session_elapsed_sec += dt;

        if self.controller.update_warmup_ramp_smoothing(dt) {
            self.on_parameters_changed();
        }
        self.update_session_progress();

        match self.phase {
            SessionPhase::Tracking => self.frame_tracking(now, dt),
            SessionPhase::Identifying => {
                let expired = self
                    .identification
                    .as_ref()
                    .filter(|i| now >= i.deadline)
                    .map(|i| i.id);
                if let Some(id) = expired {
                    self.check_identification_timeout(id);
                }
            }
            SessionPhase::Breathing => self.frame_breathing(now, dt),
            SessionPhase::Paused => {}
        }
    }

    fn frame_tracking(&mut self, now: f64, dt: f64) {
        self.objects.step(dt);

        if matches!(self.next_identification_at, Some(at) if now >= at) {
            self.next_identification_at = None;
            self.identification_due = true;
            log::debug!("Identification prompt due at {:.3}", now);
        }
        if matches!(self.next_shift_at, Some(at) if now >= at) {
            self.shift_targets(now);
            let shift = self.controller.parameters().shift_interval;
            self.next_shift_at = Some(now + draw_interval(&mut self.rng, shift));
        }

        if self.try_begin_identification(now) {
            return;
        }

        let mut ticks = std::mem::take(&mut self.tick_buf);
        ticks.clear();
        self.scheduler.on_frame(now, dt, |t| ticks.push(t));
        let frequency = self.scheduler.frequency_hz();
        for tick in &ticks {
            self.dispatcher.on_tick(tick, frequency, self.epoch);
            self.bus.publish(CoreEvent::PulseTick(*tick));
        }
        self.tick_buf = ticks;

        self.dispatcher.poll(now, self.epoch);
    }

    fn frame_breathing(&mut self, now: f64, dt: f64) {
        self.breathing_bout_sec += dt;
        let tick = self.breathing.tick(dt);
        for phase in &tick.entered {
            log::trace!("Breathing phase {:?}", phase);
        }
        if let Some(pattern) = self.breathing.take_haptic_rebuild() {
            // Failure already logged by the dispatcher
            let _ = self.dispatcher.swap_haptic_pattern(pattern, now);
        }
    }

    fn set_phase(&mut self, to: SessionPhase, now: f64) {
        let from = self.phase;
        if from == to {
            return;
        }
        self.phase = to;
        self.epoch = self.epoch.wrapping_add(1);
        self.dispatcher.cancel_pending();
        if to == SessionPhase::Tracking {
            self.scheduler.start();
        } else {
            self.scheduler.stop();
        }
        log::info!("Phase {} -> {} at {:.2}s", from, to, self.session_elapsed_sec);
        self.bus.publish(CoreEvent::PhaseChanged {
            from,
            to,
            at_sec: self.session_elapsed_sec,
        });
        log::trace!("phase epoch {} at clock {:.3}", self.epoch, now);
    }

    fn schedule_timers(&mut self, now: f64) {
        let params = *self.controller.parameters();
        self.next_identification_at =
            Some(now + draw_interval(&mut self.rng, params.identification_interval));
        self.next_shift_at = Some(now + draw_interval(&mut self.rng, params.shift_interval));
    }

    fn clear_timers(&mut self) {
        self.next_identification_at = None;
        self.next_shift_at = None;
        self.identification_due = false;
    }

    fn shift_targets(&mut self, now: f64) {
        if self.dispatcher.flash_running(now) {
            log::debug!("Skipping target shift while a flash runs");
            return;
        }
        if let Some((promoted, demoted)) = self.objects.swap_random_target() {
            self.stats.target_shifts += 1;
            self.dispatcher.start_flash(vec![promoted, demoted], now);
            self.bus.publish(CoreEvent::TargetsShifted { promoted, demoted });
            log::debug!("Target shift: {} promoted, {} demoted", promoted, demoted);
        }
    }

    // ------------------------------------------------------------------------
    // Identification
    // ------------------------------------------------------------------------

    /// Raise the identification-due flag, as the prompt timer does.
    pub fn request_identification(&mut self) -> bool {
        if !self.active || self.phase != SessionPhase::Tracking {
            return false;
        }
        self.identification_due = true;
        true
    }

    fn try_begin_identification(&mut self, now: f64) -> bool {
        if !self.identification_due
            || self.dispatcher.flash_blocking(now)
            || self.objects.is_empty()
            || self.objects.target_count() == 0
        {
            return false;
        }
        self.identification_due = false;
        self.identification_seq += 1;
        let duration = self.controller.parameters().identification_duration_sec;
        let total = self.objects.target_count() as u32;

        self.clear_timers();
        self.objects.freeze_all();
        self.objects.hide_identities();
        self.identification = Some(Identification {
            id: self.identification_seq,
            started_at: now,
            deadline: now + duration,
            total,
            found: Vec::with_capacity(total as usize),
        });
        self.set_phase(SessionPhase::Identifying, now);
        log::debug!(
            "Identification #{} started: {} targets, {:.2}s",
            self.identification_seq,
            total,
            duration
        );
        true
    }

    /// Classify a tap against the live target set.
    pub fn tap(&mut self, object: ObjectId) -> Option<TapOutcome> {
        if self.phase != SessionPhase::Identifying {
            return None;
        }
        let is_target = self.objects.get(object)?.is_target;
        let now = self.clock.now_sec();
        let ident = self.identification.as_mut()?;

        if !is_target {
            self.finish_identification(false, false, now);
            return Some(TapOutcome::Incorrect);
        }
        if ident.found.contains(&object) {
            return Some(TapOutcome::AlreadyFound);
        }
        ident.found.push(object);
        let remaining = ident.total.saturating_sub(ident.found.len() as u32);
        if remaining == 0 {
            self.finish_identification(true, false, now);
        }
        Some(TapOutcome::Correct { remaining })
    }

    /// Deferred timeout callback. Acts only if `identification_id` is still the running
    /// round and its deadline has passed.
    pub fn check_identification_timeout(
        &mut self,
        identification_id: u64,
    ) -> Option<IdentificationOutcome> {
        let now = self.clock.now_sec();
        match &self.identification {
            Some(i) if i.id == identification_id && now >= i.deadline => {}
            _ => return None,
        }
        if self.phase != SessionPhase::Identifying {
            return None;
        }
        self.finish_identification(false, true, now)
    }

    fn finish_identification(
        &mut self,
        success: bool,
        timed_out: bool,
        now: f64,
    ) -> Option<IdentificationOutcome> {
        let ident = self.identification.take()?;
        let outcome = IdentificationOutcome {
            identification_id: ident.id,
            success,
            timed_out,
            found: ident.found.len() as u32,
            total: ident.total,
            elapsed_sec: (now - ident.started_at).max(0.0),
        };
        self.stats.identifications += 1;
        if success {
            self.stats.successes += 1;
        }
        if timed_out {
            self.stats.timeouts += 1;
        }
        log::info!(
            "Identification #{} {}: {}/{} in {:.2}s",
            outcome.identification_id,
            if success { "succeeded" } else { "failed" },
            outcome.found,
            outcome.total,
            outcome.elapsed_sec
        );
        self.bus.publish(CoreEvent::IdentificationOutcome(outcome));

        let params = *self.controller.parameters();
        self.objects.restore_all();
        self.objects.reveal_identities();
        self.objects.rebalance_targets(params.target_count);
        self.dispatcher.start_flash(self.objects.target_ids(), now);

        self.set_phase(SessionPhase::Tracking, now);
        self.schedule_timers(now);

        if self.controller.warmup_active() {
            self.controller.advance_warmup_ramp_round();
        }
        Some(outcome)
    }

    // ------------------------------------------------------------------------
    // Breathing
    // ------------------------------------------------------------------------

    pub fn enter_breathing(&mut self) -> bool {
        if !self.active || self.phase != SessionPhase::Tracking {
            return false;
        }
        let now = self.clock.now_sec();
        self.breathing_auto = false;
        self.begin_breathing(now);
        true
    }

    pub fn exit_breathing(&mut self) -> bool {
        if !self.active || self.phase != SessionPhase::Breathing {
            return false;
        }
        let now = self.clock.now_sec();
        self.finish_breathing(now);
        true
    }

    fn swap_in_breathing_pattern(&mut self, now: f64) {
        let pattern = self
            .breathing
            .take_haptic_rebuild()
            .unwrap_or_else(|| self.breathing.pattern());
        let _ = self.dispatcher.swap_haptic_pattern(pattern, now);
    }

    fn begin_breathing(&mut self, now: f64) {
        self.clear_timers();
        self.dispatcher.clear_flash();
        self.set_phase(SessionPhase::Breathing, now);
        self.breathing
            .update_spec(self.controller.parameters().breathing);
        self.breathing.restart();
        self.swap_in_breathing_pattern(now);
        self.breathing_bout_sec = 0.0;
        self.bus.publish(CoreEvent::BreathingEntered {
            at_sec: self.session_elapsed_sec,
        });
    }

    fn finish_breathing(&mut self, now: f64) {
        let duration_sec = self.breathing_bout_sec;
        self.stats.breathing_sec += duration_sec;
        self.breathing_bout_sec = 0.0;
        self.breathing_auto = false;
        self.dispatcher.clear_haptic_pattern();
        self.set_phase(SessionPhase::Tracking, now);
        self.schedule_timers(now);
        self.bus.publish(CoreEvent::BreathingExited { duration_sec });
    }

    // ------------------------------------------------------------------------
    // Pause / resume
    // ------------------------------------------------------------------------

    pub fn pause(&mut self) -> bool {
        if !self.active || self.phase == SessionPhase::Paused {
            return false;
        }
        let now = self.clock.now_sec();
        let from = self.phase;
        self.paused_from = Some(from);
        self.paused_at_us = Some(self.clock.now_us());
        self.clear_timers();
        if from == SessionPhase::Breathing {
            self.dispatcher.clear_haptic_pattern();
        }
        self.set_phase(SessionPhase::Paused, now);
        true
    }

    pub fn resume(&mut self) -> bool {
        if !self.active || self.phase != SessionPhase::Paused {
            return false;
        }
        let now = self.clock.now_sec();
        self.close_pause();
        let previous = self.paused_from.take().unwrap_or(SessionPhase::Tracking);
        match previous {
            SessionPhase::Identifying if self.identification.is_some() => {
                let duration = self.controller.parameters().identification_duration_sec;
                if let Some(ident) = self.identification.as_mut() {
                    ident.started_at = now;
                    ident.deadline = now + duration;
                }
                self.set_phase(SessionPhase::Identifying, now);
            }
            SessionPhase::Breathing => {
                self.set_phase(SessionPhase::Breathing, now);
                self.breathing.restart();
                self.swap_in_breathing_pattern(now);
            }
            _ => {
                self.set_phase(SessionPhase::Tracking, now);
                self.schedule_timers(now);
            }
        }
        true
    }

    fn close_pause(&mut self) {
        if let Some(at) = self.paused_at_us.take() {
            let paused = dt_sec(self.clock.now_us(), at);
            self.stats.paused_sec += paused;
            log::info!("Pause lasted {:.1}s", paused);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn engine() -> (SessionEngine, ManualClock) {
        let clock = ManualClock::new();
        let mut config = AttuneConfig::default();
        config.session.seed = Some(11);
        config.session.auto_breathing = false;
        let engine = SessionEngine::new(
            config,
            clock.shared(),
            Backends::recording(),
            EventBus::new(),
        )
        .unwrap();
        (engine, clock)
    }

    fn step(engine: &mut SessionEngine, clock: &ManualClock, seconds: f64) {
        let dt = 1.0 / 60.0;
        let frames = (seconds / dt).round() as usize;
        for _ in 0..frames {
            clock.advance(Duration::from_secs_f64(dt));
            engine.frame(dt);
        }
    }

    #[test]
    fn test_inactive_engine_ignores_calls() {
        let (mut e, clock) = engine();
        e.frame(0.016);
        assert!(!e.pause());
        assert!(!e.enter_breathing());
        assert!(!e.request_identification());
        assert!(e.tap(0).is_none());
        assert!(e.end_session().is_none());
        step(&mut e, &clock, 1.0);
        assert_eq!(e.scheduler().ticks_emitted(), 0);
    }

    #[test]
    fn test_start_session_spawns_objects() {
        let (mut e, _clock) = engine();
        e.start_session(0.5);
        assert!(e.is_active());
        assert_eq!(e.phase(), SessionPhase::Tracking);
        assert_eq!(e.objects().len(), 10);
        let targets = e.objects().iter().filter(|o| o.is_target).count() as u32;
        assert_eq!(targets, e.parameters().target_count);
    }

    #[test]
    fn test_identification_waits_for_flash_cooldown() {
        let (mut e, clock) = engine();
        e.start_session(0.5);
        let now = clock.now_sec();
        e.dispatcher_mut().start_flash(vec![0], now);
        assert!(e.request_identification());
        step(&mut e, &clock, 0.5);
        assert_eq!(e.phase(), SessionPhase::Tracking);
        step(&mut e, &clock, 1.0);
        assert_eq!(e.phase(), SessionPhase::Identifying);
    }

    #[test]
    fn test_tap_outside_identification_is_noop() {
        let (mut e, _clock) = engine();
        e.start_session(0.5);
        assert_eq!(e.tap(0), None);
    }

    #[test]
    fn test_stale_timeout_is_ignored() {
        let (mut e, clock) = engine();
        e.start_session(0.5);
        e.request_identification();
        step(&mut e, &clock, 0.1);
        let first = e.identification_id().unwrap();

        let distractor = e.objects().iter().find(|o| !o.is_target).unwrap().id;
        assert_eq!(e.tap(distractor), Some(TapOutcome::Incorrect));
        assert_eq!(e.phase(), SessionPhase::Tracking);

        clock.advance_sec(30.0);
        assert!(e.check_identification_timeout(first).is_none());
        assert_eq!(e.summary().identifications, 1);
    }

    #[test]
    fn test_pause_resume_restores_phase() {
        let (mut e, clock) = engine();
        e.start_session(0.5);
        e.request_identification();
        step(&mut e, &clock, 0.1);
        assert_eq!(e.phase(), SessionPhase::Identifying);

        assert!(e.pause());
        assert!(!e.pause());
        clock.advance_sec(60.0);
        e.frame(60.0);
        assert_eq!(e.phase(), SessionPhase::Paused);

        assert!(e.resume());
        assert_eq!(e.phase(), SessionPhase::Identifying);
        assert!((e.summary().paused_sec - 60.0).abs() < 1e-6);
        let deadline = e.identification_deadline().unwrap();
        let full = e.parameters().identification_duration_sec;
        assert!((deadline - clock.now_sec() - full).abs() < 1e-9);
    }

    #[test]
    fn test_epoch_bumps_on_phase_change() {
        let (mut e, _clock) = engine();
        e.start_session(0.5);
        let before = e.epoch();
        assert!(e.enter_breathing());
        assert!(e.epoch() > before);
        assert!(!e.enter_breathing());
        assert!(e.exit_breathing());
        assert!(!e.exit_breathing());
    }
}
