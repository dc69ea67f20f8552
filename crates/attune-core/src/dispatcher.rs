//! Multi-modal pulse dispatcher.
//!
//! Fans each scheduler tick out to the visual, haptic and audio channels. Every channel has
//! its own latency offset, so a trigger becomes due at `tick.intended + offset`. Triggers are
//! queued and fired from `poll()`; each carries the phase epoch it was created in and is
//! dropped if the session has moved on by the time it is due.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::breathing::HapticPattern;
use crate::config::{ChannelConfig, DispatchConfig};
use crate::error::OutputError;
use crate::mapper::ParameterSet;
use crate::objects::ObjectId;
use crate::scheduler::PulseTick;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Visual,
    Haptic,
    Audio,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Visual, Channel::Haptic, Channel::Audio];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Visual => "visual",
            Channel::Haptic => "haptic",
            Channel::Audio => "audio",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel-specific payload of a trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerKind {
    /// Toggle the target highlight on for `on_duration_sec`. Objects in `suppressed` are
    /// flashing or cooling down after a flash and must not be highlighted.
    Visual {
        on_duration_sec: f64,
        suppressed: Vec<ObjectId>,
    },
    /// Replay a short transient pattern
    Haptic { pattern: Arc<HapticPattern> },
    /// Retrigger the running oscillator's envelope
    Audio,
}

/// A deferred per-channel output.
#[derive(Debug, Clone, PartialEq)]
pub struct PulseTrigger {
    pub channel: Channel,
    pub seq: u64,
    pub intended_sec: f64,
    pub due_sec: f64,
    pub epoch: u64,
    pub kind: TriggerKind,
}

// ============================================================================
// OUTPUT BACKENDS
// ============================================================================

/// Platform output for one channel (renderer hook, haptic engine, audio engine).
///
/// Backends may become unavailable at any time (audio session interrupted, haptic engine
/// reset by the OS). The dispatcher checks `is_ready()` before every fire and calls
/// `restart()` with backoff; errors are logged and never fatal.
pub trait OutputBackend: Send + Debug {
    fn channel(&self) -> Channel;

    fn is_ready(&self) -> bool;

    fn restart(&mut self) -> Result<(), OutputError>;

    fn fire(&mut self, trigger: &PulseTrigger) -> Result<(), OutputError>;

    /// Called whenever the arousal parameters change.
    fn apply_parameters(&mut self, _params: &ParameterSet) {}
}

/// Haptic output that can also play a long pattern (the breathing cycle).
pub trait HapticBackend: OutputBackend {
    /// Replace the playing pattern and restart it from the top.
    fn swap_pattern(&mut self, pattern: Arc<HapticPattern>) -> Result<(), OutputError>;

    fn clear_pattern(&mut self);
}

#[derive(Debug, Default)]
struct RecordingState {
    fired: Vec<PulseTrigger>,
    pattern: Option<Arc<HapticPattern>>,
    swaps: u64,
    restarts: u64,
}

/// In-memory backend for headless runs and tests. Clones share state.
#[derive(Debug, Clone)]
pub struct RecordingBackend {
    channel: Channel,
    ready: Arc<AtomicBool>,
    restart_succeeds: Arc<AtomicBool>,
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingBackend {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            ready: Arc::new(AtomicBool::new(true)),
            restart_succeeds: Arc::new(AtomicBool::new(true)),
            state: Arc::new(Mutex::new(RecordingState::default())),
        }
    }

    /// Simulate the platform engine going away or coming back.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_restart_succeeds(&self, ok: bool) {
        self.restart_succeeds.store(ok, Ordering::SeqCst);
    }

    pub fn fired(&self) -> Vec<PulseTrigger> {
        self.state.lock().fired.clone()
    }

    pub fn fired_count(&self) -> usize {
        self.state.lock().fired.len()
    }

    pub fn restarts(&self) -> u64 {
        self.state.lock().restarts
    }

    pub fn swaps(&self) -> u64 {
        self.state.lock().swaps
    }

    pub fn current_pattern(&self) -> Option<Arc<HapticPattern>> {
        self.state.lock().pattern.clone()
    }

    pub fn clear(&self) {
        self.state.lock().fired.clear();
    }
}

impl OutputBackend for RecordingBackend {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn restart(&mut self) -> Result<(), OutputError> {
        self.state.lock().restarts += 1;
        if self.restart_succeeds.load(Ordering::SeqCst) {
            self.ready.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(OutputError::Stopped(self.channel))
        }
    }

    fn fire(&mut self, trigger: &PulseTrigger) -> Result<(), OutputError> {
        if !self.is_ready() {
            return Err(OutputError::NotReady(self.channel));
        }
        self.state.lock().fired.push(trigger.clone());
        Ok(())
    }
}

impl HapticBackend for RecordingBackend {
    fn swap_pattern(&mut self, pattern: Arc<HapticPattern>) -> Result<(), OutputError> {
        if !self.is_ready() {
            return Err(OutputError::NotReady(self.channel));
        }
        let mut state = self.state.lock();
        state.pattern = Some(pattern);
        state.swaps += 1;
        Ok(())
    }

    fn clear_pattern(&mut self) {
        self.state.lock().pattern = None;
    }
}

/// The three channel outputs handed to the dispatcher.
#[derive(Debug)]
pub struct Backends {
    pub visual: Box<dyn OutputBackend>,
    pub haptic: Box<dyn HapticBackend>,
    pub audio: Box<dyn OutputBackend>,
}

impl Backends {
    /// Recording backends on every channel.
    pub fn recording() -> Self {
        Self {
            visual: Box::new(RecordingBackend::new(Channel::Visual)),
            haptic: Box::new(RecordingBackend::new(Channel::Haptic)),
            audio: Box::new(RecordingBackend::new(Channel::Audio)),
        }
    }
}

// ============================================================================
// DISPATCHER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ChannelStats {
    pub fired: u64,
    pub skipped_not_ready: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DispatchStats {
    pub visual: ChannelStats,
    pub haptic: ChannelStats,
    pub audio: ChannelStats,
    /// Triggers dropped because their phase epoch went stale
    pub dropped_stale: u64,
    pub cancelled: u64,
}

impl DispatchStats {
    pub fn channel(&self, channel: Channel) -> &ChannelStats {
        match channel {
            Channel::Visual => &self.visual,
            Channel::Haptic => &self.haptic,
            Channel::Audio => &self.audio,
        }
    }

    fn channel_mut(&mut self, channel: Channel) -> &mut ChannelStats {
        match channel {
            Channel::Visual => &mut self.visual,
            Channel::Haptic => &mut self.haptic,
            Channel::Audio => &mut self.audio,
        }
    }
}

enum FireResult {
    Fired,
    NotReady,
    Failed,
}

#[derive(Debug)]
struct ChannelSlot<B: ?Sized> {
    enabled: bool,
    offset_sec: f64,
    last_restart_attempt: Option<f64>,
    backend: Box<B>,
}

impl<B: OutputBackend + ?Sized> ChannelSlot<B> {
    fn new(cfg: &ChannelConfig, backend: Box<B>) -> Self {
        Self {
            enabled: cfg.enabled,
            offset_sec: offset_ms_to_sec(cfg.offset_ms),
            last_restart_attempt: None,
            backend,
        }
    }

    /// Restart at most once per `backoff_sec`. Returns readiness afterwards.
    fn ensure_ready(&mut self, now_sec: f64, backoff_sec: f64) -> bool {
        if self.backend.is_ready() {
            return true;
        }
        let channel = self.backend.channel();
        let due = self
            .last_restart_attempt
            .map_or(true, |t| now_sec - t >= backoff_sec);
        if due {
            self.last_restart_attempt = Some(now_sec);
            match self.backend.restart() {
                Ok(()) => log::info!("{} output restarted", channel),
                Err(e) => log::warn!("{} output restart failed: {}", channel, e),
            }
        }
        self.backend.is_ready()
    }

    fn fire(&mut self, trigger: &PulseTrigger, now_sec: f64, backoff_sec: f64) -> FireResult {
        if !self.ensure_ready(now_sec, backoff_sec) {
            return FireResult::NotReady;
        }
        match self.backend.fire(trigger) {
            Ok(()) => FireResult::Fired,
            Err(e) => {
                log::warn!("{} trigger #{} failed: {}", trigger.channel, trigger.seq, e);
                FireResult::Failed
            }
        }
    }
}

fn offset_ms_to_sec(ms: f64) -> f64 {
    if ms.is_finite() {
        ms.max(0.0) / 1000.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Flash {
    objects: Vec<ObjectId>,
    ends_at: f64,
    cooldown_until: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct Pending {
    channel: Channel,
    seq: u64,
    intended_sec: f64,
    due_sec: f64,
    epoch: u64,
    on_duration_sec: f64,
}

#[derive(Debug)]
pub struct PulseDispatcher {
    visual: ChannelSlot<dyn OutputBackend>,
    haptic: ChannelSlot<dyn HapticBackend>,
    audio: ChannelSlot<dyn OutputBackend>,
    /// Sorted by due time; ties keep insertion order
    queue: Vec<Pending>,
    duty_cycle: f64,
    flash_duration_sec: f64,
    flash_cooldown_sec: f64,
    restart_backoff_sec: f64,
    transient: Arc<HapticPattern>,
    flash: Option<Flash>,
    stats: DispatchStats,
}

impl PulseDispatcher {
    pub fn new(cfg: &DispatchConfig, backends: Backends) -> Self {
        Self {
            visual: ChannelSlot::new(&cfg.visual, backends.visual),
            haptic: ChannelSlot::new(&cfg.haptic, backends.haptic),
            audio: ChannelSlot::new(&cfg.audio, backends.audio),
            queue: Vec::with_capacity(16),
            duty_cycle: cfg.visual_duty_cycle.clamp(0.0, 1.0),
            flash_duration_sec: cfg.flash_duration_sec.max(0.0),
            flash_cooldown_sec: cfg.flash_cooldown_sec.max(0.0),
            restart_backoff_sec: cfg.restart_backoff_sec.max(0.0),
            transient: Arc::new(HapticPattern::transient(
                cfg.haptic_transient_intensity,
                cfg.haptic_transient_sharpness,
            )),
            flash: None,
            stats: DispatchStats::default(),
        }
    }

    fn slot_state(&self, channel: Channel) -> (bool, f64) {
        match channel {
            Channel::Visual => (self.visual.enabled, self.visual.offset_sec),
            Channel::Haptic => (self.haptic.enabled, self.haptic.offset_sec),
            Channel::Audio => (self.audio.enabled, self.audio.offset_sec),
        }
    }

    pub fn is_enabled(&self, channel: Channel) -> bool {
        self.slot_state(channel).0
    }

    pub fn offset_sec(&self, channel: Channel) -> f64 {
        self.slot_state(channel).1
    }

    /// Takes effect for the next tick; queued triggers keep their due time.
    pub fn set_enabled(&mut self, channel: Channel, enabled: bool) {
        match channel {
            Channel::Visual => self.visual.enabled = enabled,
            Channel::Haptic => self.haptic.enabled = enabled,
            Channel::Audio => self.audio.enabled = enabled,
        }
        log::debug!("{} channel enabled={}", channel, enabled);
    }

    /// Takes effect for the next tick; queued triggers keep their due time.
    pub fn set_offset_ms(&mut self, channel: Channel, offset_ms: f64) {
        let sec = offset_ms_to_sec(offset_ms);
        match channel {
            Channel::Visual => self.visual.offset_sec = sec,
            Channel::Haptic => self.haptic.offset_sec = sec,
            Channel::Audio => self.audio.offset_sec = sec,
        }
    }

    pub fn is_ready(&self, channel: Channel) -> bool {
        match channel {
            Channel::Visual => self.visual.backend.is_ready(),
            Channel::Haptic => self.haptic.backend.is_ready(),
            Channel::Audio => self.audio.backend.is_ready(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn apply_parameters(&mut self, params: &ParameterSet) {
        self.visual.backend.apply_parameters(params);
        self.haptic.backend.apply_parameters(params);
        self.audio.backend.apply_parameters(params);
    }

    fn enqueue(&mut self, pending: Pending) {
        let at = self.queue.partition_point(|p| p.due_sec <= pending.due_sec);
        self.queue.insert(at, pending);
    }

    /// Queue one trigger per enabled channel for `tick`.
    pub fn on_tick(&mut self, tick: &PulseTick, frequency_hz: f64, epoch: u64) {
        let on_duration_sec = if frequency_hz.is_finite() && frequency_hz > 0.0 {
            self.duty_cycle / frequency_hz
        } else {
            0.0
        };
        for channel in Channel::ALL {
            let (enabled, offset_sec) = self.slot_state(channel);
            if !enabled {
                continue;
            }
            self.enqueue(Pending {
                channel,
                seq: tick.seq,
                intended_sec: tick.intended_sec,
                due_sec: tick.intended_sec + offset_sec,
                epoch,
                on_duration_sec,
            });
        }
    }

    fn suppressed_at(&self, now_sec: f64) -> Vec<ObjectId> {
        match &self.flash {
            Some(f) if now_sec < f.cooldown_until => f.objects.clone(),
            _ => Vec::new(),
        }
    }

    /// Fire every trigger due at `now_sec`. Triggers from another epoch are dropped.
    /// Returns the number of triggers delivered to a backend.
    pub fn poll(&mut self, now_sec: f64, epoch: u64) -> usize {
        let due = self.queue.partition_point(|p| p.due_sec <= now_sec);
        if due == 0 {
            return 0;
        }
        let ready: Vec<Pending> = self.queue.drain(..due).collect();
        let mut fired = 0;
        for p in ready {
            if p.epoch != epoch {
                self.stats.dropped_stale += 1;
                log::trace!("dropping stale {} trigger #{}", p.channel, p.seq);
                continue;
            }
            let kind = match p.channel {
                Channel::Visual => TriggerKind::Visual {
                    on_duration_sec: p.on_duration_sec,
                    suppressed: self.suppressed_at(now_sec),
                },
                Channel::Haptic => TriggerKind::Haptic {
                    pattern: Arc::clone(&self.transient),
                },
                Channel::Audio => TriggerKind::Audio,
            };
            let trigger = PulseTrigger {
                channel: p.channel,
                seq: p.seq,
                intended_sec: p.intended_sec,
                due_sec: p.due_sec,
                epoch: p.epoch,
                kind,
            };
            let backoff = self.restart_backoff_sec;
            let result = match p.channel {
                Channel::Visual => self.visual.fire(&trigger, now_sec, backoff),
                Channel::Haptic => self.haptic.fire(&trigger, now_sec, backoff),
                Channel::Audio => self.audio.fire(&trigger, now_sec, backoff),
            };
            let stats = self.stats.channel_mut(p.channel);
            match result {
                FireResult::Fired => {
                    stats.fired += 1;
                    fired += 1;
                }
                FireResult::NotReady => stats.skipped_not_ready += 1,
                FireResult::Failed => stats.failures += 1,
            }
        }
        fired
    }

    /// Drop everything queued.
    pub fn cancel_pending(&mut self) {
        if !self.queue.is_empty() {
            self.stats.cancelled += self.queue.len() as u64;
            self.queue.clear();
        }
    }

    // ------------------------------------------------------------------------
    // Flash sub-sequence
    // ------------------------------------------------------------------------

    /// Flash `objects` for the configured duration, followed by a cooldown.
    pub fn start_flash(&mut self, objects: Vec<ObjectId>, now_sec: f64) {
        let ends_at = now_sec + self.flash_duration_sec;
        self.flash = Some(Flash {
            objects,
            ends_at,
            cooldown_until: ends_at + self.flash_cooldown_sec,
        });
    }

    pub fn flash_running(&self, now_sec: f64) -> bool {
        matches!(&self.flash, Some(f) if now_sec < f.ends_at)
    }

    /// True while a flash runs or its cooldown has not elapsed.
    pub fn flash_blocking(&self, now_sec: f64) -> bool {
        matches!(&self.flash, Some(f) if now_sec < f.cooldown_until)
    }

    pub fn clear_flash(&mut self) {
        self.flash = None;
    }

    // ------------------------------------------------------------------------
    // Breathing pattern
    // ------------------------------------------------------------------------

    /// Hot-swap the long haptic pattern. Failure is logged and reported, never fatal.
    pub fn swap_haptic_pattern(
        &mut self,
        pattern: Arc<HapticPattern>,
        now_sec: f64,
    ) -> Result<(), OutputError> {
        let backoff = self.restart_backoff_sec;
        if !self.haptic.ensure_ready(now_sec, backoff) {
            self.stats.haptic.skipped_not_ready += 1;
            log::warn!("Haptic engine not ready, breathing pattern not swapped");
            return Err(OutputError::NotReady(Channel::Haptic));
        }
        self.haptic.backend.swap_pattern(pattern).map_err(|e| {
            self.stats.haptic.failures += 1;
            log::warn!("Haptic pattern swap failed: {}", e);
            e
        })
    }

    pub fn clear_haptic_pattern(&mut self) {
        self.haptic.backend.clear_pattern();
    }
}
