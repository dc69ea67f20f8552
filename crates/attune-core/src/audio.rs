//! Continuously running pulsed oscillator
//!
//! The audio channel never plays one-shot sounds. A single oscillator runs for the whole
//! session and every audio trigger bumps a retrigger counter that restarts its envelope.
//! The control side and the render callback share a small `AudioParamBlock`; the render path
//! copies it under the lock and renders outside it, without allocating.

use parking_lot::Mutex;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::dispatcher::{Channel, OutputBackend, PulseTrigger};
use crate::error::OutputError;
use crate::mapper::ParameterSet;

/// ln(100): envelope falls to 1% over its decay window
const ENVELOPE_DECAY_NEPERS: f32 = 4.605_17;

/// Control values read by the render callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioParamBlock {
    pub frequency_hz: f32,
    pub amplitude: f32,
    /// 0 = sine, 1 = square
    pub squareness: f32,
    pub pulse_rate_hz: f32,
    /// Incremented once per audio trigger
    pub retrigger: u64,
    pub muted: bool,
}

impl Default for AudioParamBlock {
    fn default() -> Self {
        Self {
            frequency_hz: 220.0,
            amplitude: 0.0,
            squareness: 0.0,
            pulse_rate_hz: 1.0,
            retrigger: 0,
            muted: false,
        }
    }
}

impl AudioParamBlock {
    pub fn from_parameters(params: &ParameterSet) -> Self {
        let mut block = Self::default();
        block.apply(params);
        block
    }

    /// Copy the audio fields of `params`, keeping the retrigger counter and mute flag.
    pub fn apply(&mut self, params: &ParameterSet) {
        self.frequency_hz = params.audio_frequency_hz as f32;
        self.amplitude = params.audio_amplitude as f32;
        self.squareness = params.audio_squareness.clamp(0.0, 1.0) as f32;
        self.pulse_rate_hz = params.audio_pulse_rate_hz as f32;
    }
}

pub type SharedAudioParams = Arc<Mutex<AudioParamBlock>>;

pub fn shared_audio_params() -> SharedAudioParams {
    Arc::new(Mutex::new(AudioParamBlock::default()))
}

/// Render side. Lives on the audio thread.
#[derive(Debug)]
pub struct PulsedOscillator {
    params: SharedAudioParams,
    phase: f32,
    envelope: f32,
    last_retrigger: u64,
}

impl PulsedOscillator {
    pub fn new(params: SharedAudioParams) -> Self {
        let last_retrigger = params.lock().retrigger;
        Self {
            params,
            phase: 0.0,
            envelope: 0.0,
            last_retrigger,
        }
    }

    pub fn envelope(&self) -> f32 {
        self.envelope
    }

    /// Fill `out` with mono samples.
    pub fn render(&mut self, out: &mut [f32], sample_rate: f32) {
        let block = *self.params.lock();

        if block.retrigger != self.last_retrigger {
            self.last_retrigger = block.retrigger;
            self.envelope = 1.0;
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) || block.muted {
            out.fill(0.0);
            return;
        }

        let dt = 1.0 / sample_rate;
        // Each pulse decays within half its period
        let window = 0.5 / block.pulse_rate_hz.max(0.01);
        let decay = (-ENVELOPE_DECAY_NEPERS * dt / window).exp();
        let step = block.frequency_hz.max(0.0) * dt;
        let sq = block.squareness.clamp(0.0, 1.0);

        for sample in out.iter_mut() {
            let sine = (self.phase * TAU).sin();
            let square = if sine >= 0.0 { 1.0 } else { -1.0 };
            *sample = (sine + (square - sine) * sq) * block.amplitude * self.envelope;
            self.envelope *= decay;
            self.phase = (self.phase + step).fract();
        }
    }
}

/// Audio channel backend: pulses by bumping the retrigger counter.
#[derive(Debug, Clone)]
pub struct AudioEnvelopeBackend {
    params: SharedAudioParams,
    ready: Arc<AtomicBool>,
}

impl AudioEnvelopeBackend {
    pub fn new(params: SharedAudioParams) -> Self {
        Self {
            params,
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn params(&self) -> SharedAudioParams {
        Arc::clone(&self.params)
    }

    /// Shared flag the platform layer clears when the audio session is interrupted.
    pub fn ready_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ready)
    }

    pub fn set_muted(&self, muted: bool) {
        self.params.lock().muted = muted;
    }
}

impl OutputBackend for AudioEnvelopeBackend {
    fn channel(&self) -> Channel {
        Channel::Audio
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn restart(&mut self) -> Result<(), OutputError> {
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    fn fire(&mut self, _trigger: &PulseTrigger) -> Result<(), OutputError> {
        if !self.is_ready() {
            return Err(OutputError::NotReady(Channel::Audio));
        }
        let mut block = self.params.lock();
        block.retrigger = block.retrigger.wrapping_add(1);
        Ok(())
    }

    fn apply_parameters(&mut self, params: &ParameterSet) {
        self.params.lock().apply(params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapperConfig;
    use crate::dispatcher::TriggerKind;
    use crate::mapper::compute_parameters;

    fn trigger() -> PulseTrigger {
        PulseTrigger {
            channel: Channel::Audio,
            seq: 0,
            intended_sec: 0.0,
            due_sec: 0.04,
            epoch: 0,
            kind: TriggerKind::Audio,
        }
    }

    fn backend() -> AudioEnvelopeBackend {
        let mut b = AudioEnvelopeBackend::new(shared_audio_params());
        b.apply_parameters(&compute_parameters(0.5, &MapperConfig::default()));
        b
    }

    #[test]
    fn test_silent_until_triggered() {
        let b = backend();
        let mut osc = PulsedOscillator::new(b.params());
        let mut buf = [1.0_f32; 256];
        osc.render(&mut buf, 48_000.0);
        assert!(buf.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_trigger_restarts_envelope() {
        let mut b = backend();
        let mut osc = PulsedOscillator::new(b.params());
        b.fire(&trigger()).unwrap();

        let mut buf = [0.0_f32; 512];
        osc.render(&mut buf, 48_000.0);
        let peak = buf.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.0);
        assert!(osc.envelope() < 1.0);

        // Long render without a new trigger decays to near silence
        let mut long = vec![0.0_f32; 48_000];
        osc.render(&mut long, 48_000.0);
        assert!(osc.envelope() < 1e-3);
    }

    #[test]
    fn test_apply_keeps_counter() {
        let mut b = backend();
        b.fire(&trigger()).unwrap();
        b.fire(&trigger()).unwrap();
        b.apply_parameters(&compute_parameters(1.0, &MapperConfig::default()));
        let block = *b.params().lock();
        assert_eq!(block.retrigger, 2);
        assert!((block.frequency_hz - 440.0).abs() < 1e-3);
        assert!((block.pulse_rate_hz - 16.0).abs() < 1e-3);
    }

    #[test]
    fn test_square_output_is_bounded_by_amplitude() {
        let mut b = backend();
        b.params().lock().squareness = 1.0;
        let amp = b.params().lock().amplitude;
        let mut osc = PulsedOscillator::new(b.params());
        b.fire(&trigger()).unwrap();
        let mut buf = [0.0_f32; 128];
        osc.render(&mut buf, 48_000.0);
        assert!(buf.iter().all(|s| s.abs() <= amp + 1e-6));
        assert!((buf[0].abs() - amp).abs() < 1e-6);
    }

    #[test]
    fn test_not_ready_rejects_and_restart_recovers() {
        let mut b = backend();
        b.ready_flag().store(false, Ordering::Release);
        assert_eq!(
            b.fire(&trigger()),
            Err(OutputError::NotReady(Channel::Audio))
        );
        b.restart().unwrap();
        assert!(b.fire(&trigger()).is_ok());
        assert_eq!(b.params().lock().retrigger, 1);
    }

    #[test]
    fn test_muted_renders_silence() {
        let mut b = backend();
        b.set_muted(true);
        let mut osc = PulsedOscillator::new(b.params());
        b.fire(&trigger()).unwrap();
        let mut buf = [1.0_f32; 64];
        osc.render(&mut buf, 44_100.0);
        assert!(buf.iter().all(|s| *s == 0.0));
    }
}
