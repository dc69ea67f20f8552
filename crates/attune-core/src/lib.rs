//! Attune core: arousal-driven parameter scheduling and multi-modal pulse synchronization.
//!
//! A single arousal scalar drives the whole attention-training session: it is mapped into
//! gameplay, audio, haptic and visual parameters, a frame-synchronized scheduler turns the
//! resulting frequency into pulses, and the session state machine moves between tracking,
//! identifying, breathing and paused phases.
//!
//! Everything runs on the host's frame thread except the audio render callback, which only
//! reads the shared `AudioParamBlock`.

// - too_many_arguments: config-heavy constructors mirror the TOML sections
// - manual_clamp: min/max chains read clearer next to the curve formulas
// - neg_cmp_op_on_partial_ord: `!(x > 0.0)` deliberately rejects NaN
#![allow(clippy::too_many_arguments)]
#![allow(clippy::manual_clamp)]
#![allow(clippy::neg_cmp_op_on_partial_ord)]

pub mod audio; // Pulsed oscillator + shared parameter block
pub mod breathing;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod mapper;
pub mod objects;
pub mod scheduler;
pub mod session;
pub mod trajectory;

#[cfg(test)]
pub mod tests_config;
#[cfg(test)]
pub mod tests_proptest;

// ============================================================================
// CURATED PUBLIC API EXPORTS
// ============================================================================

// Time
pub use clock::{dt_sec, dt_us, Clock, ManualClock, MonotonicClock};

// Configuration
pub use config::{
    AttuneConfig, BreathingHapticConfig, ChannelConfig, ConfigError, DispatchConfig,
    IntervalCurve, MapperConfig, SchedulerConfig, SessionConfig, TrajectoryConfig,
};

// Errors
pub use error::{AttuneError, OutputError};

// Events
pub use events::{BusMetricsSnapshot, CoreEvent, EventBus};

// Mapper
pub use mapper::{compute_parameters, IntervalRange, ParameterSet, Rgba};

// Scheduler
pub use scheduler::{PulseScheduler, PulseTick, MIN_FREQUENCY_HZ};

// Trajectory
pub use trajectory::{session_arousal, session_progress, ArousalController, SessionProfile};

// Dispatch
pub use dispatcher::{
    Backends, Channel, DispatchStats, HapticBackend, OutputBackend, PulseDispatcher,
    PulseTrigger, RecordingBackend, TriggerKind,
};

// Audio
pub use audio::{
    shared_audio_params, AudioEnvelopeBackend, AudioParamBlock, PulsedOscillator,
    SharedAudioParams,
};

// Breathing
pub use breathing::{
    generate_haptic_pattern, BreathPhase, BreathingCycle, BreathingCycleSpec, HapticEvent,
    HapticPattern,
};

// Session
pub use objects::{ObjectId, TrackedObject, Vec2};
pub use session::{
    IdentificationOutcome, SessionEngine, SessionPhase, SessionSummary, TapOutcome,
};
