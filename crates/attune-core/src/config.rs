use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::breathing::BreathingCycleSpec;
use crate::mapper::Rgba;
use crate::trajectory::SessionProfile;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),
}

/// Complete static configuration, loaded once at startup and fixed for a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AttuneConfig {
    pub scheduler: SchedulerConfig,
    pub mapper: MapperConfig,
    pub trajectory: TrajectoryConfig,
    pub dispatch: DispatchConfig,
    pub session: SessionConfig,
    pub breathing_haptics: BreathingHapticConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Lag behind the intended tick time beyond which the scheduler resynchronizes
    /// instead of catching up.
    pub resync_threshold_sec: f64,
}

/// Independent low/high-arousal endpoints for an interval's min and max.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct IntervalCurve {
    pub min_at_low: f64,
    pub min_at_high: f64,
    pub max_at_low: f64,
    pub max_at_high: f64,
}

/// Curve endpoints for the arousal parameter mapper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MapperConfig {
    pub min_frequency_hz: f64,
    pub max_frequency_hz: f64,

    pub audio_min_frequency_hz: f64,
    pub audio_max_frequency_hz: f64,
    pub audio_min_amplitude: f64,
    pub audio_max_amplitude: f64,
    pub audio_min_squareness: f64,
    pub audio_max_squareness: f64,

    /// Lower edge of the arousal band the tracking task responds to
    pub tracking_low_threshold: f64,
    /// Upper edge of the arousal band the tracking task responds to
    pub tracking_high_threshold: f64,

    pub speed_at_low: f64,
    pub speed_at_high: f64,
    pub speed_sd_at_low: f64,
    pub speed_sd_at_high: f64,

    pub max_targets_low_arousal: u32,
    pub min_targets_high_arousal: u32,

    pub identification_duration_at_low: f64,
    pub identification_duration_at_high: f64,
    pub min_identification_duration_sec: f64,

    pub shift_interval: IntervalCurve,
    pub identification_interval: IntervalCurve,

    pub target_color_low: Rgba,
    pub target_color_high: Rgba,
    pub distractor_color_low: Rgba,
    pub distractor_color_high: Rgba,

    pub breathing_at_low: BreathingCycleSpec,
    pub breathing_at_high: BreathingCycleSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrajectoryConfig {
    pub default_initial_arousal: f64,
    /// Discrete ladder used by step up/down, ascending
    pub step_ladder: Vec<f64>,
    pub step_tolerance: f64,
    /// Minimum change for `set_arousal` to count as a change
    pub change_epsilon: f64,
    /// Minimum change for session-progress updates to mutate state
    pub progress_update_threshold: f64,
    /// k in `initial * e^(-k * progress)`
    pub decay_constant: f64,
    pub profile: SessionProfile,
    pub fluctuation_amplitude: f64,
    pub fluctuation_cycles: f64,
    pub challenge_peak_progress: f64,
    pub challenge_half_width: f64,
    pub challenge_peak_gain: f64,
    pub variable_segments: u32,
    pub warmup_start_multiplier: f64,
    /// Fraction of the remaining gap closed per second
    pub warmup_smoothing_factor: f64,
    pub snap_tolerance: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ChannelConfig {
    pub enabled: bool,
    /// Latency compensation added to the intended tick time
    pub offset_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchConfig {
    pub visual: ChannelConfig,
    pub haptic: ChannelConfig,
    pub audio: ChannelConfig,
    /// Fraction of a tick interval the visual highlight stays on
    pub visual_duty_cycle: f64,
    pub flash_duration_sec: f64,
    pub flash_cooldown_sec: f64,
    /// Minimum spacing between restart attempts of an unready channel
    pub restart_backoff_sec: f64,
    pub haptic_transient_intensity: f32,
    pub haptic_transient_sharpness: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub duration_sec: f64,
    /// Targets plus distractors
    pub total_objects: u32,
    pub arena_width: f32,
    pub arena_height: f32,
    pub breathing_window_start: f64,
    pub breathing_window_end: f64,
    pub auto_breathing: bool,
    pub seed: Option<u64>,
}

/// Shape of the breathing haptic pulse train.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreathingHapticConfig {
    pub base_delay_sec: f64,
    pub min_delay_sec: f64,
    /// Growth of the delay factor per pulse
    pub acceleration: f64,
    pub max_sharpness: f32,
    pub min_sharpness: f32,
    pub min_intensity: f32,
    pub max_intensity: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            resync_threshold_sec: 0.25,
        }
    }
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            min_frequency_hz: 1.5,
            max_frequency_hz: 16.0,
            audio_min_frequency_hz: 110.0,
            audio_max_frequency_hz: 440.0,
            audio_min_amplitude: 0.05,
            audio_max_amplitude: 0.5,
            audio_min_squareness: 0.0,
            audio_max_squareness: 0.8,
            tracking_low_threshold: 0.2,
            tracking_high_threshold: 0.8,
            speed_at_low: 60.0,
            speed_at_high: 260.0,
            speed_sd_at_low: 10.0,
            speed_sd_at_high: 45.0,
            max_targets_low_arousal: 5,
            min_targets_high_arousal: 2,
            identification_duration_at_low: 6.0,
            identification_duration_at_high: 2.5,
            min_identification_duration_sec: 0.5,
            shift_interval: IntervalCurve {
                min_at_low: 6.0,
                min_at_high: 1.5,
                max_at_low: 10.0,
                max_at_high: 3.0,
            },
            identification_interval: IntervalCurve {
                min_at_low: 12.0,
                min_at_high: 6.0,
                max_at_low: 18.0,
                max_at_high: 9.0,
            },
            target_color_low: Rgba::new(0.20, 0.60, 1.00, 1.0),
            target_color_high: Rgba::new(0.55, 0.55, 0.70, 1.0),
            distractor_color_low: Rgba::new(0.90, 0.90, 0.90, 1.0),
            distractor_color_high: Rgba::new(0.62, 0.60, 0.68, 1.0),
            breathing_at_low: BreathingCycleSpec {
                inhale: 5.0,
                hold_after_inhale: 2.0,
                exhale: 7.0,
                hold_after_exhale: 2.0,
            },
            breathing_at_high: BreathingCycleSpec {
                inhale: 4.0,
                hold_after_inhale: 1.0,
                exhale: 5.0,
                hold_after_exhale: 1.0,
            },
        }
    }
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            default_initial_arousal: 0.5,
            step_ladder: (0..=40).map(|i| i as f64 * 0.025).collect(),
            step_tolerance: 1e-3,
            change_epsilon: 1e-6,
            progress_update_threshold: 1e-3,
            decay_constant: 2.0 * 3.0_f64.ln(),
            profile: SessionProfile::Standard,
            fluctuation_amplitude: 0.15,
            fluctuation_cycles: 3.0,
            challenge_peak_progress: 0.75,
            challenge_half_width: 0.15,
            challenge_peak_gain: 0.3,
            variable_segments: 5,
            warmup_start_multiplier: 0.5,
            warmup_smoothing_factor: 0.9,
            snap_tolerance: 1e-4,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            visual: ChannelConfig {
                enabled: true,
                offset_ms: 0.0,
            },
            haptic: ChannelConfig {
                enabled: true,
                offset_ms: 30.0,
            },
            audio: ChannelConfig {
                enabled: true,
                offset_ms: 40.0,
            },
            visual_duty_cycle: 0.2,
            flash_duration_sec: 0.6,
            flash_cooldown_sec: 0.4,
            restart_backoff_sec: 2.0,
            haptic_transient_intensity: 0.8,
            haptic_transient_sharpness: 0.6,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_sec: 600.0,
            total_objects: 10,
            arena_width: 400.0,
            arena_height: 700.0,
            breathing_window_start: 0.4,
            breathing_window_end: 0.6,
            auto_breathing: true,
            seed: None,
        }
    }
}

impl Default for BreathingHapticConfig {
    fn default() -> Self {
        Self {
            base_delay_sec: 0.35,
            min_delay_sec: 0.06,
            acceleration: 0.12,
            max_sharpness: 0.9,
            min_sharpness: 0.2,
            min_intensity: 0.35,
            max_intensity: 1.0,
        }
    }
}

fn env_override<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Validation(format!("Invalid {}", name))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::EnvVar(e)),
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Validation(msg.to_string())
}

impl AttuneConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: AttuneConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    /// Variables are prefixed with ATTUNE_, e.g. ATTUNE_MAPPER_MAX_FREQUENCY_HZ=12
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. User config file (if exists)
    /// 3. Default config file
    /// 4. Built-in defaults (lowest priority)
    pub fn load_layered(
        default_path: Option<&Path>,
        user_path: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut config = AttuneConfig::default();

        if let Some(path) = default_path {
            if path.exists() {
                config = Self::from_file(path)?;
            }
        }

        // Files are complete documents, so a present user file replaces the default one.
        if let Some(path) = user_path {
            if path.exists() {
                config = Self::from_file(path)?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_override("ATTUNE_SCHEDULER_RESYNC_THRESHOLD_SEC")? {
            self.scheduler.resync_threshold_sec = v;
        }

        if let Some(v) = env_override("ATTUNE_MAPPER_MIN_FREQUENCY_HZ")? {
            self.mapper.min_frequency_hz = v;
        }
        if let Some(v) = env_override("ATTUNE_MAPPER_MAX_FREQUENCY_HZ")? {
            self.mapper.max_frequency_hz = v;
        }

        if let Some(v) = env_override("ATTUNE_TRAJECTORY_DEFAULT_INITIAL_AROUSAL")? {
            self.trajectory.default_initial_arousal = v;
        }
        if let Some(v) = env_override("ATTUNE_TRAJECTORY_PROFILE")? {
            self.trajectory.profile = v;
        }

        if let Some(v) = env_override("ATTUNE_DISPATCH_HAPTIC_OFFSET_MS")? {
            self.dispatch.haptic.offset_ms = v;
        }
        if let Some(v) = env_override("ATTUNE_DISPATCH_AUDIO_OFFSET_MS")? {
            self.dispatch.audio.offset_ms = v;
        }

        if let Some(v) = env_override("ATTUNE_SESSION_DURATION_SEC")? {
            self.session.duration_sec = v;
        }
        if let Some(v) = env_override("ATTUNE_SESSION_SEED")? {
            self.session.seed = Some(v);
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Scheduler
        if !(self.scheduler.resync_threshold_sec > 0.0) {
            return Err(invalid("scheduler.resync_threshold_sec must be positive"));
        }

        // Mapper
        let m = &self.mapper;
        if !(m.min_frequency_hz > 0.0) || m.max_frequency_hz < m.min_frequency_hz {
            return Err(invalid(
                "mapper frequencies must satisfy 0 < min_frequency_hz <= max_frequency_hz",
            ));
        }
        if m.tracking_low_threshold < 0.0
            || m.tracking_high_threshold > 1.0
            || m.tracking_high_threshold <= m.tracking_low_threshold
        {
            return Err(invalid(
                "mapper tracking thresholds must satisfy 0 <= low < high <= 1",
            ));
        }
        if m.min_targets_high_arousal == 0 || m.min_targets_high_arousal > m.max_targets_low_arousal
        {
            return Err(invalid(
                "mapper target counts must satisfy 1 <= min_targets_high_arousal <= max_targets_low_arousal",
            ));
        }
        if !(m.min_identification_duration_sec > 0.0) {
            return Err(invalid("mapper.min_identification_duration_sec must be positive"));
        }
        for (name, curve) in [
            ("shift_interval", &m.shift_interval),
            ("identification_interval", &m.identification_interval),
        ] {
            let all = [
                curve.min_at_low,
                curve.min_at_high,
                curve.max_at_low,
                curve.max_at_high,
            ];
            if all.iter().any(|v| !(*v > 0.0)) {
                return Err(ConfigError::Validation(format!(
                    "mapper.{} endpoints must be positive",
                    name
                )));
            }
        }
        if m.audio_min_amplitude < 0.0 || m.audio_max_amplitude > 1.0 {
            return Err(invalid("mapper audio amplitude must stay within [0, 1]"));
        }
        if !(m.audio_min_frequency_hz > 0.0) {
            return Err(invalid("mapper.audio_min_frequency_hz must be positive"));
        }
        if !m.breathing_at_low.is_valid() || !m.breathing_at_high.is_valid() {
            return Err(invalid("mapper breathing durations must all be positive"));
        }

        // Trajectory
        let t = &self.trajectory;
        if !(0.0..=1.0).contains(&t.default_initial_arousal) {
            return Err(invalid("trajectory.default_initial_arousal must be in [0, 1]"));
        }
        if t.step_ladder.is_empty() {
            return Err(invalid("trajectory.step_ladder must not be empty"));
        }
        if t.step_ladder.iter().any(|v| !(0.0..=1.0).contains(v))
            || t.step_ladder.windows(2).any(|w| w[1] <= w[0])
        {
            return Err(invalid(
                "trajectory.step_ladder must be strictly ascending within [0, 1]",
            ));
        }
        if t.decay_constant < 0.0 {
            return Err(invalid("trajectory.decay_constant must be >= 0"));
        }
        if !(0.0..=1.0).contains(&t.warmup_start_multiplier) {
            return Err(invalid("trajectory.warmup_start_multiplier must be in [0, 1]"));
        }
        if !(t.warmup_smoothing_factor > 0.0 && t.warmup_smoothing_factor < 1.0) {
            return Err(invalid("trajectory.warmup_smoothing_factor must be in (0, 1)"));
        }
        if t.variable_segments == 0 {
            return Err(invalid("trajectory.variable_segments must be > 0"));
        }

        // Dispatch
        let d = &self.dispatch;
        for (name, ch) in [("visual", &d.visual), ("haptic", &d.haptic), ("audio", &d.audio)] {
            if !(0.0..1000.0).contains(&ch.offset_ms) {
                return Err(ConfigError::Validation(format!(
                    "dispatch.{}.offset_ms must be in [0, 1000)",
                    name
                )));
            }
        }
        if !(d.visual_duty_cycle > 0.0 && d.visual_duty_cycle < 1.0) {
            return Err(invalid("dispatch.visual_duty_cycle must be in (0, 1)"));
        }
        if d.flash_duration_sec < 0.0 || d.flash_cooldown_sec < 0.0 {
            return Err(invalid("dispatch flash timings must be >= 0"));
        }

        // Session
        let s = &self.session;
        if !(s.duration_sec > 0.0) {
            return Err(invalid("session.duration_sec must be positive"));
        }
        if s.total_objects <= m.max_targets_low_arousal {
            return Err(invalid(
                "session.total_objects must exceed mapper.max_targets_low_arousal",
            ));
        }
        if !(s.arena_width > 0.0 && s.arena_height > 0.0) {
            return Err(invalid("session arena size must be positive"));
        }
        if !(0.0 <= s.breathing_window_start
            && s.breathing_window_start < s.breathing_window_end
            && s.breathing_window_end <= 1.0)
        {
            return Err(invalid(
                "session breathing window must satisfy 0 <= start < end <= 1",
            ));
        }

        // Breathing haptics
        let b = &self.breathing_haptics;
        if !(b.min_delay_sec > 0.0) || b.base_delay_sec < b.min_delay_sec {
            return Err(invalid(
                "breathing_haptics delays must satisfy 0 < min_delay_sec <= base_delay_sec",
            ));
        }
        if b.acceleration < 0.0 {
            return Err(invalid("breathing_haptics.acceleration must be >= 0"));
        }
        if !(0.0..=1.0).contains(&b.min_sharpness)
            || !(0.0..=1.0).contains(&b.max_sharpness)
            || b.min_sharpness > b.max_sharpness
        {
            return Err(invalid(
                "breathing_haptics sharpness must satisfy 0 <= min <= max <= 1",
            ));
        }

        Ok(())
    }

    /// Export configuration to TOML string
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = self
            .to_toml_string()
            .map_err(|e| ConfigError::Validation(format!("TOML serialization error: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }
}
