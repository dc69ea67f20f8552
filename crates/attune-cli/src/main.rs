use std::path::PathBuf;
use std::time::Duration;

use attune_core::{
    compute_parameters, generate_haptic_pattern, AttuneConfig, Backends, EventBus, ManualClock,
    SessionEngine, SessionPhase, SessionProfile,
};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "attune-cli", version, about = "Headless driver for the attune session engine")]
struct Cli {
    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: log::LevelFilter,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a complete session on a simulated clock with a player that finds every target
    Simulate {
        #[arg(long, default_value_t = 10.0)]
        minutes: f64,
        #[arg(long, default_value_t = 60.0)]
        fps: f64,
        #[arg(long)]
        profile: Option<SessionProfile>,
        #[arg(long, default_value_t = 0.5)]
        initial_arousal: f64,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Ramp up to the initial arousal over this many identification rounds
        #[arg(long)]
        warmup_rounds: Option<u32>,
    },
    /// Print the parameter set for one arousal value as JSON
    Params {
        #[arg(long)]
        arousal: f64,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the breathing cycle and its haptic events
    BreathPattern {
        #[arg(long)]
        arousal: f64,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the built-in configuration as TOML
    DefaultConfig,
}

fn load_config(path: Option<&PathBuf>) -> Result<AttuneConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(p) => AttuneConfig::from_file_with_env(p)?,
        None => {
            let mut c = AttuneConfig::default();
            c.apply_env_overrides()?;
            c.validate()?;
            c
        }
    };
    Ok(config)
}

fn simulate(
    mut config: AttuneConfig,
    minutes: f64,
    fps: f64,
    initial_arousal: f64,
    warmup_rounds: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    if !(minutes.is_finite() && minutes > 0.0 && fps.is_finite() && fps > 0.0) {
        return Err("minutes and fps must be positive".into());
    }
    config.session.duration_sec = minutes * 60.0;

    let clock = ManualClock::new();
    let bus = EventBus::new();
    let mut engine = SessionEngine::new(config, clock.shared(), Backends::recording(), bus)?;

    engine.start_session(initial_arousal);
    if let Some(rounds) = warmup_rounds {
        engine.start_warmup(initial_arousal, rounds)?;
    }

    let dt = 1.0 / fps;
    let frames = (minutes * 60.0 * fps).round() as u64;
    let mut last_report = 0.0;
    for _ in 0..frames {
        clock.advance(Duration::from_secs_f64(dt));
        engine.frame(dt);

        if engine.phase() == SessionPhase::Identifying {
            let targets: Vec<_> = engine
                .objects()
                .iter()
                .filter(|o| o.is_target)
                .map(|o| o.id)
                .collect();
            for id in targets {
                engine.tap(id);
            }
        }

        let elapsed = engine.session_elapsed_sec();
        if elapsed - last_report >= 60.0 {
            last_report = elapsed;
            log::info!(
                "t={:.0}s phase={} arousal={:.3} freq={:.2}Hz",
                elapsed,
                engine.phase(),
                engine.arousal(),
                engine.parameters().timer_frequency_hz
            );
        }
    }

    let stats = engine.dispatcher().stats();
    log::debug!(
        "dispatch: dropped_stale={} cancelled={}",
        stats.dropped_stale,
        stats.cancelled
    );

    let summary = engine
        .end_session()
        .ok_or("session was not running at the end of the simulation")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.log_level)
        .parse_default_env()
        .init();

    match cli.cmd {
        Commands::Simulate {
            minutes,
            fps,
            profile,
            initial_arousal,
            seed,
            config,
            warmup_rounds,
        } => {
            let mut cfg = load_config(config.as_ref())?;
            if let Some(p) = profile {
                cfg.trajectory.profile = p;
            }
            if seed.is_some() {
                cfg.session.seed = seed;
            }
            simulate(cfg, minutes, fps, initial_arousal, warmup_rounds)?;
        }
        Commands::Params { arousal, config } => {
            let cfg = load_config(config.as_ref())?;
            let params = compute_parameters(arousal, &cfg.mapper);
            println!("{}", serde_json::to_string_pretty(&params)?);
        }
        Commands::BreathPattern { arousal, config } => {
            let cfg = load_config(config.as_ref())?;
            let spec = compute_parameters(arousal, &cfg.mapper).breathing;
            let pattern = generate_haptic_pattern(&spec, &cfg.breathing_haptics);
            println!(
                "cycle: inhale={:.2}s hold={:.2}s exhale={:.2}s hold={:.2}s ({:.1} breaths/min)",
                spec.inhale,
                spec.hold_after_inhale,
                spec.exhale,
                spec.hold_after_exhale,
                spec.breaths_per_minute()
            );
            for event in pattern.events() {
                println!(
                    "{:>8.3}s  intensity={:.2}  sharpness={:.2}",
                    event.time_sec, event.intensity, event.sharpness
                );
            }
            println!("{} events", pattern.len());
        }
        Commands::DefaultConfig => {
            print!("{}", AttuneConfig::default().to_toml_string()?);
        }
    }
    Ok(())
}
