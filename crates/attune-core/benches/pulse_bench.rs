use attune_core::{
    compute_parameters, generate_haptic_pattern, shared_audio_params, AttuneConfig,
    AudioEnvelopeBackend, Backends, BreathingHapticConfig, EventBus, ManualClock, MapperConfig,
    PulseScheduler, PulsedOscillator, SchedulerConfig, SessionEngine,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

fn benchmark_compute_parameters(c: &mut Criterion) {
    let cfg = MapperConfig::default();
    let mut rng = StdRng::seed_from_u64(42);
    let arousals: Vec<f64> = (0..256).map(|_| rng.gen::<f64>()).collect();
    let mut i = 0;

    c.bench_function("compute_parameters", |b| {
        b.iter(|| {
            i = (i + 1) % arousals.len();
            compute_parameters(black_box(arousals[i]), &cfg)
        })
    });
}

/// One 60 Hz frame of the scheduler at the top of the frequency range.
fn benchmark_scheduler_frame(c: &mut Criterion) {
    let mut scheduler = PulseScheduler::new(16.0, &SchedulerConfig::default());
    scheduler.start();
    let dt = 1.0 / 60.0;
    let mut ts = 0.0;
    scheduler.on_frame(ts, 0.0, |_| {});

    c.bench_function("scheduler_on_frame", |b| {
        b.iter(|| {
            ts += dt;
            scheduler.on_frame(black_box(ts), black_box(dt), |t| {
                black_box(t);
            })
        })
    });
}

fn benchmark_oscillator_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("oscillator_render");
    let mut backend = AudioEnvelopeBackend::new(shared_audio_params());
    attune_core::OutputBackend::apply_parameters(
        &mut backend,
        &compute_parameters(0.7, &MapperConfig::default()),
    );
    let mut osc = PulsedOscillator::new(backend.params());

    for frames in [128usize, 512, 2048] {
        let mut buf = vec![0.0_f32; frames];
        group.bench_with_input(BenchmarkId::new("mono", frames), &frames, |b, _| {
            b.iter(|| {
                backend.params().lock().retrigger += 1;
                osc.render(black_box(&mut buf), 48_000.0);
            })
        });
    }
    group.finish();
}

fn benchmark_haptic_pattern(c: &mut Criterion) {
    let cfg = BreathingHapticConfig::default();
    let spec = MapperConfig::default().breathing_at_low;

    c.bench_function("generate_haptic_pattern", |b| {
        b.iter(|| generate_haptic_pattern(black_box(&spec), &cfg))
    });
}

/// Full engine frame in tracking with recording backends.
fn benchmark_session_frame(c: &mut Criterion) {
    let clock = ManualClock::new();
    let mut config = AttuneConfig::default();
    config.session.seed = Some(42);
    config.session.auto_breathing = false;
    let mut engine =
        match SessionEngine::new(config, clock.shared(), Backends::recording(), EventBus::new()) {
            Ok(e) => e,
            Err(e) => panic!("default config rejected: {}", e),
        };
    engine.start_session(0.6);
    let dt = 1.0 / 60.0;

    c.bench_function("session_frame", |b| {
        b.iter(|| {
            clock.advance(Duration::from_secs_f64(dt));
            engine.frame(black_box(dt));
        })
    });
}

criterion_group!(
    benches,
    benchmark_compute_parameters,
    benchmark_scheduler_frame,
    benchmark_oscillator_render,
    benchmark_haptic_pattern,
    benchmark_session_frame
);
criterion_main!(benches);
