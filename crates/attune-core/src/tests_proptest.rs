use proptest::prelude::*;

/// Property-based tests for the mapper, scheduler and trajectory invariants

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breathing::{generate_haptic_pattern, BreathPhase, BreathingCycleSpec};
    use crate::config::{BreathingHapticConfig, MapperConfig, SchedulerConfig, TrajectoryConfig};
    use crate::mapper::compute_parameters;
    use crate::scheduler::PulseScheduler;
    use crate::trajectory::{session_arousal, SessionProfile};

    // =========================================================================
    // Mapper
    // =========================================================================
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn test_mapper_is_pure(a in -1.0f64..2.0f64) {
            let cfg = MapperConfig::default();
            prop_assert_eq!(compute_parameters(a, &cfg), compute_parameters(a, &cfg));
        }

        #[test]
        fn test_interval_ranges_ordered(a in 0.0f64..=1.0f64) {
            let p = compute_parameters(a, &MapperConfig::default());
            prop_assert!(p.shift_interval.min <= p.shift_interval.max);
            prop_assert!(p.identification_interval.min <= p.identification_interval.max);
        }

        #[test]
        fn test_target_count_bounds(a in -0.5f64..1.5f64) {
            let cfg = MapperConfig::default();
            let p = compute_parameters(a, &cfg);
            prop_assert!(p.target_count >= cfg.min_targets_high_arousal);
            prop_assert!(p.target_count <= cfg.max_targets_low_arousal);
        }

        #[test]
        fn test_crossing_interval_endpoints_stay_ordered(
            min_lo in 0.5f64..20.0f64,
            min_hi in 0.5f64..20.0f64,
            max_lo in 0.5f64..20.0f64,
            max_hi in 0.5f64..20.0f64,
            a in 0.0f64..=1.0f64,
        ) {
            let mut cfg = MapperConfig::default();
            cfg.shift_interval.min_at_low = min_lo;
            cfg.shift_interval.min_at_high = min_hi;
            cfg.shift_interval.max_at_low = max_lo;
            cfg.shift_interval.max_at_high = max_hi;
            let p = compute_parameters(a, &cfg);
            prop_assert!(p.shift_interval.min <= p.shift_interval.max);
        }

        #[test]
        fn test_frequency_monotonic(a in 0.0f64..1.0f64, d in 0.0f64..0.5f64) {
            let cfg = MapperConfig::default();
            let b = (a + d).min(1.0);
            prop_assert!(
                compute_parameters(a, &cfg).timer_frequency_hz
                    <= compute_parameters(b, &cfg).timer_frequency_hz
            );
        }
    }

    // =========================================================================
    // Scheduler
    // =========================================================================
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_tick_count_matches_duration(
            freq in 1.5f64..16.0f64,
            fps in prop::sample::select(vec![30.0f64, 60.0, 120.0]),
            seconds in 1.0f64..20.0f64,
        ) {
            let mut s = PulseScheduler::new(freq, &SchedulerConfig::default());
            s.start();
            let dt = 1.0 / fps;
            let frames = (seconds * fps).floor() as usize;
            let mut ticks = Vec::new();
            let mut ts = 0.0;
            s.on_frame(ts, 0.0, |t| ticks.push(t));
            for _ in 0..frames {
                ts += dt;
                s.on_frame(ts, dt, |t| ticks.push(t));
            }
            let t = frames as f64 * dt;
            let expected = (t * freq).floor() as i64;
            prop_assert!((ticks.len() as i64 - expected).abs() <= 1);
            for w in ticks.windows(2) {
                prop_assert!(((w[1].intended_sec - w[0].intended_sec) - 1.0 / freq).abs() < 1e-9);
            }
        }
    }

    // =========================================================================
    // Trajectory
    // =========================================================================
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_standard_decay_non_increasing(
            initial in 0.0f64..=1.0f64,
            p in 0.0f64..1.0f64,
            d in 0.0f64..0.2f64,
        ) {
            let cfg = TrajectoryConfig::default();
            let a = session_arousal(SessionProfile::Standard, p, initial, &cfg);
            let b = session_arousal(SessionProfile::Standard, (p + d).min(1.0), initial, &cfg);
            prop_assert!(b <= a + 1e-12);
            prop_assert!((session_arousal(SessionProfile::Standard, 0.0, initial, &cfg) - initial).abs() < 1e-12);
        }

        #[test]
        fn test_profiles_bounded(
            initial in 0.0f64..=1.0f64,
            p in -0.5f64..1.5f64,
            idx in 0usize..4usize,
        ) {
            let cfg = TrajectoryConfig::default();
            let v = session_arousal(SessionProfile::ALL[idx], p, initial, &cfg);
            prop_assert!((0.0..=1.0).contains(&v));
        }
    }

    // =========================================================================
    // Breathing pattern
    // =========================================================================
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn test_pattern_sorted_and_inside_cycle(
            inhale in 0.5f64..8.0f64,
            hold_in in 0.25f64..4.0f64,
            exhale in 0.5f64..8.0f64,
            hold_out in 0.25f64..4.0f64,
        ) {
            let spec = BreathingCycleSpec::new(inhale, hold_in, exhale, hold_out).unwrap();
            let pattern = generate_haptic_pattern(&spec, &BreathingHapticConfig::default());
            let events = pattern.events();
            prop_assert!(events.windows(2).all(|w| w[0].time_sec <= w[1].time_sec));
            prop_assert!(events.iter().all(|e| e.time_sec >= 0.0 && e.time_sec < spec.total()));
            // Hold after exhale stays silent
            let silent_from = spec.phase_start(BreathPhase::HoldAfterExhale);
            prop_assert!(events.iter().all(|e| e.time_sec < silent_from));
        }
    }
}
