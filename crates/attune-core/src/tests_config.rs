#[cfg(test)]
mod tests {
    use crate::config::*;
    use crate::trajectory::SessionProfile;
    use std::env;
    use std::fs;
    use tempfile::NamedTempFile;

    // Tests touching ATTUNE_* variables or layered loading run one at a time
    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    #[test]
    fn test_default_config_valid() {
        let config = AttuneConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let config = AttuneConfig::default();
        assert_eq!(config.scheduler.resync_threshold_sec, 0.25);
        assert_eq!(config.mapper.min_frequency_hz, 1.5);
        assert_eq!(config.mapper.max_frequency_hz, 16.0);
        assert_eq!(config.dispatch.visual.offset_ms, 0.0);
        assert_eq!(config.dispatch.haptic.offset_ms, 30.0);
        assert_eq!(config.dispatch.audio.offset_ms, 40.0);
        assert_eq!(config.trajectory.step_ladder.len(), 41);
        assert!((config.trajectory.decay_constant - 2.0 * 3.0_f64.ln()).abs() < 1e-12);
        assert_eq!(config.trajectory.profile, SessionProfile::Standard);
        assert_eq!(config.session.breathing_window_start, 0.4);
        assert_eq!(config.session.breathing_window_end, 0.6);
    }

    #[test]
    fn test_config_validation_mapper() {
        let mut config = AttuneConfig::default();

        // Inverted frequency range
        config.mapper.min_frequency_hz = 20.0;
        assert!(config.validate().is_err());

        // Degenerate tracking band
        config = AttuneConfig::default();
        config.mapper.tracking_low_threshold = 0.6;
        config.mapper.tracking_high_threshold = 0.6;
        assert!(config.validate().is_err());

        // Identification duration floor must be positive
        config = AttuneConfig::default();
        config.mapper.min_identification_duration_sec = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_trajectory() {
        let mut config = AttuneConfig::default();
        config.trajectory.step_ladder = vec![0.0, 0.5, 0.5];
        assert!(config.validate().is_err());

        config = AttuneConfig::default();
        config.trajectory.step_ladder = vec![];
        assert!(config.validate().is_err());

        config = AttuneConfig::default();
        config.trajectory.warmup_smoothing_factor = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_session_and_dispatch() {
        let mut config = AttuneConfig::default();
        config.session.breathing_window_start = 0.7;
        assert!(config.validate().is_err());

        config = AttuneConfig::default();
        config.session.total_objects = 3;
        assert!(config.validate().is_err());

        config = AttuneConfig::default();
        config.dispatch.audio.offset_ms = -5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_to_toml_string() {
        let config = AttuneConfig::default();
        let toml_str = config.to_toml_string().unwrap();

        assert!(toml_str.contains("[scheduler]"));
        assert!(toml_str.contains("[mapper]"));
        assert!(toml_str.contains("[dispatch.haptic]"));
        assert!(toml_str.contains("resync_threshold_sec"));
        assert!(toml_str.contains("profile = \"standard\""));
    }

    #[test]
    fn test_config_save_and_load() {
        let mut config = AttuneConfig::default();
        config.session.seed = Some(42);
        config.trajectory.profile = SessionProfile::Challenge;

        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();
        config.save_to_file(path).unwrap();

        let loaded = AttuneConfig::from_file(path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_env_overrides() {
        let _guard = ENV_LOCK.lock();
        env::set_var("ATTUNE_MAPPER_MAX_FREQUENCY_HZ", "12.0");
        env::set_var("ATTUNE_DISPATCH_HAPTIC_OFFSET_MS", "25");
        env::set_var("ATTUNE_TRAJECTORY_PROFILE", "fluctuating");

        let mut config = AttuneConfig::default();
        config.apply_env_overrides().unwrap();

        assert_eq!(config.mapper.max_frequency_hz, 12.0);
        assert_eq!(config.dispatch.haptic.offset_ms, 25.0);
        assert_eq!(config.trajectory.profile, SessionProfile::Fluctuating);

        env::remove_var("ATTUNE_MAPPER_MAX_FREQUENCY_HZ");
        env::remove_var("ATTUNE_DISPATCH_HAPTIC_OFFSET_MS");
        env::remove_var("ATTUNE_TRAJECTORY_PROFILE");
    }

    #[test]
    fn test_invalid_env_var_handling() {
        let _guard = ENV_LOCK.lock();
        env::set_var("ATTUNE_SESSION_DURATION_SEC", "ten minutes");

        let mut config = AttuneConfig::default();
        assert!(config.apply_env_overrides().is_err());

        env::remove_var("ATTUNE_SESSION_DURATION_SEC");
    }

    #[test]
    fn test_config_layered_loading() {
        let _guard = ENV_LOCK.lock();
        let default_file = NamedTempFile::new().unwrap();
        let user_file = NamedTempFile::new().unwrap();

        let mut default_config = AttuneConfig::default();
        default_config.session.duration_sec = 900.0;
        default_config.save_to_file(default_file.path()).unwrap();

        let mut user_config = AttuneConfig::default();
        user_config.mapper.min_frequency_hz = 2.0;
        user_config.save_to_file(user_file.path()).unwrap();

        let loaded =
            AttuneConfig::load_layered(Some(default_file.path()), Some(user_file.path())).unwrap();

        // The user file wins as a whole
        assert_eq!(loaded.mapper.min_frequency_hz, 2.0);
        assert_eq!(loaded.session.duration_sec, 600.0);
    }

    #[test]
    fn test_layered_loading_missing_files_uses_defaults() {
        let _guard = ENV_LOCK.lock();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let loaded = AttuneConfig::load_layered(Some(missing.as_path()), None).unwrap();
        assert_eq!(loaded, AttuneConfig::default());
    }

    #[test]
    fn test_config_file_not_found() {
        let result = AttuneConfig::from_file("nonexistent.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_invalid_toml_syntax() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "invalid toml: syntax").unwrap();

        let result = AttuneConfig::from_file(temp_file.path());
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_file_failing_validation_is_rejected() {
        let mut config = AttuneConfig::default();
        config.session.duration_sec = -1.0;
        let temp_file = NamedTempFile::new().unwrap();
        config.save_to_file(temp_file.path()).unwrap();

        let result = AttuneConfig::from_file(temp_file.path());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_partial_config_is_rejected() {
        let toml_str = r#"
            [scheduler]
            resync_threshold_sec = 0.5
        "#;

        let result: Result<AttuneConfig, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }
}
