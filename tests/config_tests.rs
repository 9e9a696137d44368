use vigil::config::{ConfigError, DrainPolicy, VigilConfig, MAX_DURATION_MS};

#[test]
fn test_defaults_are_valid() {
    let config = VigilConfig::default();
    config.validate().expect("defaults validate");

    assert_eq!(config.frames.frozen_frame_threshold_nanos, 700_000_000);
    assert_eq!(config.frames.max_slow_frames_amount, 512);
    assert_eq!(config.call_rate.max_calls_threshold, 100);
    assert_eq!(config.dispatcher.drain_policy, DrainPolicy::ExecutePending);
    assert!(config.anr.enabled);
}

#[test]
fn test_partial_json_falls_back_to_defaults() {
    let config = VigilConfig::from_json_str(
        r#"{ "anr": { "hang_threshold_ms": 2000 }, "dispatcher": { "drain_policy": "discard_pending" } }"#,
    )
    .expect("partial config parses");

    assert_eq!(config.anr.hang_threshold_ms, 2000);
    assert_eq!(config.anr.probe_interval_ms, 500);
    assert_eq!(config.dispatcher.drain_policy, DrainPolicy::DiscardPending);
    assert_eq!(config.frames, VigilConfig::default().frames);
}

#[test]
fn test_invalid_values_are_rejected() {
    let err = VigilConfig::from_json_str(r#"{ "frames": { "max_slow_frames_amount": 0 } }"#).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));

    let err = VigilConfig::from_json_str("{ not json").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_session_timeouts_must_fit_in_nanos() {
    let mut config = VigilConfig::default();
    config.session.inactivity_timeout_ms = MAX_DURATION_MS;
    config.validate().expect("largest representable timeout is fine");

    config.session.inactivity_timeout_ms = i64::MAX / 1_000;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

    let mut config = VigilConfig::default();
    config.session.max_duration_ms = MAX_DURATION_MS + 1;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_missing_file_is_io_error() {
    let err = VigilConfig::from_file("/definitely/not/here/vigil.json").unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

// The only test that touches the process environment.
#[test]
fn test_env_overrides() {
    std::env::set_var("VIGIL_MAX_SLOW_FRAMES", "64");
    std::env::set_var("VIGIL_ANR_ENABLED", "false");
    let config = VigilConfig::default().with_env_overrides().expect("valid overrides");
    assert_eq!(config.frames.max_slow_frames_amount, 64);
    assert!(!config.anr.enabled);

    std::env::set_var("VIGIL_KEEP_ALIVE_MS", "soon");
    let err = VigilConfig::default().with_env_overrides().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "VIGIL_KEEP_ALIVE_MS"));

    std::env::remove_var("VIGIL_KEEP_ALIVE_MS");

    // Milliseconds that do not fit in nanoseconds
    std::env::set_var("VIGIL_FROZEN_FRAME_THRESHOLD_MS", i64::MAX.to_string());
    let err = VigilConfig::default().with_env_overrides().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "VIGIL_FROZEN_FRAME_THRESHOLD_MS"));

    for key in ["VIGIL_MAX_SLOW_FRAMES", "VIGIL_ANR_ENABLED", "VIGIL_FROZEN_FRAME_THRESHOLD_MS"] {
        std::env::remove_var(key);
    }
}
