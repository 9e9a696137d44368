//! Runtime configuration for the telemetry core.
//!
//! Every knob has a default matching what mobile SDKs ship with. A config can be
//! loaded from JSON (missing keys fall back to defaults) and then overridden from
//! `VIGIL_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const NANOS_PER_MS: i64 = 1_000_000;

/// Largest millisecond value that still fits in i64 nanoseconds.
pub const MAX_DURATION_MS: i64 = i64::MAX / NANOS_PER_MS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidEnv { key: String, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub frames: FrameConfig,
    pub anr: AnrConfig,
    pub call_rate: CallRateConfig,
    pub dispatcher: DispatcherConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Max gap between two jank frames for them to be merged into one interval.
    pub continuous_slow_frame_threshold_nanos: i64,
    /// A single jank frame at or above this is frozen, not slow.
    pub frozen_frame_threshold_nanos: i64,
    /// Per view cap on stored slow frame intervals.
    pub max_slow_frames_amount: usize,
    /// Long tasks at or above this count towards the ANR ratio.
    pub anr_duration_threshold_nanos: i64,
    /// Views living less than this report 0.0 ratios.
    pub min_view_lifetime_threshold_nanos: i64,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            continuous_slow_frame_threshold_nanos: 16_666_666,
            frozen_frame_threshold_nanos: 700 * NANOS_PER_MS,
            max_slow_frames_amount: 512,
            anr_duration_threshold_nanos: 5_000 * NANOS_PER_MS,
            min_view_lifetime_threshold_nanos: 1_000 * NANOS_PER_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnrConfig {
    pub enabled: bool,
    /// Cooldown between a resolved probe and the next one.
    pub probe_interval_ms: u64,
    /// How long a probe may stay unserviced before the thread counts as hung.
    pub hang_threshold_ms: u64,
}

impl Default for AnrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_interval_ms: 500,
            hang_threshold_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallRateConfig {
    pub time_period_ms: i64,
    pub max_calls_threshold: i32,
}

impl Default for CallRateConfig {
    fn default() -> Self {
        Self {
            time_period_ms: 1_000,
            max_calls_threshold: 100,
        }
    }
}

/// What happens to events still queued when the dispatcher shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainPolicy {
    #[default]
    ExecutePending,
    DiscardPending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Idle time after which a keep-alive event is applied.
    pub keep_alive_interval_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub drain_policy: DrainPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval_ms: 300_000,
            shutdown_timeout_ms: 3_000,
            drain_policy: DrainPolicy::ExecutePending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub inactivity_timeout_ms: i64,
    pub max_duration_ms: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: 15 * 60 * 1_000,
            max_duration_ms: 4 * 60 * 60 * 1_000,
        }
    }
}

impl VigilConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: VigilConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Applies `VIGIL_*` overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(v) = env_parse::<i64>("VIGIL_FROZEN_FRAME_THRESHOLD_MS")? {
            self.frames.frozen_frame_threshold_nanos =
                v.checked_mul(NANOS_PER_MS).ok_or_else(|| ConfigError::InvalidEnv {
                    key: "VIGIL_FROZEN_FRAME_THRESHOLD_MS".to_string(),
                    value: v.to_string(),
                })?;
        }
        if let Some(v) = env_parse::<usize>("VIGIL_MAX_SLOW_FRAMES")? {
            self.frames.max_slow_frames_amount = v;
        }
        if let Some(v) = env_parse::<bool>("VIGIL_ANR_ENABLED")? {
            self.anr.enabled = v;
        }
        if let Some(v) = env_parse::<u64>("VIGIL_ANR_HANG_THRESHOLD_MS")? {
            self.anr.hang_threshold_ms = v;
        }
        if let Some(v) = env_parse::<u64>("VIGIL_ANR_PROBE_INTERVAL_MS")? {
            self.anr.probe_interval_ms = v;
        }
        if let Some(v) = env_parse::<i32>("VIGIL_MAX_CALLS_THRESHOLD")? {
            self.call_rate.max_calls_threshold = v;
        }
        if let Some(v) = env_parse::<u64>("VIGIL_KEEP_ALIVE_MS")? {
            self.dispatcher.keep_alive_interval_ms = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let f = &self.frames;
        if f.continuous_slow_frame_threshold_nanos < 0 {
            return Err(ConfigError::Invalid("continuous_slow_frame_threshold_nanos must be >= 0".into()));
        }
        if f.frozen_frame_threshold_nanos <= 1 {
            return Err(ConfigError::Invalid("frozen_frame_threshold_nanos must be > 1".into()));
        }
        if f.max_slow_frames_amount == 0 {
            return Err(ConfigError::Invalid("max_slow_frames_amount must be > 0".into()));
        }
        if f.anr_duration_threshold_nanos <= 0 || f.min_view_lifetime_threshold_nanos < 0 {
            return Err(ConfigError::Invalid("ANR thresholds must be positive".into()));
        }
        if self.anr.hang_threshold_ms == 0 {
            return Err(ConfigError::Invalid("anr.hang_threshold_ms must be > 0".into()));
        }
        if self.call_rate.time_period_ms <= 0 || self.call_rate.max_calls_threshold < 0 {
            return Err(ConfigError::Invalid("call_rate window and threshold must be positive".into()));
        }
        if self.dispatcher.keep_alive_interval_ms == 0 {
            return Err(ConfigError::Invalid("dispatcher.keep_alive_interval_ms must be > 0".into()));
        }
        if self.session.inactivity_timeout_ms <= 0 || self.session.max_duration_ms <= 0 {
            return Err(ConfigError::Invalid("session timeouts must be positive".into()));
        }
        if self.session.inactivity_timeout_ms > MAX_DURATION_MS || self.session.max_duration_ms > MAX_DURATION_MS {
            return Err(ConfigError::Invalid(format!("session timeouts must be at most {}ms", MAX_DURATION_MS)));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key: key.to_string(), value }),
        Err(_) => Ok(None),
    }
}
