use std::path::{Path, PathBuf};
use std::time::Duration;

use facegate_core::liveness::NATURAL_MOTION_MIN_SAMPLES;
use facegate_core::policy::PolicyError;
use facegate_core::zone::AdmissionConfig;
use facegate_core::{FlowConfig, FlowKind, StabilityPolicy};
use serde::Deserialize;
use thiserror::Error;

use crate::store::DEFAULT_CHECK_IN_COOLDOWN_SECS;

/// Accepted range for the detection tick interval.
pub const TICK_INTERVAL_RANGE_MS: (u64, u64) = (150, 250);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read policy file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid policy file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid {flow} policy: {source}")]
    Policy {
        flow: FlowKind,
        #[source]
        source: PolicyError,
    },
    #[error("{flow} motion_capacity {capacity} is below the {min} samples natural movement needs")]
    MotionCapacity {
        flow: FlowKind,
        capacity: usize,
        min: usize,
    },
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Detection loop period, clamped to [`TICK_INTERVAL_RANGE_MS`].
    pub tick_interval: Duration,
    /// Client-side per-label suppression after an accept action.
    pub checkin_cooldown: Duration,
    /// Per-reason suppression of failure telemetry.
    pub telemetry_window: Duration,
    /// Server-side duplicate check-in window in seconds.
    pub server_cooldown_secs: u64,
    /// Recorded detection feed consumed in place of a camera.
    pub replay_path: Option<PathBuf>,
    /// Optional TOML file overriding the built-in flow policies.
    pub policy_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facegate");

        let db_path = std::env::var("FACEGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("facegate.db"));

        Self {
            db_path,
            tick_interval: clamp_tick_interval(env_u64("FACEGATE_TICK_INTERVAL_MS", 200)),
            checkin_cooldown: Duration::from_secs(env_u64("FACEGATE_CHECKIN_COOLDOWN_SECS", 10)),
            telemetry_window: Duration::from_secs(env_u64("FACEGATE_TELEMETRY_WINDOW_SECS", 10)),
            server_cooldown_secs: env_u64(
                "FACEGATE_SERVER_COOLDOWN_SECS",
                DEFAULT_CHECK_IN_COOLDOWN_SECS as u64,
            ),
            replay_path: env_path("FACEGATE_REPLAY_PATH"),
            policy_file: env_path("FACEGATE_POLICY_FILE"),
        }
    }

    /// Built-in flow configuration with this config's windows and any
    /// policy-file overrides applied.
    pub fn flow_config(&self, kind: FlowKind) -> Result<FlowConfig, ConfigError> {
        let overrides = match &self.policy_file {
            Some(path) => PolicyFile::load(path)?,
            None => PolicyFile::default(),
        };
        let mut flow = FlowConfig::for_kind(kind);
        flow.accept_cooldown = self.checkin_cooldown;
        flow.telemetry_window = self.telemetry_window;
        overrides.apply(&mut flow)?;
        Ok(flow)
    }
}

/// Per-flow overrides read from `FACEGATE_POLICY_FILE`.
///
/// ```toml
/// [checkin.policy]
/// require_liveness = true
/// tiers = [
///     { tier = "strict", below = 0.35, required_frames = 3 },
///     { tier = "normal", below = 0.5, required_frames = 8 },
/// ]
///
/// [enroll]
/// motion_capacity = 15
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyFile {
    pub checkin: Option<FlowOverride>,
    pub login: Option<FlowOverride>,
    pub enroll: Option<FlowOverride>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowOverride {
    pub policy: Option<StabilityPolicy>,
    pub admission: Option<AdmissionConfig>,
    pub motion_capacity: Option<usize>,
}

impl PolicyFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file = Self::parse(&text)?;
        tracing::info!(path = %path.display(), "policy overrides loaded");
        Ok(file)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    fn for_kind(&self, kind: FlowKind) -> Option<&FlowOverride> {
        match kind {
            FlowKind::CheckIn => self.checkin.as_ref(),
            FlowKind::Login => self.login.as_ref(),
            FlowKind::Enroll => self.enroll.as_ref(),
        }
    }

    /// Apply this file's overrides for `flow.kind` and validate the result.
    pub fn apply(&self, flow: &mut FlowConfig) -> Result<(), ConfigError> {
        if let Some(over) = self.for_kind(flow.kind) {
            if let Some(policy) = &over.policy {
                flow.policy = policy.clone();
            }
            if let Some(admission) = over.admission {
                flow.admission = admission;
            }
            if let Some(capacity) = over.motion_capacity {
                flow.motion_capacity = capacity;
            }
        }
        if flow.motion_capacity < NATURAL_MOTION_MIN_SAMPLES {
            return Err(ConfigError::MotionCapacity {
                flow: flow.kind,
                capacity: flow.motion_capacity,
                min: NATURAL_MOTION_MIN_SAMPLES,
            });
        }
        flow.policy.validate().map_err(|source| ConfigError::Policy {
            flow: flow.kind,
            source,
        })
    }
}

fn clamp_tick_interval(ms: u64) -> Duration {
    let (lo, hi) = TICK_INTERVAL_RANGE_MS;
    Duration::from_millis(ms.clamp(lo, hi))
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
