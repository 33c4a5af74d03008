//! Global configuration parsing, validation, and derived durations.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// SLA enforcement thresholds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SlaConfig {
    /// Wall-clock minutes between assignment and the completion deadline.
    #[serde(default = "default_sla_minutes")]
    pub minutes: u32,
    /// Minutes-remaining marks at which pre-warnings fire.
    #[serde(default = "default_warning_marks")]
    pub warning_marks: Vec<u32>,
    /// Requeue cap; a queued task past this many retries is abandoned.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Nth missed deadline that promotes accumulated warnings to a violation.
    #[serde(default = "default_warnings_before_violation")]
    pub warnings_before_violation: u32,
    /// Violation count at which the reviewer account is suspended.
    #[serde(default = "default_violations_before_suspension")]
    pub violations_before_suspension: u32,
}

fn default_sla_minutes() -> u32 {
    20
}

fn default_warning_marks() -> Vec<u32> {
    vec![5, 3, 1]
}

fn default_max_retries() -> u32 {
    3
}

fn default_warnings_before_violation() -> u32 {
    3
}

fn default_violations_before_suspension() -> u32 {
    3
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            minutes: default_sla_minutes(),
            warning_marks: default_warning_marks(),
            max_retries: default_max_retries(),
            warnings_before_violation: default_warnings_before_violation(),
            violations_before_suspension: default_violations_before_suspension(),
        }
    }
}

/// Reviewer presence liveness settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PresenceConfig {
    /// Seconds without a heartbeat before a reviewer is considered gone.
    #[serde(default = "default_presence_ttl_seconds")]
    pub ttl_seconds: u64,
}

fn default_presence_ttl_seconds() -> u64 {
    90
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_presence_ttl_seconds(),
        }
    }
}

/// Tick intervals for the background loops.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimerConfig {
    /// Seconds between assigner passes (it also wakes on bus events).
    #[serde(default = "default_assign_tick_seconds")]
    pub assign_tick_seconds: u64,
    /// Seconds between deadline monitor sweeps.
    #[serde(default = "default_deadline_tick_seconds")]
    pub deadline_tick_seconds: u64,
    /// Ceiling for exponential backoff after transient loop failures.
    #[serde(default = "default_backoff_cap_seconds")]
    pub backoff_cap_seconds: u64,
}

fn default_assign_tick_seconds() -> u64 {
    5
}

fn default_deadline_tick_seconds() -> u64 {
    60
}

fn default_backoff_cap_seconds() -> u64 {
    10
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            assign_tick_seconds: default_assign_tick_seconds(),
            deadline_tick_seconds: default_deadline_tick_seconds(),
            backoff_cap_seconds: default_backoff_cap_seconds(),
        }
    }
}

fn default_score_threshold() -> f64 {
    0.90
}

fn default_retention_days() -> u32 {
    30
}

fn default_ipc_name() -> String {
    "spark-dispatch".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding the task store database.
    pub data_dir: PathBuf,
    /// Named pipe / Unix socket identifier for the admin IPC server.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// ATS scores strictly below this enter the human review queue;
    /// scores at or above it bypass the core entirely.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
    /// Days before terminal tasks and old incidents are purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// SLA thresholds.
    #[serde(default)]
    pub sla: SlaConfig,
    /// Presence liveness settings.
    #[serde(default)]
    pub presence: PresenceConfig,
    /// Background loop intervals.
    #[serde(default)]
    pub timers: TimerConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the `SQLite` database file inside `data_dir`.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("spark-dispatch.db")
    }

    /// The task completion deadline window.
    #[must_use]
    pub fn sla_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.sla.minutes))
    }

    /// Heartbeat freshness window.
    #[must_use]
    pub fn presence_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.presence.ttl_seconds).unwrap_or(i64::MAX))
    }

    /// Interval between assigner passes.
    #[must_use]
    pub fn assign_tick(&self) -> Duration {
        Duration::from_secs(self.timers.assign_tick_seconds)
    }

    /// Interval between deadline monitor sweeps.
    #[must_use]
    pub fn deadline_tick(&self) -> Duration {
        Duration::from_secs(self.timers.deadline_tick_seconds)
    }

    /// How long an emitted `(task, minute)` warning key is remembered.
    /// Twice the sweep interval so a mark can never fire on two sweeps.
    #[must_use]
    pub fn warning_ledger_ttl(&self) -> Duration {
        Duration::from_secs(self.timers.deadline_tick_seconds * 2)
    }

    /// Ceiling for transient-failure backoff in the background loops.
    #[must_use]
    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.timers.backoff_cap_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(AppError::Config("data_dir must not be empty".into()));
        }

        if !(self.score_threshold > 0.0 && self.score_threshold <= 1.0) {
            return Err(AppError::Config(
                "score_threshold must be within (0, 1]".into(),
            ));
        }

        if self.sla.minutes == 0 {
            return Err(AppError::Config("sla.minutes must be at least 1".into()));
        }

        if let Some(mark) = self
            .sla
            .warning_marks
            .iter()
            .find(|m| **m == 0 || **m >= self.sla.minutes)
        {
            return Err(AppError::Config(format!(
                "sla.warning_marks entry {mark} must be within 1..sla.minutes"
            )));
        }

        if self.sla.warnings_before_violation == 0 || self.sla.violations_before_suspension == 0 {
            return Err(AppError::Config(
                "sla strike thresholds must be at least 1".into(),
            ));
        }

        if self.presence.ttl_seconds == 0 {
            return Err(AppError::Config(
                "presence.ttl_seconds must be at least 1".into(),
            ));
        }

        if self.timers.assign_tick_seconds == 0 || self.timers.deadline_tick_seconds == 0 {
            return Err(AppError::Config(
                "timer intervals must be at least 1 second".into(),
            ));
        }

        Ok(())
    }
}
