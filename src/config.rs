//! Control-plane configuration.
//!
//! All tunable parameters for the activation engine and scheduler.
//! Defaults match the deployed single-motor setup; every field can be
//! overridden from the environment (or a `.env` file) at startup.

use core::time::Duration;
use std::env;

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;
use crate::error::Result;
use crate::topics;

/// Longest accepted accounting window: one year.
pub const MAX_QUOTA_WINDOW_SECS: u64 = 366 * 24 * 60 * 60;
/// Longest accepted ack wait: one hour.
pub const MAX_ACK_TIMEOUT_MS: u64 = 60 * 60 * 1000;
/// Longest accepted idle scheduler sleep: one day.
pub const MAX_SCHEDULER_POLL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    // --- Quota ---
    /// Total ON time allowed per accounting window (seconds).
    pub daily_quota_secs: u64,
    /// Length of the accounting window (seconds).
    pub quota_window_secs: u64,

    // --- Handshake ---
    /// How long to wait for a device ack after publishing "on" (milliseconds).
    pub ack_timeout_ms: u64,

    // --- Scheduler ---
    /// Upper bound on an idle scheduler sleep (seconds).
    pub scheduler_poll_secs: u64,

    // --- Bus ---
    pub control_topic: String,
    pub command_qos: u8,
    pub retain_commands: bool,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            daily_quota_secs: 60 * 60,
            quota_window_secs: 24 * 60 * 60,
            ack_timeout_ms: 10_000,
            scheduler_poll_secs: 60,
            control_topic: topics::CONTROL.to_owned(),
            command_qos: 2,
            retain_commands: true,
        }
    }
}

impl ControlPlaneConfig {
    /// Defaults overridden by environment variables.  A `.env` file in the
    /// working directory is loaded first when present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut cfg = Self::default();
        if let Some(v) = env_parsed::<u64>("DAILY_QUOTA_SECS")? {
            cfg.daily_quota_secs = v;
        }
        if let Some(v) = env_parsed::<u64>("QUOTA_WINDOW_SECS")? {
            cfg.quota_window_secs = v;
        }
        if let Some(v) = env_parsed::<u64>("ACK_TIMEOUT_MS")? {
            cfg.ack_timeout_ms = v;
        }
        if let Some(v) = env_parsed::<u64>("SCHEDULER_POLL_SECS")? {
            cfg.scheduler_poll_secs = v;
        }
        if let Ok(topic) = env::var("CONTROL_TOPIC") {
            cfg.control_topic = topic;
        }
        if let Some(v) = env_parsed::<u8>("COMMAND_QOS")? {
            cfg.command_qos = v;
        }
        if let Ok(raw) = env::var("RETAIN_COMMANDS") {
            cfg.retain_commands = parse_bool(&raw).ok_or(ConfigError::Malformed {
                key: "RETAIN_COMMANDS",
                value: raw.clone(),
            })?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Range-check every field.  Invalid values are rejected, not clamped.
    pub fn validate(&self) -> core::result::Result<(), ConfigError> {
        if self.daily_quota_secs == 0 {
            return Err(ConfigError::ValidationFailed("daily_quota_secs must be > 0"));
        }
        if self.quota_window_secs == 0 {
            return Err(ConfigError::ValidationFailed("quota_window_secs must be > 0"));
        }
        if self.quota_window_secs > MAX_QUOTA_WINDOW_SECS {
            return Err(ConfigError::ValidationFailed(
                "quota_window_secs must not exceed one year",
            ));
        }
        if self.daily_quota_secs > self.quota_window_secs {
            return Err(ConfigError::ValidationFailed(
                "daily_quota_secs must not exceed quota_window_secs",
            ));
        }
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("ack_timeout_ms must be > 0"));
        }
        if self.ack_timeout_ms > MAX_ACK_TIMEOUT_MS {
            return Err(ConfigError::ValidationFailed("ack_timeout_ms must not exceed one hour"));
        }
        if self.scheduler_poll_secs == 0 {
            return Err(ConfigError::ValidationFailed("scheduler_poll_secs must be > 0"));
        }
        if self.scheduler_poll_secs > MAX_SCHEDULER_POLL_SECS {
            return Err(ConfigError::ValidationFailed(
                "scheduler_poll_secs must not exceed one day",
            ));
        }
        if self.command_qos > 2 {
            return Err(ConfigError::ValidationFailed("command_qos must be 0, 1 or 2"));
        }
        if self.control_topic.trim().is_empty() {
            return Err(ConfigError::ValidationFailed("control_topic must not be empty"));
        }
        Ok(())
    }

    pub fn daily_quota(&self) -> Duration {
        Duration::from_secs(self.daily_quota_secs)
    }

    pub fn quota_window(&self) -> Duration {
        Duration::from_secs(self.quota_window_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn scheduler_poll(&self) -> Duration {
        Duration::from_secs(self.scheduler_poll_secs)
    }
}

fn env_parsed<T: core::str::FromStr>(key: &'static str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => {
            let value = raw.trim().parse::<T>().map_err(|_| ConfigError::Malformed {
                key,
                value: raw.clone(),
            })?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}

/// Accepts true/false, 1/0, yes/no (case-insensitive).
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
