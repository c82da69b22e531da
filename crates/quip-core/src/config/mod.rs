//! Runtime tuning for the sync engine.
//!
//! Defaults match the documented behavior (30 second polling, five attempts,
//! exponential backoff from two seconds). Every value can be overridden from
//! the environment.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::util::normalize_text_option;

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 2;
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;
pub const DEFAULT_FULL_RESYNC_SECS: u64 = 3600;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Sync engine settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Polling interval while online and in the foreground
    pub sync_interval: Duration,
    /// Attempts before an operation is reported as failed
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles per attempt
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// How often a full (non-incremental) fetch replaces the cache
    pub full_resync_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: Duration::from_secs(DEFAULT_BACKOFF_BASE_SECS),
            backoff_max: Duration::from_secs(DEFAULT_BACKOFF_MAX_SECS),
            full_resync_interval: Duration::from_secs(DEFAULT_FULL_RESYNC_SECS),
            request_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl SyncSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let sync_interval = secs_or(&lookup, "QUIP_SYNC_INTERVAL_SECS", defaults.sync_interval, 1)?;
        let max_attempts = match normalize_text_option(lookup("QUIP_SYNC_MAX_ATTEMPTS")) {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|value| *value >= 1)
                .ok_or_else(|| {
                    ConfigError::Invalid("QUIP_SYNC_MAX_ATTEMPTS must be an integer >= 1".into())
                })?,
            None => defaults.max_attempts,
        };
        let backoff_base =
            secs_or(&lookup, "QUIP_SYNC_BACKOFF_BASE_SECS", defaults.backoff_base, 0)?;
        let backoff_max = secs_or(&lookup, "QUIP_SYNC_BACKOFF_MAX_SECS", defaults.backoff_max, 0)?;
        if backoff_max < backoff_base {
            return Err(ConfigError::Invalid(
                "QUIP_SYNC_BACKOFF_MAX_SECS must be >= QUIP_SYNC_BACKOFF_BASE_SECS".to_string(),
            ));
        }
        let full_resync_interval = secs_or(
            &lookup,
            "QUIP_FULL_RESYNC_SECS",
            defaults.full_resync_interval,
            60,
        )?;
        let request_timeout =
            secs_or(&lookup, "QUIP_HTTP_TIMEOUT_SECS", defaults.request_timeout, 1)?;

        Ok(Self {
            sync_interval,
            max_attempts,
            backoff_base,
            backoff_max,
            full_resync_interval,
            request_timeout,
        })
    }

    /// Delay before the next attempt after `attempts` failures
    #[must_use]
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1_u32 << exponent)
            .min(self.backoff_max)
    }
}

fn secs_or(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
    min: u64,
) -> Result<Duration, ConfigError> {
    let Some(raw) = normalize_text_option(lookup(name)) else {
        return Ok(default);
    };
    raw.parse::<u64>()
        .ok()
        .filter(|value| *value >= min)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::Invalid(format!("{name} must be an integer >= {min}")))
}
