//! Engine configuration.
//!
//! Loaded from `TORQUE_*` environment variables on top of defaults. Invalid
//! values fail fast with a `ConfigError` naming the variable.

use std::time::Duration;

use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use torque_scheduling::BusinessHours;

use crate::command_dispatcher::DEFAULT_DISPATCH_ATTEMPTS;

pub const ENV_BIND_ADDR: &str = "TORQUE_BIND_ADDR";
pub const ENV_OPEN: &str = "TORQUE_OPEN";
pub const ENV_CLOSE: &str = "TORQUE_CLOSE";
pub const ENV_SLOT_MINUTES: &str = "TORQUE_SLOT_MINUTES";
pub const ENV_UTC_OFFSET_MINUTES: &str = "TORQUE_UTC_OFFSET_MINUTES";
pub const ENV_RELAY_RETRY_ATTEMPTS: &str = "TORQUE_RELAY_RETRY_ATTEMPTS";
pub const ENV_RELAY_RETRY_BACKOFF_MS: &str = "TORQUE_RELAY_RETRY_BACKOFF_MS";
pub const ENV_DISPATCH_ATTEMPTS: &str = "TORQUE_DISPATCH_ATTEMPTS";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Retry policy for relay handlers hitting a not-yet-materialized record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRetry {
    /// Total attempts per message, including the first one.
    pub attempts: u32,
    /// Base delay; attempt `n` waits `n * backoff_ms`.
    pub backoff_ms: u64,
}

impl RelayRetry {
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

impl Default for RelayRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub bind_addr: String,
    pub business_hours: BusinessHours,
    /// Offset of the workshop's local time from UTC; appointment dates and
    /// times are local.
    pub utc_offset_minutes: i32,
    pub relay_retry: RelayRetry,
    pub dispatch_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            business_hours: BusinessHours {
                open: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
                close: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
                slot_minutes: 30,
            },
            utc_offset_minutes: 0,
            relay_retry: RelayRetry::default(),
            dispatch_attempts: DEFAULT_DISPATCH_ATTEMPTS,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (environment, test map...).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = lookup(ENV_BIND_ADDR) {
            if addr.trim().is_empty() {
                return Err(ConfigError::invalid(ENV_BIND_ADDR, &addr, "must not be empty"));
            }
            config.bind_addr = addr;
        }

        let open = match lookup(ENV_OPEN) {
            Some(v) => parse_time(ENV_OPEN, &v)?,
            None => config.business_hours.open,
        };
        let close = match lookup(ENV_CLOSE) {
            Some(v) => parse_time(ENV_CLOSE, &v)?,
            None => config.business_hours.close,
        };
        let slot_minutes = match lookup(ENV_SLOT_MINUTES) {
            Some(v) => parse_number::<u32>(ENV_SLOT_MINUTES, &v)?,
            None => config.business_hours.slot_minutes,
        };
        config.business_hours = BusinessHours::new(open, close, slot_minutes).map_err(|e| {
            ConfigError::invalid(ENV_SLOT_MINUTES, &format!("{open}-{close}/{slot_minutes}"), e.to_string())
        })?;

        if let Some(v) = lookup(ENV_UTC_OFFSET_MINUTES) {
            let minutes = parse_number::<i32>(ENV_UTC_OFFSET_MINUTES, &v)?;
            if FixedOffset::east_opt(minutes.saturating_mul(60)).is_none() {
                return Err(ConfigError::invalid(ENV_UTC_OFFSET_MINUTES, &v, "offset out of range"));
            }
            config.utc_offset_minutes = minutes;
        }

        if let Some(v) = lookup(ENV_RELAY_RETRY_ATTEMPTS) {
            config.relay_retry.attempts = positive(ENV_RELAY_RETRY_ATTEMPTS, &v)?;
        }
        if let Some(v) = lookup(ENV_RELAY_RETRY_BACKOFF_MS) {
            config.relay_retry.backoff_ms = parse_number::<u64>(ENV_RELAY_RETRY_BACKOFF_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_DISPATCH_ATTEMPTS) {
            config.dispatch_attempts = positive(ENV_DISPATCH_ATTEMPTS, &v)?;
        }

        Ok(config)
    }

    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix())
    }
}

fn parse_time(key: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|e| ConfigError::invalid(key, value, e.to_string()))
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::invalid(key, value, e.to_string()))
}

fn positive(key: &'static str, value: &str) -> Result<u32, ConfigError> {
    match parse_number::<u32>(key, value)? {
        0 => Err(ConfigError::invalid(key, value, "must be at least 1")),
        n => Ok(n),
    }
}
