//! Outbox configuration
//!
//! All settings have defaults; `from_env` overrides them from `OUTBOX_*`
//! variables and validates the result.

use event_bus::ProducerInfo;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::backoff::MAX_BACKOFF_SECS;
use crate::error::{OutboxError, OutboxResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_secs: u64,
    pub max_secs: u64,
    /// Fraction of the capped delay used as ± jitter (0.1 = ±10%)
    pub jitter_rate: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_secs: 5,
            max_secs: 300,
            jitter_rate: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    pub enabled: bool,
    pub kafka_suffix: String,
    pub rabbit_suffix: String,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            kafka_suffix: ".DLQ".to_string(),
            rabbit_suffix: ".dlq".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// When false the processor loop exits immediately
    pub enabled: bool,
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    pub max_attempts: i32,
    pub backoff: BackoffConfig,
    pub dead_letter: DeadLetterConfig,
    /// Upper bound for a single producer call; unbounded when unset
    pub send_timeout_ms: Option<u64>,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 100,
            poll_interval_ms: 1000,
            max_attempts: 5,
            backoff: BackoffConfig::default(),
            dead_letter: DeadLetterConfig::default(),
            send_timeout_ms: None,
        }
    }
}

impl OutboxConfig {
    pub fn from_env() -> OutboxResult<Self> {
        let defaults = Self::default();

        let config = Self {
            enabled: env_or("OUTBOX_ENABLED", defaults.enabled)?,
            batch_size: env_or("OUTBOX_BATCH_SIZE", defaults.batch_size)?,
            poll_interval_ms: env_or("OUTBOX_POLL_INTERVAL_MS", defaults.poll_interval_ms)?,
            max_attempts: env_or("OUTBOX_MAX_ATTEMPTS", defaults.max_attempts)?,
            backoff: BackoffConfig {
                base_secs: env_or("OUTBOX_BACKOFF_BASE_SECS", defaults.backoff.base_secs)?,
                max_secs: env_or("OUTBOX_BACKOFF_MAX_SECS", defaults.backoff.max_secs)?,
                jitter_rate: env_or("OUTBOX_BACKOFF_JITTER_RATE", defaults.backoff.jitter_rate)?,
            },
            dead_letter: DeadLetterConfig {
                enabled: env_or("OUTBOX_DLQ_ENABLED", defaults.dead_letter.enabled)?,
                kafka_suffix: env::var("OUTBOX_DLQ_KAFKA_SUFFIX")
                    .unwrap_or(defaults.dead_letter.kafka_suffix),
                rabbit_suffix: env::var("OUTBOX_DLQ_RABBIT_SUFFIX")
                    .unwrap_or(defaults.dead_letter.rabbit_suffix),
            },
            send_timeout_ms: match env::var("OUTBOX_SEND_TIMEOUT_MS") {
                Ok(v) if !v.trim().is_empty() => Some(parse_var("OUTBOX_SEND_TIMEOUT_MS", &v)?),
                _ => None,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> OutboxResult<()> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be at least 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms must be at least 1"));
        }
        if self.max_attempts < 1 {
            return Err(invalid("max_attempts must be at least 1"));
        }
        if self.backoff.base_secs == 0 {
            return Err(invalid("backoff.base_secs must be at least 1"));
        }
        if self.backoff.max_secs < self.backoff.base_secs {
            return Err(invalid("backoff.max_secs must not be below backoff.base_secs"));
        }
        if self.backoff.max_secs > MAX_BACKOFF_SECS {
            return Err(OutboxError::Config(format!(
                "backoff.max_secs must not exceed {MAX_BACKOFF_SECS}"
            )));
        }
        if !self.backoff.jitter_rate.is_finite() || !(0.0..=1.0).contains(&self.backoff.jitter_rate)
        {
            return Err(invalid("backoff.jitter_rate must be within [0, 1]"));
        }
        if self.dead_letter.enabled
            && (self.dead_letter.kafka_suffix.is_empty() || self.dead_letter.rabbit_suffix.is_empty())
        {
            return Err(invalid("dead-letter suffixes must not be empty when dead-lettering is enabled"));
        }
        if self.send_timeout_ms == Some(0) {
            return Err(invalid("send_timeout_ms must be at least 1 when set"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout_ms.map(Duration::from_millis)
    }
}

/// Producer descriptor stamped on every envelope
///
/// `SERVICE_NAME`, `HOSTNAME` and `APP_ENV`, falling back to `unknown`,
/// `unknown` and `local`.
pub fn producer_info_from_env() -> ProducerInfo {
    let var = |name: &str, fallback: &str| {
        env::var(name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| fallback.to_string())
    };
    ProducerInfo::new(
        var("SERVICE_NAME", "unknown"),
        var("HOSTNAME", "unknown"),
        var("APP_ENV", "local"),
    )
}

fn invalid(msg: &str) -> OutboxError {
    OutboxError::Config(msg.to_string())
}

fn env_or<T: FromStr>(name: &str, default: T) -> OutboxResult<T> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => parse_var(name, &v),
        _ => Ok(default),
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> OutboxResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| OutboxError::Config(format!("{name} has invalid value {value:?}")))
}
