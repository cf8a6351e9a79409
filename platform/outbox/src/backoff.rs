//! Exponential backoff with jitter
//!
//! ```text
//! attempts   capped delay (base=5s, max=300s)   with ±10% jitter
//! ─────────────────────────────────────────────────────────────
//!    1              5s                            4.5s - 5.5s
//!    2             10s                              9s - 11s
//!    3             20s                             18s - 22s
//!    6            160s                            144s - 176s
//!    7+           300s                            270s - 330s
//! ```
//!
//! Results are whole seconds, never below 1 and never above
//! `max * (1 + jitter)`. Both base and cap are held at or below
//! [`MAX_BACKOFF_SECS`].

use chrono::Duration;
use rand::Rng;

use crate::config::BackoffConfig;

/// Exponent ceiling; `base * 2^20` already dwarfs any sane cap
const MAX_EXPONENT: u32 = 20;

/// Largest accepted base or cap, about 68 years
pub const MAX_BACKOFF_SECS: u64 = i32::MAX as u64;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    base_secs: f64,
    max_secs: f64,
    jitter_rate: f64,
}

impl BackoffPolicy {
    /// Out-of-range inputs are clamped: 1 ≤ base ≤ max ≤ [`MAX_BACKOFF_SECS`], jitter ≥ 0
    pub fn new(base_secs: u64, max_secs: u64, jitter_rate: f64) -> Self {
        let base = base_secs.clamp(1, MAX_BACKOFF_SECS) as f64;
        let jitter = if jitter_rate.is_finite() {
            jitter_rate.max(0.0)
        } else {
            0.0
        };
        Self {
            base_secs: base,
            max_secs: (max_secs.min(MAX_BACKOFF_SECS) as f64).max(base),
            jitter_rate: jitter,
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.base_secs, config.max_secs, config.jitter_rate)
    }

    /// Delay before jitter for the given failed-attempt count
    pub fn capped_secs(&self, attempts: i32) -> f64 {
        let exp = (attempts.max(1) as u32 - 1).min(MAX_EXPONENT);
        let raw = self.base_secs * f64::from(1u32 << exp);
        raw.min(self.max_secs)
    }

    pub fn upper_bound_secs(&self) -> f64 {
        self.max_secs * (1.0 + self.jitter_rate)
    }

    pub fn delay_secs(&self, attempts: i32) -> i64 {
        self.delay_secs_with(&mut rand::thread_rng(), attempts)
    }

    pub fn delay_secs_with<R: Rng + ?Sized>(&self, rng: &mut R, attempts: i32) -> i64 {
        let capped = self.capped_secs(attempts);
        let delta = capped * self.jitter_rate;
        let low = (capped - delta).max(1.0);
        let high = capped + delta;

        let sampled = if high > low {
            rng.gen_range(low..=high)
        } else {
            low
        };

        // Rounding may step past `high`; keep the documented bound.
        (sampled.round() as i64).clamp(1, high.floor().max(1.0) as i64)
    }

    pub fn delay(&self, attempts: i32) -> Duration {
        Duration::try_seconds(self.delay_secs(attempts)).unwrap_or(Duration::MAX)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}
