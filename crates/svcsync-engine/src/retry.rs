//! Backoff between attempts of a network call.
//!
//! [`Backoff`] is shared by the backend client ([`RetryConfig`]) and the
//! test runner, so both wait the same way between attempts.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential delay schedule: `base_ms * factor^(attempt - 1)`, capped at
/// `cap_ms`, plus up to `jitter` of the delay at random.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub factor: f64,
    /// Fraction of the delay added at random; `0.0` disables it.
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_ms: 200,
            cap_ms: 10_000,
            factor: 2.0,
            jitter: 0.25,
        }
    }
}

impl Backoff {
    #[must_use]
    pub fn new(base_ms: u64, cap_ms: u64) -> Self {
        Self {
            base_ms,
            cap_ms,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (1-based). Attempt 0 never waits.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let capped = (self.base_ms as f64 * self.factor.powi(exponent)).min(self.cap_ms as f64);

        let extra = if self.jitter > 0.0 && capped > 0.0 {
            rand::thread_rng().gen_range(0.0..=capped * self.jitter)
        } else {
            0.0
        };
        Duration::from_millis((capped + extra) as u64)
    }
}

/// Retry policy of the backend client.
///
/// Reads are retried on connection failures, timeouts and
/// `transient_statuses`; writes only on connection failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: Backoff,
    #[serde(default = "default_transient_statuses")]
    pub transient_statuses: Vec<u16>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_transient_statuses() -> Vec<u16> {
    vec![429, 502, 503, 504]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(default_max_retries())
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::default(),
            transient_statuses: default_transient_statuses(),
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0)
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_initial_backoff(mut self, ms: u64) -> Self {
        self.backoff.base_ms = ms;
        self
    }

    #[must_use]
    pub fn with_max_backoff(mut self, ms: u64) -> Self {
        self.backoff.cap_ms = ms;
        self
    }

    /// Deterministic delays, for tests.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.backoff.jitter = 0.0;
        self
    }

    #[must_use]
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    #[must_use]
    pub fn is_transient_status(&self, status: u16) -> bool {
        self.transient_statuses.contains(&status)
    }
}

/// Parse a `Retry-After` header given in seconds.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
