//! Engine configuration
//!
//! Loaded from a TOML file, then overridden from the environment:
//!
//! | Variable              | Field                |
//! |-----------------------|----------------------|
//! | `SVCSYNC_BACKEND_URL` | `backend.base_url`   |
//! | `SVCSYNC_API_KEY`     | `backend.api_key`    |
//! | `SVCSYNC_CACHE_PATH`  | `cache_path`         |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::retry::{Backoff, RetryConfig};

pub const ENV_BACKEND_URL: &str = "SVCSYNC_BACKEND_URL";
pub const ENV_API_KEY: &str = "SVCSYNC_API_KEY";
pub const ENV_CACHE_PATH: &str = "SVCSYNC_CACHE_PATH";

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Location of the durable test cache file.
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from(".svcsync/test-cache.json")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
            runner: RunnerConfig::default(),
            cache_path: default_cache_path(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
            .map_err(|e| EngineError::Config(format!("Failed to parse {}: {e}", path.display())))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply `SVCSYNC_*` overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply `SVCSYNC_*` overrides through an explicit lookup.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(ENV_BACKEND_URL).filter(|v| !v.is_empty()) {
            self.backend.base_url = url;
        }
        if let Some(key) = lookup(ENV_API_KEY).filter(|v| !v.is_empty()) {
            self.backend.api_key = Some(key);
        }
        if let Some(path) = lookup(ENV_CACHE_PATH).filter(|v| !v.is_empty()) {
            self.cache_path = PathBuf::from(path);
        }
        self
    }

    #[must_use]
    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    #[must_use]
    pub fn with_runner(mut self, runner: RunnerConfig) -> Self {
        self.runner = runner;
        self
    }

    #[must_use]
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    #[must_use]
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = path.into();
        self
    }

    /// Check values that would otherwise fail deep inside a run.
    pub fn validate(&self) -> EngineResult<()> {
        let url = &self.backend.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(EngineError::Config(format!(
                "backend.base_url must be an http(s) URL, got '{url}'"
            )));
        }
        if self.backend.timeout_secs == 0 {
            return Err(EngineError::Config(
                "backend.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.backend.page_size == 0 {
            return Err(EngineError::Config(
                "backend.page_size must be greater than zero".to_string(),
            ));
        }
        if self.runner.workers == 0 {
            return Err(EngineError::Config(
                "runner.workers must be greater than zero".to_string(),
            ));
        }
        if self.poll.multiplier < 1.0 {
            return Err(EngineError::Config(
                "poll.multiplier must be at least 1.0".to_string(),
            ));
        }
        let poll = &self.poll;
        if poll.initial_interval_ms == 0 || poll.max_interval_ms < poll.initial_interval_ms {
            return Err(EngineError::Config(
                "poll intervals must be non-zero with max_interval_ms >= initial_interval_ms"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection settings for the catalog backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-request timeout (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Page size for list calls (default: 100).
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_base_url() -> String {
    "http://localhost:8000/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    100
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
        }
    }
}

impl BackendConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Async task polling schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay before the first status poll (default: 1000).
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    /// Upper bound for the delay between polls (default: 15000).
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Growth factor between polls (default: 1.5).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Total wall-clock budget before the task is reported timed out (default: 600000).
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Consecutive transient poll failures tolerated (default: 3).
    #[serde(default = "default_max_transient_failures")]
    pub max_transient_failures: u32,
}

fn default_initial_interval_ms() -> u64 {
    1000
}

fn default_max_interval_ms() -> u64 {
    15_000
}

fn default_multiplier() -> f64 {
    1.5
}

fn default_max_wait_ms() -> u64 {
    600_000
}

fn default_max_transient_failures() -> u32 {
    3
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            multiplier: default_multiplier(),
            max_wait_ms: default_max_wait_ms(),
            max_transient_failures: default_max_transient_failures(),
        }
    }
}

impl PollConfig {
    /// Fixed-interval schedule with the given total budget.
    #[must_use]
    pub fn fixed(interval_ms: u64, max_wait_ms: u64) -> Self {
        Self {
            initial_interval_ms: interval_ms,
            max_interval_ms: interval_ms,
            multiplier: 1.0,
            max_wait_ms,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_max_wait(mut self, ms: u64) -> Self {
        self.max_wait_ms = ms;
        self
    }

    #[must_use]
    pub fn with_max_transient_failures(mut self, count: u32) -> Self {
        self.max_transient_failures = count;
        self
    }

    /// Delay before poll number `poll` (zero-based).
    #[must_use]
    pub fn interval(&self, poll: u32) -> Duration {
        let base = self.initial_interval_ms as f64 * self.multiplier.powi(poll as i32);
        Duration::from_millis(base.min(self.max_interval_ms as f64) as u64)
    }

    #[must_use]
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// Test runner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Concurrent offering groups (default: 4).
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Timeout for one example execution (default: 30).
    #[serde(default = "default_example_timeout_secs")]
    pub example_timeout_secs: u64,
    #[serde(default)]
    pub fail_fast: bool,
    /// Ignore cached results and skip flags.
    #[serde(default)]
    pub force: bool,
    /// Retries of an execution that failed in transit (default: 2).
    #[serde(default = "default_example_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: Backoff,
}

fn default_workers() -> usize {
    4
}

fn default_example_timeout_secs() -> u64 {
    30
}

fn default_example_retries() -> u32 {
    2
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            example_timeout_secs: default_example_timeout_secs(),
            fail_fast: false,
            force: false,
            max_retries: default_example_retries(),
            backoff: Backoff::default(),
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, backoff: Backoff) -> Self {
        self.max_retries = max_retries;
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn example_timeout(&self) -> Duration {
        Duration::from_secs(self.example_timeout_secs)
    }
}
