//! Runtime configuration for a [`ProxyRegistry`](crate::ProxyRegistry).
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration. Durations use human-readable strings (`"200ms"`, `"1s"`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::naming::NameEquality;

/// Errors from loading or validating a [`ProxyConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Name-equality rule of the underlying filesystem.
    pub name_equality: NameEquality,

    /// How many times a stream request waits before giving up.
    pub stream_retry_attempts: u32,

    /// Length of each stream request wait.
    #[serde(with = "humantime_serde")]
    pub stream_retry_interval: Duration,

    /// Capture holder backtraces so denied stream requests can name them.
    pub diagnostics: bool,

    /// Deepest folder nesting a recursive listener will follow.
    pub max_listener_depth: usize,

    /// Evict unreferenced proxies once the registry grows past this size.
    pub max_cached_nodes: Option<usize>,

    /// Nodes refreshed between cancellation checks.
    pub refresh_batch_size: usize,

    /// Upper bound on a throttled refresh pause.
    #[serde(with = "humantime_serde")]
    pub refresh_max_pause: Duration,

    /// Pause after each throttled batch as a multiple of the batch's I/O time.
    pub refresh_load_factor: f64,

    pub sentinel_prefix: String,
    pub sentinel_suffix: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            name_equality: NameEquality::platform_default(),
            stream_retry_attempts: 10,
            stream_retry_interval: Duration::from_millis(200),
            diagnostics: false,
            max_listener_depth: 64,
            max_cached_nodes: None,
            refresh_batch_size: 64,
            refresh_max_pause: Duration::from_millis(250),
            refresh_load_factor: 1.0,
            sentinel_prefix: ".LCK".to_string(),
            sentinel_suffix: "~".to_string(),
        }
    }
}

impl ProxyConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ProxyConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "refresh_batch_size must be at least 1".into(),
            ));
        }
        if self.max_listener_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_listener_depth must be at least 1".into(),
            ));
        }
        if !self.refresh_load_factor.is_finite() || self.refresh_load_factor < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "refresh_load_factor must be a non-negative number, got {}",
                self.refresh_load_factor
            )));
        }
        if self.sentinel_prefix.is_empty() {
            return Err(ConfigError::Invalid("sentinel_prefix must not be empty".into()));
        }
        if self.sentinel_prefix.contains(['/', std::path::MAIN_SEPARATOR])
            || self.sentinel_suffix.contains(['/', std::path::MAIN_SEPARATOR])
        {
            return Err(ConfigError::Invalid(
                "sentinel affixes must not contain path separators".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_name_equality(mut self, equality: NameEquality) -> Self {
        self.name_equality = equality;
        self
    }

    #[must_use]
    pub fn with_stream_retry(mut self, attempts: u32, interval: Duration) -> Self {
        self.stream_retry_attempts = attempts;
        self.stream_retry_interval = interval;
        self
    }

    #[must_use]
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    #[must_use]
    pub fn with_max_listener_depth(mut self, depth: usize) -> Self {
        self.max_listener_depth = depth;
        self
    }

    #[must_use]
    pub fn with_max_cached_nodes(mut self, limit: Option<usize>) -> Self {
        self.max_cached_nodes = limit;
        self
    }

    #[must_use]
    pub fn with_refresh_throttle(
        mut self,
        batch_size: usize,
        max_pause: Duration,
        load_factor: f64,
    ) -> Self {
        self.refresh_batch_size = batch_size;
        self.refresh_max_pause = max_pause;
        self.refresh_load_factor = load_factor;
        self
    }

    #[must_use]
    pub fn with_sentinel_affixes(
        mut self,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        self.sentinel_prefix = prefix.into();
        self.sentinel_suffix = suffix.into();
        self
    }
}
