//! Local harvester configuration (TOML).

use harvester_protocol::defaults::{
    DEFAULT_PARTITION_LINE_COUNT, DEFAULT_PREVIEW_ROWS, DEFAULT_SLEEP_SECS,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HarvestError, Result};

/// Backoff for transient registry failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Randomize each delay in `[0, computed]`.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

/// Main configuration for the harvester
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvesterConfig {
    /// Registry base URL for this harvester, e.g. `https://registry/harvesters/1/`
    pub url: String,

    pub api_key: String,

    /// Settings cache and artifact scratch space
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Applied uniformly to every registry call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Files negotiated concurrently across all monitored paths
    #[serde(default = "default_workers")]
    pub max_workers: usize,

    /// Files negotiated concurrently within one monitored path
    #[serde(default = "default_per_path_concurrency")]
    pub per_path_concurrency: usize,

    /// Used when the registry does not send `sleep_time`
    #[serde(default = "default_sleep_secs")]
    pub default_sleep_secs: u64,

    /// Rows per Parquet partition unless the monitored path overrides it
    #[serde(default = "default_partition_line_count")]
    pub partition_line_count: usize,

    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,
}

fn default_state_dir() -> PathBuf {
    harvester_logging::harvester_home().join("state")
}

fn default_request_timeout() -> u64 {
    30
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

fn default_per_path_concurrency() -> usize {
    2
}

fn default_sleep_secs() -> u64 {
    DEFAULT_SLEEP_SECS
}

fn default_partition_line_count() -> usize {
    DEFAULT_PARTITION_LINE_COUNT
}

fn default_preview_rows() -> usize {
    DEFAULT_PREVIEW_ROWS
}

impl HarvesterConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            state_dir: default_state_dir(),
            request_timeout_secs: default_request_timeout(),
            retry: RetryConfig::default(),
            max_workers: default_workers(),
            per_path_concurrency: default_per_path_concurrency(),
            default_sleep_secs: default_sleep_secs(),
            partition_line_count: default_partition_line_count(),
            preview_rows: default_preview_rows(),
        }
    }

    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarvestError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: HarvesterConfig = toml::from_str(&content)
            .map_err(|e| HarvestError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| HarvestError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(HarvestError::Config("url must not be empty".into()));
        }
        if self.api_key.trim().is_empty() {
            return Err(HarvestError::Config("api_key must not be empty".into()));
        }
        if self.max_workers == 0 || self.per_path_concurrency == 0 {
            return Err(HarvestError::Config(
                "max_workers and per_path_concurrency must be at least 1".into(),
            ));
        }
        if self.partition_line_count == 0 {
            return Err(HarvestError::Config(
                "partition_line_count must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn default_sleep(&self) -> Duration {
        Duration::from_secs(self.default_sleep_secs)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.state_dir.join("artifacts")
    }

    pub fn settings_cache_path(&self) -> PathBuf {
        self.state_dir.join("settings.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: HarvesterConfig =
            toml::from_str("url = \"http://registry/harvesters/1/\"\napi_key = \"k\"\n").unwrap();
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert!(config.retry.jitter);
        assert_eq!(config.per_path_concurrency, 2);
        assert_eq!(config.default_sleep_secs, 10);
        assert_eq!(config.partition_line_count, 100_000);
        assert_eq!(config.preview_rows, 10);
        assert!(config.max_workers > 0);
        assert!(config.state_dir.ends_with("state"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("harvester.toml");
        let mut config = HarvesterConfig::new("http://registry/", "secret").with_state_dir(dir.path());
        config.retry.max_attempts = 2;
        config.save(&path).unwrap();

        let loaded = HarvesterConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.settings_cache_path(), dir.path().join("settings.json"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("harvester.toml");
        std::fs::write(&path, "url = \"\"\napi_key = \"k\"\n").unwrap();
        assert!(matches!(
            HarvesterConfig::load(&path),
            Err(HarvestError::Config(_))
        ));
    }
}
