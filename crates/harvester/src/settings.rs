//! Registry-supplied settings: the per-cycle snapshot and its on-disk cache.

use chrono::{DateTime, Utc};
use harvester_protocol::{HarvesterSettings, MonitoredPath};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{HarvestError, Result};

/// Settings in effect for one cycle. Replaced wholesale at the refresh
/// point, never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct RuntimeSettings {
    pub remote: HarvesterSettings,
    /// When the registry last answered. `None` for cached or empty settings.
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl RuntimeSettings {
    pub fn fresh(remote: HarvesterSettings) -> Self {
        Self {
            remote,
            refreshed_at: Some(Utc::now()),
        }
    }

    pub fn cached(remote: HarvesterSettings) -> Self {
        Self {
            remote,
            refreshed_at: None,
        }
    }

    pub fn monitored_paths(&self) -> &[MonitoredPath] {
        &self.remote.monitored_paths
    }

    pub fn active_paths(&self) -> impl Iterator<Item = &MonitoredPath> {
        self.remote.active_paths()
    }

    pub fn sleep_time(&self, fallback: Duration) -> Duration {
        self.remote
            .sleep_time
            .map(Duration::from_secs)
            .unwrap_or(fallback)
    }

    pub fn partition_line_count(&self, path: &MonitoredPath, fallback: usize) -> usize {
        path.max_partition_line_count
            .filter(|&n| n > 0)
            .unwrap_or(fallback)
    }
}

/// JSON copy of the last settings the registry sent.
#[derive(Debug, Clone)]
pub struct SettingsCache {
    path: PathBuf,
}

impl SettingsCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<HarvesterSettings>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let settings = serde_json::from_str(&content).map_err(|e| {
            HarvestError::Config(format!("corrupt settings cache {}: {}", self.path.display(), e))
        })?;
        Ok(Some(settings))
    }

    /// Write `settings` if anything differs from the cached copy. Changed
    /// top-level keys are logged. Returns whether the file was rewritten.
    pub fn store(&self, settings: &HarvesterSettings) -> Result<bool> {
        let previous = match self.load() {
            Ok(previous) => previous,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Discarding unreadable settings cache");
                None
            }
        };

        let new_value = to_value(settings)?;
        let old_value = previous.as_ref().map(to_value).transpose()?;
        let changed = changed_keys(old_value.as_ref(), &new_value);
        if changed.is_empty() {
            debug!("Settings unchanged");
            return Ok(false);
        }

        for (key, old, new) in &changed {
            if key == "api_key" {
                info!(key = %key, "Setting changed");
            } else {
                info!(key = %key, old = %old, new = %new, "Setting changed");
            }
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| HarvestError::Config(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(true)
    }
}

fn to_value(settings: &HarvesterSettings) -> Result<Value> {
    serde_json::to_value(settings).map_err(|e| HarvestError::Config(e.to_string()))
}

/// `(key, old, new)` for every top-level key whose value differs.
fn changed_keys(old: Option<&Value>, new: &Value) -> Vec<(String, Value, Value)> {
    let empty = serde_json::Map::new();
    let old = old.and_then(Value::as_object).unwrap_or(&empty);
    let new = new.as_object().unwrap_or(&empty);

    let mut keys: Vec<&String> = old.keys().chain(new.keys()).collect();
    keys.sort();
    keys.dedup();

    keys.into_iter()
        .filter_map(|key| {
            let before = old.get(key).cloned().unwrap_or(Value::Null);
            let after = new.get(key).cloned().unwrap_or(Value::Null);
            (before != after).then(|| (key.clone(), before, after))
        })
        .collect()
}

/// Apply registry-managed environment variables to this process.
pub fn apply_environment(settings: &HarvesterSettings) {
    for (key, value) in &settings.environment_variables {
        if key.is_empty() || key.contains('=') || key.contains('\0') || value.contains('\0') {
            warn!(key = %key, "Skipping invalid environment variable");
            continue;
        }
        if std::env::var(key).ok().as_deref() != Some(value.as_str()) {
            debug!(key = %key, "Setting environment variable");
            std::env::set_var(key, value);
        }
    }
    for key in &settings.deleted_environment_variables {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            continue;
        }
        if std::env::var_os(key).is_some() {
            debug!(key = %key, "Removing environment variable");
            std::env::remove_var(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(sleep: u64) -> HarvesterSettings {
        HarvesterSettings {
            name: Some("bench-1".into()),
            sleep_time: Some(sleep),
            monitored_paths: vec![MonitoredPath::new("1", "/data")],
            ..Default::default()
        }
    }

    #[test]
    fn test_cache_only_rewritten_when_dirty() {
        let dir = TempDir::new().unwrap();
        let cache = SettingsCache::new(dir.path().join("settings.json"));
        assert!(cache.load().unwrap().is_none());

        assert!(cache.store(&settings(10)).unwrap());
        assert!(!cache.store(&settings(10)).unwrap());
        assert!(cache.store(&settings(20)).unwrap());
        assert_eq!(cache.load().unwrap().unwrap().sleep_time, Some(20));
    }

    #[test]
    fn test_changed_keys_reported() {
        let old = to_value(&settings(10)).unwrap();
        let new = to_value(&settings(20)).unwrap();
        let changed = changed_keys(Some(&old), &new);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].0, "sleep_time");
    }

    #[test]
    fn test_runtime_fallbacks() {
        let runtime = RuntimeSettings::cached(HarvesterSettings::default());
        assert_eq!(runtime.sleep_time(Duration::from_secs(7)), Duration::from_secs(7));

        let mut path = MonitoredPath::new("1", "/data");
        assert_eq!(runtime.partition_line_count(&path, 100), 100);
        path.max_partition_line_count = Some(25);
        assert_eq!(runtime.partition_line_count(&path, 100), 25);
    }

    #[test]
    fn test_environment_applied_and_removed() {
        let mut remote = HarvesterSettings::default();
        remote
            .environment_variables
            .insert("HARVESTER_TEST_ENV_APPLY".into(), "on".into());
        apply_environment(&remote);
        assert_eq!(std::env::var("HARVESTER_TEST_ENV_APPLY").unwrap(), "on");

        remote.environment_variables.clear();
        remote
            .deleted_environment_variables
            .push("HARVESTER_TEST_ENV_APPLY".into());
        apply_environment(&remote);
        assert!(std::env::var("HARVESTER_TEST_ENV_APPLY").is_err());
    }
}
