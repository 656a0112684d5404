//! Harvester settings as served by the registry's `config/` endpoint.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Registry ids arrive as integers or UUID strings; both are kept as text.
fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Int(i64),
        Unsigned(u64),
    }

    Ok(match Repr::deserialize(deserializer)? {
        Repr::Text(s) => s,
        Repr::Int(n) => n.to_string(),
        Repr::Unsigned(n) => n.to_string(),
    })
}

fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "id_from_string_or_number")] String);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
}

fn default_true() -> bool {
    true
}

/// A directory tree the harvester watches, owned by a team on the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredPath {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub path: String,
    /// Matched (unanchored) against the path relative to `path`.
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Seconds a file's size must stay unchanged; enforced by the registry.
    #[serde(default)]
    pub stable_time: Option<u64>,
    #[serde(default, deserialize_with = "optional_id")]
    pub team: Option<String>,
    #[serde(default)]
    pub max_partition_line_count: Option<usize>,
}

impl MonitoredPath {
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            regex: None,
            active: true,
            stable_time: None,
            team: None,
            max_partition_line_count: None,
        }
    }

    pub fn with_regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = Some(regex.into());
        self
    }
}

/// Settings pulled from the registry once per cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarvesterSettings {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "optional_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default, deserialize_with = "optional_id")]
    pub lab: Option<String>,
    #[serde(default)]
    pub sleep_time: Option<u64>,
    #[serde(default)]
    pub max_upload_bytes: Option<u64>,
    #[serde(default)]
    pub monitored_paths: Vec<MonitoredPath>,
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
    #[serde(default)]
    pub deleted_environment_variables: Vec<String>,
}

impl HarvesterSettings {
    pub fn active_paths(&self) -> impl Iterator<Item = &MonitoredPath> {
        self.monitored_paths.iter().filter(|p| p.active)
    }
}
