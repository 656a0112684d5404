//! Directory enumeration for monitored paths.

use harvester_protocol::MonitoredPath;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid pattern '{pattern}' for monitored path {id}: {source}")]
    InvalidPattern {
        id: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Monitored path {} is not a readable directory", .0.display())]
    MissingRoot(PathBuf),
}

/// A candidate file found during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub monitored_path_id: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub files: Vec<DiscoveredFile>,
    /// Entries that could not be read. The rest of the tree is still scanned.
    pub errors: Vec<String>,
}

/// Compiled filename filter for one monitored path.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    root: PathBuf,
    regex: Option<Regex>,
}

impl PathMatcher {
    pub fn new(monitored: &MonitoredPath) -> Result<Self, ScanError> {
        let regex = match monitored.regex.as_deref().filter(|r| !r.is_empty()) {
            Some(pattern) => Some(Regex::new(pattern).map_err(|source| {
                ScanError::InvalidPattern {
                    id: monitored.id.clone(),
                    pattern: pattern.to_string(),
                    source,
                }
            })?),
            None => None,
        };
        Ok(Self {
            root: PathBuf::from(&monitored.path),
            regex,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Search (unanchored) against the path relative to the root.
    pub fn matches(&self, path: &Path) -> bool {
        if is_hidden_name(path) {
            return false;
        }
        let Some(regex) = &self.regex else {
            return true;
        };
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        regex.is_match(&relative.to_string_lossy())
    }
}

fn is_hidden_name(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

fn is_hidden_entry(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Enumerate matching files under `monitored`, or only under `within` when
/// given (which must lie inside the monitored root).
pub fn scan_monitored_path(
    monitored: &MonitoredPath,
    within: Option<&Path>,
) -> Result<ScanOutcome, ScanError> {
    let matcher = PathMatcher::new(monitored)?;
    if !matcher.root().is_dir() {
        return Err(ScanError::MissingRoot(matcher.root().to_path_buf()));
    }
    let start = within.unwrap_or(matcher.root());

    let mut outcome = ScanOutcome::default();
    let walker = WalkDir::new(start)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_hidden_entry(entry));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                outcome.errors.push(e.to_string());
                continue;
            }
        };
        if !entry.file_type().is_file() || !matcher.matches(entry.path()) {
            continue;
        }
        match entry.metadata() {
            Ok(meta) => outcome.files.push(DiscoveredFile {
                path: entry.path().to_path_buf(),
                monitored_path_id: monitored.id.clone(),
                size: meta.len(),
                modified: meta.modified().ok(),
            }),
            Err(e) => outcome.errors.push(e.to_string()),
        }
    }

    debug!(
        monitored_path = %monitored.path,
        files = outcome.files.len(),
        errors = outcome.errors.len(),
        "Scanned monitored path"
    );
    Ok(outcome)
}
