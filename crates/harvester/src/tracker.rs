//! In-memory HarvestedFile records across cycles.
//!
//! Nothing here is required for correctness after a restart: the registry's
//! status plus the file on disk are enough to re-derive every negotiation.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

use crate::machine::NegotiationState;
use crate::scan::DiscoveredFile;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestedFile {
    pub path: PathBuf,
    pub monitored_path_id: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
    /// Terminal state of the most recent negotiation, if any ran.
    pub last_state: Option<NegotiationState>,
    pub negotiations: u32,
}

#[derive(Debug, Default)]
pub struct FileTracker {
    files: HashMap<PathBuf, HarvestedFile>,
}

impl FileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh size/mtime from a scan.
    pub fn observe(&mut self, file: &DiscoveredFile) {
        let entry = self
            .files
            .entry(file.path.clone())
            .or_insert_with(|| HarvestedFile {
                path: file.path.clone(),
                monitored_path_id: file.monitored_path_id.clone(),
                size: file.size,
                modified: file.modified,
                last_state: None,
                negotiations: 0,
            });
        entry.monitored_path_id = file.monitored_path_id.clone();
        entry.size = file.size;
        entry.modified = file.modified;
    }

    pub fn record(&mut self, path: &Path, state: NegotiationState) {
        if let Some(entry) = self.files.get_mut(path) {
            entry.last_state = Some(state);
            entry.negotiations += 1;
        }
    }

    /// Forget files of `monitored_path_id` that the latest full scan did not
    /// return (deleted, or no longer matched by the pattern).
    pub fn retain_seen(&mut self, monitored_path_id: &str, seen: &HashSet<PathBuf>) -> usize {
        let before = self.files.len();
        self.files.retain(|path, file| {
            let keep = file.monitored_path_id != monitored_path_id || seen.contains(path);
            if !keep {
                debug!(path = %path.display(), "Forgetting file");
            }
            keep
        });
        before - self.files.len()
    }

    /// Forget every file of monitored paths not in `active_ids`.
    pub fn retain_paths(&mut self, active_ids: &HashSet<String>) {
        self.files
            .retain(|_, file| active_ids.contains(&file.monitored_path_id));
    }

    pub fn get(&self, path: &Path) -> Option<&HarvestedFile> {
        self.files.get(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
