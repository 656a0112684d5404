//! Per-file exclusion across concurrent harvest cycles.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Set of file paths with a negotiation in flight.
#[derive(Debug, Clone, Default)]
pub struct PathLocks {
    held: Arc<Mutex<HashSet<PathBuf>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        // The set stays consistent even if a holder panicked mid-insert.
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `path`, or `None` if another negotiation already holds it.
    pub fn try_acquire(&self, path: &Path) -> Option<PathLockGuard> {
        if !self.held().insert(path.to_path_buf()) {
            return None;
        }
        Some(PathLockGuard {
            locks: self.clone(),
            path: path.to_path_buf(),
        })
    }

    pub fn is_locked(&self, path: &Path) -> bool {
        self.held().contains(path)
    }

    pub fn held_count(&self) -> usize {
        self.held().len()
    }
}

/// Releases the path on drop.
#[derive(Debug)]
pub struct PathLockGuard {
    locks: PathLocks,
    path: PathBuf,
}

impl PathLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        self.locks.held().remove(&self.path);
    }
}
