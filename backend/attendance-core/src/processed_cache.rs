// src/processed_cache.rs
//! Persisted set of device punches that have already been recorded and
//! announced. Overlapping poll windows re-deliver the same punch; this set makes
//! the second delivery inert.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::json_store::{load_or_default, save_atomic};
use crate::storage::StorageError;

const KEY_SEPARATOR: &str = "|";

/// Builds the dedupe key for a device punch from the employee code and the
/// timestamp exactly as the device sent it.
pub fn punch_key(employee_code: &str, raw_timestamp: &str) -> String {
    format!("{}{}{}", employee_code, KEY_SEPARATOR, raw_timestamp)
}

#[derive(Debug)]
pub struct ProcessedPunchCache {
    path: PathBuf,
    keys: Mutex<HashSet<String>>,
    // Serializes writers so two saves never interleave on the temp file.
    save_lock: Mutex<()>,
}

impl ProcessedPunchCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            keys: Mutex::new(HashSet::new()),
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the in-memory set with the persisted one. Missing, empty or
    /// corrupt files give an empty set.
    pub fn load(&self) {
        let stored: Vec<String> = load_or_default(&self.path, "processed punches");
        let count = stored.len();
        *self.keys.lock().unwrap_or_else(|e| e.into_inner()) = stored.into_iter().collect();
        debug!("Loaded {} processed punch keys from {:?}", count, self.path);
    }

    pub fn save(&self) -> Result<(), StorageError> {
        let _guard = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut snapshot: Vec<String> = self
            .keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        snapshot.sort();
        save_atomic(&self.path, &snapshot)
    }

    /// Like [`save`](Self::save) but only logs failures.
    pub fn save_best_effort(&self) {
        if let Err(e) = self.save() {
            warn!("Failed to persist processed punches to {:?}: {}", self.path, e);
        }
    }

    pub fn is_duplicate(&self, key: &str) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }

    pub fn mark_processed(&self, key: impl Into<String>) {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into());
    }

    pub fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
