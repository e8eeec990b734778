// src/timer_state.rs
//! Which time-tracking user currently has which timer running, as last seen by
//! the remote poller.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

use crate::json_store::{load_or_default, save_atomic};
use crate::storage::StorageError;

#[derive(Debug)]
pub struct RunningTimerState {
    path: PathBuf,
    timers: Mutex<BTreeMap<String, String>>,
}

impl RunningTimerState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn load(&self) {
        let stored: BTreeMap<String, String> = load_or_default(&self.path, "running timers");
        debug!("Loaded {} running timers from {:?}", stored.len(), self.path);
        *self.timers.lock().unwrap_or_else(|e| e.into_inner()) = stored;
    }

    pub fn save(&self) -> Result<(), StorageError> {
        let snapshot = self.timers.lock().unwrap_or_else(|e| e.into_inner()).clone();
        save_atomic(&self.path, &snapshot)
    }

    pub fn get(&self, user_id: &str) -> Option<String> {
        self.timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .cloned()
    }

    pub fn set(&self, user_id: &str, timer_id: &str) {
        self.timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id.to_string(), timer_id.to_string());
    }

    /// Returns the identity that was stored, if any.
    pub fn clear(&self, user_id: &str) -> Option<String> {
        self.timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id)
    }

    pub fn len(&self) -> usize {
        self.timers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
