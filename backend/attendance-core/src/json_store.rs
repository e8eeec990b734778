// src/json_store.rs
//! Best-effort JSON persistence for the small state files (processed punches,
//! sync cursors, running timers).

use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

use crate::storage::{io_context, StorageError};

/// Loads `path` as JSON. A missing file, an empty file, or unreadable content
/// all yield `T::default()`; the latter is logged.
pub fn load_or_default<T: DeserializeOwned + Default>(path: &Path, what: &str) -> T {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No {} file at {:?}, starting empty", what, path);
            return T::default();
        }
        Err(e) => {
            warn!("Failed to read {} from {:?}: {}. Starting empty.", what, path, e);
            return T::default();
        }
    };

    if raw.trim().is_empty() {
        return T::default();
    }

    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            warn!("Corrupt {} file {:?}: {}. Starting empty.", what, path, e);
            T::default()
        }
    }
}

/// Writes `value` as pretty JSON via a sibling temp file and a rename, so a
/// crash mid-write never leaves a truncated file behind.
pub fn save_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let json_string = serde_json::to_string_pretty(value)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| io_context(e, format!("Failed to create state directory: {:?}", parent)))?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp_path)
        .map_err(|e| io_context(e, format!("Failed to create temp file: {:?}", tmp_path)))?;
    file.write_all(json_string.as_bytes())
        .map_err(|e| io_context(e, format!("Failed to write temp file: {:?}", tmp_path)))?;
    file.sync_all()
        .map_err(|e| io_context(e, format!("Failed to flush temp file: {:?}", tmp_path)))?;
    drop(file);

    fs::rename(&tmp_path, path)
        .map_err(|e| io_context(e, format!("Failed to replace {:?}", path)))?;
    Ok(())
}
