// src/sync_cursor.rs
//! Per-source "consumed up to" timestamps that bound each incremental poll.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::json_store::{load_or_default, save_atomic};
use crate::storage::StorageError;

/// Lookback used when a source has never been polled.
const DEFAULT_LOOKBACK_MINUTES: i64 = 2;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CursorFile {
    #[serde(default)]
    last_fetched_at: BTreeMap<String, DateTime<Utc>>,
}

/// A half-open polling window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Start of the next poll: `cursor - overlap`, never before the Unix epoch.
pub fn poll_window(cursor: DateTime<Utc>, overlap: Duration, now: DateTime<Utc>) -> PollWindow {
    let start = cursor
        .checked_sub_signed(overlap)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        .max(DateTime::<Utc>::UNIX_EPOCH);
    PollWindow { start, end: now }
}

pub struct SyncCursorStore {
    path: PathBuf,
    source: String,
    clock: Arc<dyn Clock>,
    state: Mutex<CursorFile>,
}

impl SyncCursorStore {
    pub fn new(path: impl Into<PathBuf>, source: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
            clock,
            state: Mutex::new(CursorFile::default()),
        }
    }

    pub fn load(&self) {
        let file: CursorFile = load_or_default(&self.path, "sync cursor");
        debug!("Loaded sync cursors for {} sources", file.last_fetched_at.len());
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = file;
    }

    /// Persisted cursor for this source, or `now - 2 minutes` if none exists.
    pub fn get_last_fetched_at(&self) -> DateTime<Utc> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_fetched_at
            .get(&self.source)
            .copied()
            .unwrap_or_else(|| self.clock.now() - Duration::minutes(DEFAULT_LOOKBACK_MINUTES))
    }

    /// Records and persists the cursor. Other sources sharing the file keep
    /// their values.
    pub fn set_last_fetched_at(&self, at: DateTime<Utc>) -> Result<(), StorageError> {
        let snapshot = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.last_fetched_at.insert(self.source.clone(), at);
            state.clone()
        };
        save_atomic(&self.path, &snapshot)?;
        info!("Advanced {} cursor to {}", self.source, at.to_rfc3339());
        Ok(())
    }

    /// Window for the next poll of this source.
    pub fn next_window(&self, overlap: Duration) -> PollWindow {
        poll_window(self.get_last_fetched_at(), overlap, self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ManualClock;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    #[test]
    fn never_persisted_defaults_to_two_minutes_ago() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(at(9, 0, 0)));
        let store = SyncCursorStore::new(dir.path().join("sync_cursor.json"), "onsite", clock);
        store.load();

        assert_eq!(store.get_last_fetched_at(), at(8, 58, 0));
    }

    #[test]
    fn window_starts_one_overlap_before_the_cursor() {
        let window = poll_window(at(9, 0, 0), Duration::seconds(10), at(9, 1, 0));
        assert_eq!(window.start, at(8, 59, 50));
        assert_eq!(window.end, at(9, 1, 0));
    }

    #[test]
    fn window_never_starts_before_epoch() {
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        let window = poll_window(epoch + Duration::seconds(3), Duration::seconds(10), at(9, 0, 0));
        assert_eq!(window.start, epoch);
    }

    #[test]
    fn cursor_survives_reload_and_keeps_other_sources() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync_cursor.json");
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(at(12, 0, 0)));

        let onsite = SyncCursorStore::new(&path, "onsite", Arc::clone(&clock));
        onsite.load();
        onsite.set_last_fetched_at(at(9, 0, 0)).unwrap();

        let other = SyncCursorStore::new(&path, "other", Arc::clone(&clock));
        other.load();
        other.set_last_fetched_at(at(10, 0, 0)).unwrap();

        let reloaded = SyncCursorStore::new(&path, "onsite", clock);
        reloaded.load();
        assert_eq!(reloaded.get_last_fetched_at(), at(9, 0, 0));
        assert_eq!(reloaded.next_window(Duration::seconds(10)).start, at(8, 59, 50));
    }
}
