// src/onsite_poller.rs
//! One polling cycle against the biometric device.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::device_client::{DeviceSession, RawPunch};
use crate::error::SyncError;
use crate::ledger::AttendanceLedger;
use crate::model::{AttendanceEvent, EmployeeKey, EventKind};
use crate::notifier::{Notification, Notifier};
use crate::processed_cache::{punch_key, ProcessedPunchCache};
use crate::sync_cursor::{poll_window, SyncCursorStore};

/// Key of the on-site entry in the cursor file.
pub const CURSOR_SOURCE: &str = "onsite";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnSiteCycleSummary {
    pub fetched: usize,
    pub recorded: usize,
    pub duplicates: usize,
    pub unrecognized: usize,
    pub unreadable: usize,
    pub notify_failures: usize,
}

pub struct OnSitePoller {
    session: DeviceSession,
    ledger: Arc<AttendanceLedger>,
    cache: ProcessedPunchCache,
    cursor: SyncCursorStore,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    device_offset: FixedOffset,
    overlap: Duration,
    propagate_notification_errors: bool,
}

fn to_device_time(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDateTime {
    at.with_timezone(&offset).naive_local()
}

impl OnSitePoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: DeviceSession,
        ledger: Arc<AttendanceLedger>,
        cache: ProcessedPunchCache,
        cursor: SyncCursorStore,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        device_offset: FixedOffset,
        overlap: Duration,
    ) -> Self {
        Self {
            session,
            ledger,
            cache,
            cursor,
            notifier,
            clock,
            device_offset,
            overlap,
            propagate_notification_errors: false,
        }
    }

    /// When set, a notification that still fails after retries aborts the
    /// cycle instead of being logged. Used for one-shot runs.
    pub fn propagate_notification_errors(mut self, propagate: bool) -> Self {
        self.propagate_notification_errors = propagate;
        self
    }

    /// Fetches the window since the last successful cycle and records every
    /// punch not seen before. The cursor only advances when the whole window
    /// has been handled.
    pub async fn run_cycle(&self) -> Result<OnSiteCycleSummary, SyncError> {
        self.cache.load();
        self.cursor.load();

        let now = self.clock.now();
        let window = poll_window(self.cursor.get_last_fetched_at(), self.overlap, now);
        let start = to_device_time(window.start, self.device_offset);
        let end = to_device_time(window.end, self.device_offset);
        info!("Polling device punches from {} to {}", start, end);

        let punches = self.session.fetch_transactions(start, end).await.map_err(|e| {
            error!("Device fetch failed, cursor stays at {}: {}", window.start, e);
            e
        })?;

        let mut summary = OnSiteCycleSummary {
            fetched: punches.len(),
            ..Default::default()
        };
        // Device order decides which break slot fills first; never re-sort.
        for punch in &punches {
            self.process_punch(punch, &mut summary).await?;
        }

        if let Err(e) = self.cursor.set_last_fetched_at(now) {
            warn!("Failed to persist on-site cursor: {}", e);
        }
        info!(
            "On-site cycle done: {} fetched, {} recorded, {} duplicates, {} unrecognized",
            summary.fetched, summary.recorded, summary.duplicates, summary.unrecognized
        );
        Ok(summary)
    }

    async fn process_punch(&self, punch: &RawPunch, summary: &mut OnSiteCycleSummary) -> Result<(), SyncError> {
        let key = punch_key(&punch.emp_code, &punch.punch_time);
        if self.cache.is_duplicate(&key) {
            debug!("Skipping already processed punch {}", key);
            summary.duplicates += 1;
            return Ok(());
        }

        let Some(timestamp) = punch.timestamp() else {
            warn!("Skipping punch {} with unreadable time {:?}", punch.emp_code, punch.punch_time);
            summary.unreadable += 1;
            return Ok(());
        };
        let name = punch.display_name();

        match EventKind::from_device_status(&punch.punch_state_display) {
            Some(kind) => {
                let employee = EmployeeKey::for_device(&punch.emp_code, &name);
                let event = AttendanceEvent::at(employee, name.clone(), timestamp, kind);
                self.ledger.upsert(&event)?;
                summary.recorded += 1;
            }
            None => {
                warn!(
                    "Unrecognized punch status {:?} for {}; notifying without a ledger entry",
                    punch.punch_state_display, punch.emp_code
                );
                summary.unrecognized += 1;
            }
        }

        let notification = Notification::onsite(
            format!("{} ({})", name, punch.emp_code),
            timestamp,
            punch.punch_state_display.clone(),
        );
        if let Err(e) = self.notifier.send(&notification).await {
            summary.notify_failures += 1;
            if self.propagate_notification_errors {
                return Err(e.into());
            }
            warn!("Notification for {} dropped: {}", key, e);
        }

        self.cache.mark_processed(key);
        self.cache.save_best_effort();
        Ok(())
    }

    pub fn cache(&self) -> &ProcessedPunchCache {
        &self.cache
    }
}
