// src/remote_poller.rs
//! Detects remote sign-in and sign-off by comparing each user's running timer
//! with the one seen on the previous cycle.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Utc};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::clockify_client::{TimeEntry, TimeTrackingApi, TrackedUser};
use crate::error::SyncError;
use crate::ledger::AttendanceLedger;
use crate::model::{AttendanceEvent, EmployeeKey, EventKind};
use crate::notifier::{Notification, Notifier};
use crate::time_util::format_elapsed;
use crate::timer_state::RunningTimerState;

pub const SIGNING_IN: &str = "Signing In";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteCycleSummary {
    pub users: usize,
    pub signed_in: usize,
    pub signed_off: usize,
    pub mismatched: usize,
    pub notify_failures: usize,
}

pub struct RemotePoller {
    api: Arc<dyn TimeTrackingApi>,
    ledger: Arc<AttendanceLedger>,
    timers: RunningTimerState,
    notifier: Arc<dyn Notifier>,
    local_offset: FixedOffset,
    user_delay: std::time::Duration,
    propagate_notification_errors: bool,
}

fn remote_label(user: &TrackedUser) -> String {
    format!("🏠 {}", user.name)
}

impl RemotePoller {
    pub fn new(
        api: Arc<dyn TimeTrackingApi>,
        ledger: Arc<AttendanceLedger>,
        timers: RunningTimerState,
        notifier: Arc<dyn Notifier>,
        local_offset: FixedOffset,
        user_delay: std::time::Duration,
    ) -> Self {
        Self {
            api,
            ledger,
            timers,
            notifier,
            local_offset,
            user_delay,
            propagate_notification_errors: false,
        }
    }

    pub fn propagate_notification_errors(mut self, propagate: bool) -> Self {
        self.propagate_notification_errors = propagate;
        self
    }

    fn local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        at.with_timezone(&self.local_offset).naive_local()
    }

    pub async fn run_cycle(&self) -> Result<RemoteCycleSummary, SyncError> {
        self.timers.load();
        let users = self.api.list_users().await?;
        let mut summary = RemoteCycleSummary {
            users: users.len(),
            ..Default::default()
        };
        debug!("Checking running timers for {} users", users.len());

        for (index, user) in users.iter().enumerate() {
            if index > 0 && !self.user_delay.is_zero() {
                sleep(self.user_delay).await;
            }
            self.poll_user(user, &mut summary).await?;
        }

        if summary.signed_in + summary.signed_off > 0 {
            info!(
                "Remote cycle done: {} users, {} signed in, {} signed off",
                summary.users, summary.signed_in, summary.signed_off
            );
        }
        Ok(summary)
    }

    async fn poll_user(&self, user: &TrackedUser, summary: &mut RemoteCycleSummary) -> Result<(), SyncError> {
        let running = self.api.get_running_entry(&user.id).await?;
        let stored = self.timers.get(&user.id);

        match (running, stored) {
            (Some(entry), stored) if stored.as_deref() != Some(entry.id.as_str()) => {
                self.sign_in(user, &entry, summary).await
            }
            (Some(_), _) => Ok(()),
            (None, Some(timer_id)) => self.sign_off(user, &timer_id, summary).await,
            (None, None) => Ok(()),
        }
    }

    async fn project_name(&self, entry: &TimeEntry) -> Result<Option<String>, SyncError> {
        match entry.project_id.as_deref() {
            Some(project_id) => Ok(self.api.get_project_name(project_id).await?),
            None => Ok(None),
        }
    }

    async fn sign_in(&self, user: &TrackedUser, entry: &TimeEntry, summary: &mut RemoteCycleSummary) -> Result<(), SyncError> {
        let project = self.project_name(entry).await?;
        let started = self.local(entry.time_interval.start);

        let event = AttendanceEvent::at(EmployeeKey::Name(user.name.clone()), user.name.clone(), started, EventKind::RemoteStart)
            .with_project(project.clone());
        self.ledger.upsert(&event)?;

        self.timers.set(&user.id, &entry.id);
        if let Err(e) = self.timers.save() {
            warn!("Failed to persist running timers: {}", e);
        }
        info!("{} signed in on timer {}", user.name, entry.id);
        summary.signed_in += 1;

        let notification = Notification::remote(remote_label(user), started, SIGNING_IN, project);
        self.notify(&notification, summary).await
    }

    async fn sign_off(&self, user: &TrackedUser, timer_id: &str, summary: &mut RemoteCycleSummary) -> Result<(), SyncError> {
        let finished = self
            .api
            .get_last_entry(&user.id)
            .await?
            .filter(|entry| entry.id == timer_id)
            .and_then(|entry| entry.time_interval.end.map(|end| (entry, end)));

        let notification = match finished {
            Some((entry, end)) => {
                let project = self.project_name(&entry).await?;
                let started = self.local(entry.time_interval.start);
                let ended = self.local(end);
                let worked = format_elapsed(entry.elapsed().unwrap_or_else(Duration::zero));

                // The session belongs to the day it started on.
                let mut event = AttendanceEvent::at(EmployeeKey::Name(user.name.clone()), user.name.clone(), ended, EventKind::RemoteEnd)
                    .with_project(project.clone());
                event.date = started.date();
                self.ledger.upsert(&event)?;

                info!("{} signed off timer {} after {}", user.name, timer_id, worked);
                summary.signed_off += 1;
                Some(Notification::remote(
                    remote_label(user),
                    ended,
                    format!("Signing off | {}", worked),
                    project,
                ))
            }
            None => {
                warn!("Last time entry not found or mismatched for {} (expected {})", user.name, timer_id);
                summary.mismatched += 1;
                None
            }
        };

        self.timers.clear(&user.id);
        if let Err(e) = self.timers.save() {
            warn!("Failed to persist running timers: {}", e);
        }

        match notification {
            Some(notification) => self.notify(&notification, summary).await,
            None => Ok(()),
        }
    }

    async fn notify(&self, notification: &Notification, summary: &mut RemoteCycleSummary) -> Result<(), SyncError> {
        if let Err(e) = self.notifier.send(notification).await {
            summary.notify_failures += 1;
            if self.propagate_notification_errors {
                return Err(e.into());
            }
            warn!("Notification for {} dropped: {}", notification.label, e);
        }
        Ok(())
    }

    pub fn timers(&self) -> &RunningTimerState {
        &self.timers
    }
}
