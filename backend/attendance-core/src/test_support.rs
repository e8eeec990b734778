// src/test_support.rs
//! In-memory stand-ins for the external collaborators.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::clock::Clock;
use crate::clockify_client::{TimeEntry, TimeInterval, TimeTrackingApi, TimeTrackingError, TrackedUser};
use crate::device_client::{CredentialRefresher, DeviceApi, DeviceError, RawPunch, ReportPage};
use crate::notifier::{Notification, NotificationError, Notifier};

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Records every notification; the first `fail_first` attempts fail.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    attempts: AtomicUsize,
    fail_first: usize,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(fail_first: usize) -> Self {
        Self {
            fail_first,
            ..Self::default()
        }
    }

    pub fn always_failing() -> Self {
        Self::failing_first(usize::MAX)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().iter().map(Notification::text).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(NotificationError::SendError("scripted failure".to_string()));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub enum Scripted {
    Punches(Vec<RawPunch>),
    AuthExpired,
    ServerError,
}

/// Device API that replays scripted responses. An exhausted script returns
/// no punches.
#[derive(Default)]
pub struct ScriptedDevice {
    transactions: Mutex<VecDeque<Scripted>>,
    report_pages: Mutex<VecDeque<Result<Option<ReportPage>, DeviceError>>>,
    windows: Mutex<Vec<(NaiveDateTime, NaiveDateTime)>>,
    report_cursors: Mutex<Vec<Option<String>>>,
    installed_tokens: Mutex<Vec<String>>,
    reauth_calls: AtomicUsize,
    reject_credentials: bool,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting_credentials() -> Self {
        Self {
            reject_credentials: true,
            ..Self::default()
        }
    }

    pub fn push(&self, response: Scripted) {
        self.transactions.lock().unwrap().push_back(response);
    }

    pub fn push_report_page(&self, page: Result<Option<ReportPage>, DeviceError>) {
        self.report_pages.lock().unwrap().push_back(page);
    }

    pub fn windows(&self) -> Vec<(NaiveDateTime, NaiveDateTime)> {
        self.windows.lock().unwrap().clone()
    }

    pub fn report_cursors(&self) -> Vec<Option<String>> {
        self.report_cursors.lock().unwrap().clone()
    }

    pub fn installed_tokens(&self) -> Vec<String> {
        self.installed_tokens.lock().unwrap().clone()
    }

    pub fn reauth_calls(&self) -> usize {
        self.reauth_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceApi for ScriptedDevice {
    async fn fetch_transactions(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<RawPunch>, DeviceError> {
        self.windows.lock().unwrap().push((start, end));
        match self.transactions.lock().unwrap().pop_front() {
            None => Ok(Vec::new()),
            Some(Scripted::Punches(punches)) => Ok(punches),
            Some(Scripted::AuthExpired) => Err(DeviceError::AuthExpired),
            Some(Scripted::ServerError) => Err(DeviceError::ApiError {
                status: reqwest::StatusCode::BAD_GATEWAY,
                message: "upstream down".to_string(),
            }),
        }
    }

    async fn fetch_report_page(
        &self,
        _start: NaiveDate,
        _end: NaiveDate,
        cursor: Option<&str>,
    ) -> Result<Option<ReportPage>, DeviceError> {
        self.report_cursors
            .lock()
            .unwrap()
            .push(cursor.map(str::to_string));
        self.report_pages.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }

    async fn install_token(&self, token: String) {
        self.installed_tokens.lock().unwrap().push(token);
    }
}

#[async_trait]
impl CredentialRefresher for ScriptedDevice {
    async fn reauthenticate(&self, _username: &str, _password: &str) -> Result<String, DeviceError> {
        let call = self.reauth_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.reject_credentials {
            return Err(DeviceError::TokenRefreshFailed("bad credentials".to_string()));
        }
        Ok(format!("token-{}", call))
    }
}

pub fn punch(code: &str, name: &str, time: &str, status: &str) -> RawPunch {
    let (first, last) = match name.split_once(' ') {
        Some((first, last)) => (first.to_string(), Some(last.to_string())),
        None => (name.to_string(), None),
    };
    RawPunch {
        emp_code: code.to_string(),
        first_name: Some(first),
        last_name: last,
        punch_time: time.to_string(),
        punch_state_display: status.to_string(),
    }
}

pub fn entry(id: &str, project: Option<&str>, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> TimeEntry {
    TimeEntry {
        id: id.to_string(),
        project_id: project.map(str::to_string),
        description: None,
        time_interval: TimeInterval {
            start,
            end,
            duration: None,
        },
    }
}

/// Time-tracking API backed by plain maps.
#[derive(Default)]
pub struct FakeTimeTracking {
    users: Mutex<Vec<TrackedUser>>,
    running: Mutex<HashMap<String, TimeEntry>>,
    last: Mutex<HashMap<String, TimeEntry>>,
    projects: Mutex<HashMap<String, String>>,
    entries: Mutex<HashMap<String, Vec<TimeEntry>>>,
    failing_users: Mutex<Vec<String>>,
    running_lookups: AtomicUsize,
}

impl FakeTimeTracking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, id: &str, name: &str) {
        self.users.lock().unwrap().push(TrackedUser {
            id: id.to_string(),
            name: name.to_string(),
        });
    }

    pub fn add_project(&self, id: &str, name: &str) {
        self.projects
            .lock()
            .unwrap()
            .insert(id.to_string(), name.to_string());
    }

    pub fn start_timer(&self, user_id: &str, entry: TimeEntry) {
        self.running.lock().unwrap().insert(user_id.to_string(), entry);
    }

    /// Stops the running timer: it becomes the user's last entry.
    pub fn stop_timer(&self, user_id: &str, end: DateTime<Utc>) {
        if let Some(mut entry) = self.running.lock().unwrap().remove(user_id) {
            entry.time_interval.end = Some(end);
            self.last.lock().unwrap().insert(user_id.to_string(), entry);
        }
    }

    pub fn set_last_entry(&self, user_id: &str, entry: TimeEntry) {
        self.last.lock().unwrap().insert(user_id.to_string(), entry);
    }

    pub fn add_entries(&self, user_id: &str, entries: Vec<TimeEntry>) {
        self.entries
            .lock()
            .unwrap()
            .entry(user_id.to_string())
            .or_default()
            .extend(entries);
    }

    pub fn fail_user(&self, user_id: &str) {
        self.failing_users.lock().unwrap().push(user_id.to_string());
    }

    pub fn running_lookups(&self) -> usize {
        self.running_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimeTrackingApi for FakeTimeTracking {
    async fn list_users(&self) -> Result<Vec<TrackedUser>, TimeTrackingError> {
        Ok(self.users.lock().unwrap().clone())
    }

    async fn get_running_entry(&self, user_id: &str) -> Result<Option<TimeEntry>, TimeTrackingError> {
        self.running_lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing_users.lock().unwrap().iter().any(|u| u == user_id) {
            return Err(TimeTrackingError::RateLimitExceeded);
        }
        Ok(self.running.lock().unwrap().get(user_id).cloned())
    }

    async fn get_last_entry(&self, user_id: &str) -> Result<Option<TimeEntry>, TimeTrackingError> {
        Ok(self.last.lock().unwrap().get(user_id).cloned())
    }

    async fn get_project_name(&self, project_id: &str) -> Result<Option<String>, TimeTrackingError> {
        Ok(self.projects.lock().unwrap().get(project_id).cloned())
    }

    async fn list_entries(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeEntry>, TimeTrackingError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(user_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.time_interval.start >= start && e.time_interval.start < end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
