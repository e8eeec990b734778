// src/clockify_client.rs
//! Clockify REST client: workspace users, running and last timers, project
//! names and time entries for a range.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::time_util::parse_iso8601_duration;

pub const DEFAULT_CLOCKIFY_BASE_URL: &str = "https://api.clockify.me/api/v1";
const USERS_PAGE_SIZE: usize = 100;
const ENTRIES_PAGE_SIZE: usize = 200;

#[derive(Error, Debug)]
pub enum TimeTrackingError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Clockify API error: Status={status}, Message={message}")]
    ApiError { status: StatusCode, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackedUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// ISO-8601, e.g. `PT1H5M`. Absent while the timer runs.
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub time_interval: TimeInterval,
}

impl TimeEntry {
    pub fn is_running(&self) -> bool {
        self.time_interval.end.is_none()
    }

    /// Length of a finished entry: the reported duration, else `end - start`.
    pub fn elapsed(&self) -> Option<Duration> {
        let interval = &self.time_interval;
        interval
            .duration
            .as_deref()
            .and_then(parse_iso8601_duration)
            .or_else(|| interval.end.map(|end| end - interval.start))
            .filter(|d| *d >= Duration::zero())
    }
}

#[async_trait]
pub trait TimeTrackingApi: Send + Sync {
    async fn list_users(&self) -> Result<Vec<TrackedUser>, TimeTrackingError>;
    async fn get_running_entry(&self, user_id: &str) -> Result<Option<TimeEntry>, TimeTrackingError>;
    async fn get_last_entry(&self, user_id: &str) -> Result<Option<TimeEntry>, TimeTrackingError>;
    async fn get_project_name(&self, project_id: &str) -> Result<Option<String>, TimeTrackingError>;
    async fn list_entries(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeEntry>, TimeTrackingError>;
}

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    #[serde(default)]
    name: Option<String>,
}

pub struct ClockifyClient {
    http_client: Client,
    base_url: String,
    workspace_id: String,
    api_key: String,
    // Project names hardly ever change, so lookups are remembered per process.
    project_names: Mutex<HashMap<String, Option<String>>>,
}

impl ClockifyClient {
    pub fn new(
        base_url: &str,
        workspace_id: &str,
        api_key: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, TimeTrackingError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            workspace_id: workspace_id.to_string(),
            api_key: api_key.to_string(),
            project_names: Mutex::new(HashMap::new()),
        })
    }

    fn get(&self, endpoint: &str) -> RequestBuilder {
        let url = format!("{}/workspaces/{}/{}", self.base_url, self.workspace_id, endpoint);
        debug!("GET {}", url);
        self.http_client.get(url).header("X-Api-Key", &self.api_key)
    }

    async fn send_and_deserialize<T: DeserializeOwned>(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<T, TimeTrackingError> {
        let response = request_builder.send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(response.json::<T>().await?)
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Err(TimeTrackingError::RateLimitExceeded)
        } else {
            let error_body = response.text().await.unwrap_or_default();
            Err(TimeTrackingError::ApiError {
                status,
                message: error_body,
            })
        }
    }

    async fn first_entry(&self, request: RequestBuilder) -> Result<Option<TimeEntry>, TimeTrackingError> {
        let entries: Vec<TimeEntry> = self.send_and_deserialize(request).await?;
        Ok(entries.into_iter().next())
    }
}

fn clockify_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl TimeTrackingApi for ClockifyClient {
    async fn list_users(&self) -> Result<Vec<TrackedUser>, TimeTrackingError> {
        let mut all_users = Vec::new();
        let mut page = 1;
        loop {
            let request = self.get("users").query(&[
                ("page", page.to_string()),
                ("page-size", USERS_PAGE_SIZE.to_string()),
            ]);
            let users: Vec<TrackedUser> = self.send_and_deserialize(request).await?;
            let count = users.len();
            all_users.extend(users);
            if count < USERS_PAGE_SIZE {
                break;
            }
            page += 1;
        }
        Ok(all_users)
    }

    async fn get_running_entry(&self, user_id: &str) -> Result<Option<TimeEntry>, TimeTrackingError> {
        let request = self
            .get(&format!("user/{}/time-entries", user_id))
            .query(&[("in-progress", "true")]);
        self.first_entry(request).await
    }

    async fn get_last_entry(&self, user_id: &str) -> Result<Option<TimeEntry>, TimeTrackingError> {
        let request = self
            .get(&format!("user/{}/time-entries", user_id))
            .query(&[("page-size", "1")]);
        self.first_entry(request).await
    }

    async fn get_project_name(&self, project_id: &str) -> Result<Option<String>, TimeTrackingError> {
        if project_id.trim().is_empty() {
            return Ok(None);
        }
        if let Some(cached) = self.project_names.lock().await.get(project_id) {
            return Ok(cached.clone());
        }

        let request = self.get(&format!("projects/{}", project_id));
        let name = match self.send_and_deserialize::<ProjectResponse>(request).await {
            Ok(project) => project.name.filter(|n| !n.trim().is_empty()),
            Err(TimeTrackingError::ApiError { status, .. }) if status == StatusCode::NOT_FOUND => None,
            Err(e) => return Err(e),
        };
        self.project_names
            .lock()
            .await
            .insert(project_id.to_string(), name.clone());
        Ok(name)
    }

    async fn list_entries(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeEntry>, TimeTrackingError> {
        let mut all_entries = Vec::new();
        let mut page = 1;
        loop {
            let request = self.get(&format!("user/{}/time-entries", user_id)).query(&[
                ("start", clockify_timestamp(start)),
                ("end", clockify_timestamp(end)),
                ("page", page.to_string()),
                ("page-size", ENTRIES_PAGE_SIZE.to_string()),
            ]);
            let entries: Vec<TimeEntry> = self.send_and_deserialize(request).await?;
            let count = entries.len();
            all_entries.extend(entries);
            if count < ENTRIES_PAGE_SIZE {
                break;
            }
            page += 1;
        }
        Ok(all_entries)
    }
}
