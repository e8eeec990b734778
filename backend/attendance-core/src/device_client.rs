// src/device_client.rs
//! Client for the biometric terminal's REST API (ZKBio-style), plus the
//! session wrapper that re-authenticates once when the JWT has expired.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::time_util::{parse_device_timestamp, DEVICE_TIMESTAMP_FORMAT};

const TRANSACTIONS_PATH: &str = "iclock/api/transactions/";
const REPORT_PATH: &str = "att/api/transactionReport/";
const TOKEN_PATH: &str = "jwt-api-token-auth/";
const TRANSACTIONS_PAGE_SIZE: u32 = 1000;
const REPORT_PAGE_SIZE: u32 = 500;
const TOKEN_NOT_VALID: &str = "token_not_valid";

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Device token expired or invalid")]
    AuthExpired,

    #[error("Device API error: Status={status}, Message={message}")]
    ApiError { status: StatusCode, message: String },

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Missing device username or password")]
    MissingCredentials,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    })
}

/// One punch as the device reports it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawPunch {
    #[serde(deserialize_with = "string_or_number")]
    pub emp_code: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    /// Device-local wall time, kept as sent.
    pub punch_time: String,
    #[serde(default)]
    pub punch_state_display: String,
}

impl RawPunch {
    pub fn display_name(&self) -> String {
        let first = self.first_name.as_deref().unwrap_or_default().trim();
        match self.last_name.as_deref().map(str::trim) {
            Some(last) if !last.is_empty() => format!("{} {}", first, last),
            _ => first.to_string(),
        }
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        parse_device_timestamp(&self.punch_time)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PunchPage {
    #[serde(default)]
    data: Vec<RawPunch>,
    #[serde(default)]
    next: Option<String>,
}

/// One page of the bulk transaction report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportPage {
    pub records: Vec<RawPunch>,
    /// Absolute URL of the next page, if any.
    pub next: Option<String>,
}

/// `None` when the body is JSON but not a page of punches.
fn report_page_from_json(json: Value) -> Option<ReportPage> {
    match serde_json::from_value::<PunchPage>(json) {
        Ok(page) => Some(ReportPage {
            records: page.data,
            next: page.next.filter(|n| !n.trim().is_empty()),
        }),
        Err(e) => {
            warn!("Transaction report page is malformed ({}); stopping", e);
            None
        }
    }
}

/// Parses the `next` link of a transactions page. A link that was already
/// fetched ends pagination.
fn next_transactions_url(
    next: Option<&str>,
    visited: &mut HashSet<String>,
) -> Result<Option<Url>, DeviceError> {
    let Some(next) = next.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    let url = Url::parse(next)?;
    if !visited.insert(url.to_string()) {
        warn!("Transactions pagination repeated {}; stopping", url);
        return Ok(None);
    }
    Ok(Some(url))
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// All punches between two device-local times. Signals
    /// [`DeviceError::AuthExpired`] when the token is rejected.
    async fn fetch_transactions(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<RawPunch>, DeviceError>;

    /// One page of the bulk report. `cursor` is the `next` link of the
    /// previous page. `Ok(None)` means there is nothing more to read.
    async fn fetch_report_page(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cursor: Option<&str>,
    ) -> Result<Option<ReportPage>, DeviceError>;

    async fn install_token(&self, token: String);
}

#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn reauthenticate(&self, username: &str, password: &str) -> Result<String, DeviceError>;
}

pub struct ZkBioClient {
    http_client: Client,
    base_url: Url,
    token: Mutex<Option<String>>,
}

impl ZkBioClient {
    pub fn new(base_url: &str, initial_token: Option<String>, timeout: Duration) -> Result<Self, DeviceError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        // `Url::join` drops the last segment unless the base ends in '/'
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{}/", base_url))?
        };

        Ok(Self {
            http_client,
            base_url,
            token: Mutex::new(initial_token.filter(|t| !t.trim().is_empty())),
        })
    }

    async fn authorized_get(&self, url: Url) -> Result<reqwest::Response, DeviceError> {
        let token = self.token.lock().await.clone();
        let mut request = self.http_client.get(url).header(CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("JWT {}", token));
        }
        Ok(request.send().await?)
    }

    /// Reads a response body as JSON, mapping the device's auth failures to
    /// [`DeviceError::AuthExpired`]. A successful non-JSON body yields `None`.
    async fn read_json(response: reqwest::Response) -> Result<(StatusCode, Option<Value>), DeviceError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(DeviceError::AuthExpired);
        }
        let body = response.text().await?;
        let json = serde_json::from_str::<Value>(&body).ok();
        if let Some(code) = json.as_ref().and_then(|v| v.get("code")).and_then(Value::as_str) {
            if code == TOKEN_NOT_VALID {
                return Err(DeviceError::AuthExpired);
            }
        }
        if !status.is_success() && json.is_none() {
            return Err(DeviceError::ApiError { status, message: body });
        }
        Ok((status, json))
    }
}

#[async_trait]
impl DeviceApi for ZkBioClient {
    async fn fetch_transactions(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<RawPunch>, DeviceError> {
        let mut url = self.base_url.join(TRANSACTIONS_PATH)?;
        url.query_pairs_mut()
            .append_pair("start_time", &start.format(DEVICE_TIMESTAMP_FORMAT).to_string())
            .append_pair("end_time", &end.format(DEVICE_TIMESTAMP_FORMAT).to_string())
            .append_pair("page_size", &TRANSACTIONS_PAGE_SIZE.to_string());

        let mut punches = Vec::new();
        let mut visited = HashSet::from([url.to_string()]);
        let mut next = Some(url);
        while let Some(page_url) = next.take() {
            debug!("GET {}", page_url);
            let (status, json) = Self::read_json(self.authorized_get(page_url).await?).await?;
            let Some(json) = json.filter(|_| status.is_success()) else {
                return Err(DeviceError::ApiError {
                    status,
                    message: "unexpected transactions response".to_string(),
                });
            };
            let page: PunchPage = serde_json::from_value(json)?;
            punches.extend(page.data);
            next = next_transactions_url(page.next.as_deref(), &mut visited)?;
        }
        Ok(punches)
    }

    async fn fetch_report_page(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cursor: Option<&str>,
    ) -> Result<Option<ReportPage>, DeviceError> {
        let url = match cursor {
            Some(next) => Url::parse(next)?,
            None => {
                let mut url = self.base_url.join(REPORT_PATH)?;
                url.query_pairs_mut()
                    .append_pair("start_date", &start.format("%Y-%m-%d").to_string())
                    .append_pair("end_date", &end.format("%Y-%m-%d").to_string())
                    .append_pair("page_size", &REPORT_PAGE_SIZE.to_string());
                url
            }
        };

        debug!("GET {}", url);
        let (status, json) = match Self::read_json(self.authorized_get(url).await?).await {
            Ok(read) => read,
            Err(DeviceError::ApiError { status, .. }) => {
                warn!("Transaction report returned {} with a non-JSON body; stopping", status);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let Some(json) = json.filter(|_| status.is_success()) else {
            warn!("Transaction report returned {}; stopping", status);
            return Ok(None);
        };
        Ok(report_page_from_json(json))
    }

    async fn install_token(&self, token: String) {
        *self.token.lock().await = Some(token);
    }
}

#[async_trait]
impl CredentialRefresher for ZkBioClient {
    async fn reauthenticate(&self, username: &str, password: &str) -> Result<String, DeviceError> {
        if username.is_empty() || password.is_empty() {
            return Err(DeviceError::MissingCredentials);
        }
        let url = self.base_url.join(TOKEN_PATH)?;
        let response = self
            .http_client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(&TokenRequest { username, password })
            .send()
            .await?;

        if response.status().is_success() {
            let token_response = response.json::<TokenResponse>().await?;
            Ok(token_response.token)
        } else {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            Err(DeviceError::TokenRefreshFailed(format!("{}: {}", status, error_body)))
        }
    }
}

#[derive(Clone, Default)]
pub struct DeviceCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for DeviceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Device access with transparent re-authentication: a request rejected for
/// an expired token is retried exactly once with a fresh token.
#[derive(Clone)]
pub struct DeviceSession {
    api: Arc<dyn DeviceApi>,
    refresher: Arc<dyn CredentialRefresher>,
    credentials: DeviceCredentials,
}

impl DeviceSession {
    pub fn new(
        api: Arc<dyn DeviceApi>,
        refresher: Arc<dyn CredentialRefresher>,
        credentials: DeviceCredentials,
    ) -> Self {
        Self {
            api,
            refresher,
            credentials,
        }
    }

    /// Obtains a new token and installs it on the API client.
    pub async fn refresh_token(&self) -> Result<String, DeviceError> {
        if self.credentials.username.is_empty() || self.credentials.password.is_empty() {
            return Err(DeviceError::MissingCredentials);
        }
        let token = self
            .refresher
            .reauthenticate(&self.credentials.username, &self.credentials.password)
            .await?;
        self.api.install_token(token.clone()).await;
        info!("Obtained a new device token");
        Ok(token)
    }

    pub async fn fetch_transactions(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<RawPunch>, DeviceError> {
        let mut reauthenticated = false;
        loop {
            match self.api.fetch_transactions(start, end).await {
                Err(DeviceError::AuthExpired) if !reauthenticated => {
                    warn!("Device token expired or invalid. Fetching a new token...");
                    self.refresh_token().await?;
                    reauthenticated = true;
                }
                result => return result,
            }
        }
    }

    pub async fn fetch_report_page(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cursor: Option<&str>,
    ) -> Result<Option<ReportPage>, DeviceError> {
        let mut reauthenticated = false;
        loop {
            match self.api.fetch_report_page(start, end, cursor).await {
                Err(DeviceError::AuthExpired) if !reauthenticated => {
                    warn!("Device token expired during report. Fetching a new token...");
                    self.refresh_token().await?;
                    reauthenticated = true;
                }
                result => return result,
            }
        }
    }

    /// Every report record in `[start, end]`, following `next` links until the
    /// device stops returning pages.
    pub async fn fetch_report(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<RawPunch>, DeviceError> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let Some(page) = self.fetch_report_page(start, end, cursor.as_deref()).await? else {
                break;
            };
            records.extend(page.records);
            match page.next {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }
        info!("Fetched {} report records for {} to {}", records.len(), start, end);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn punch_accepts_numeric_and_string_codes() {
        let numeric: RawPunch = serde_json::from_str(
            r#"{"emp_code": 101, "first_name": "Ada", "last_name": "Lovelace",
                "punch_time": "2024-01-01 09:00:00", "punch_state_display": "Check In"}"#,
        )
        .unwrap();
        assert_eq!(numeric.emp_code, "101");
        assert_eq!(numeric.display_name(), "Ada Lovelace");

        let text: RawPunch = serde_json::from_str(
            r#"{"emp_code": "E-7", "first_name": "Linus", "last_name": null,
                "punch_time": "2024-01-01 09:00:00", "punch_state_display": "Check Out"}"#,
        )
        .unwrap();
        assert_eq!(text.emp_code, "E-7");
        assert_eq!(text.display_name(), "Linus");
        assert!(text.timestamp().is_some());
    }

    #[test]
    fn page_without_data_is_empty() {
        let page: PunchPage = serde_json::from_str(r#"{"count": 0, "next": null}"#).unwrap();
        assert!(page.data.is_empty());
        assert!(page.next.is_none());
    }

    #[test]
    fn malformed_report_page_ends_pagination() {
        let missing_time = serde_json::json!({
            "data": [{"emp_code": "101", "first_name": "Ada"}],
            "next": null
        });
        assert_eq!(report_page_from_json(missing_time), None);
        assert_eq!(report_page_from_json(serde_json::json!({"data": "oops"})), None);

        let page = report_page_from_json(serde_json::json!({
            "data": [{"emp_code": "101", "first_name": "Ada",
                      "punch_time": "2024-01-01 09:00:00", "punch_state_display": "Check In"}],
            "next": " "
        }))
        .unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.next, None);
    }

    #[test]
    fn repeated_transactions_link_stops_paging() {
        let first = "http://10.0.0.5:8081/iclock/api/transactions/?page=1";
        let second = "http://10.0.0.5:8081/iclock/api/transactions/?page=2";
        let mut visited = HashSet::from([Url::parse(first).unwrap().to_string()]);

        let next = next_transactions_url(Some(second), &mut visited).unwrap();
        assert_eq!(next.map(String::from).as_deref(), Some(second));
        assert_eq!(next_transactions_url(Some(second), &mut visited).unwrap(), None);
        assert_eq!(next_transactions_url(Some(first), &mut visited).unwrap(), None);
        assert_eq!(next_transactions_url(None, &mut visited).unwrap(), None);
        assert_eq!(next_transactions_url(Some(""), &mut visited).unwrap(), None);
    }

    #[test]
    fn base_url_gains_a_trailing_slash() {
        let client = ZkBioClient::new("http://10.0.0.5:8081", None, Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.base_url.join(TRANSACTIONS_PATH).unwrap().as_str(),
            "http://10.0.0.5:8081/iclock/api/transactions/"
        );
    }

    #[test]
    fn credentials_are_redacted_in_debug_output() {
        let creds = DeviceCredentials {
            username: "admin".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}
