// src/config.rs
use chrono::{FixedOffset, Local, Offset};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::clockify_client::DEFAULT_CLOCKIFY_BASE_URL;
use crate::device_client::DeviceCredentials;
use crate::error::AppError;
use crate::notifier::RetryPolicy;

pub const PROCESSED_PUNCHES_FILE: &str = "processed_punches.json";
pub const SYNC_CURSOR_FILE: &str = "sync_cursor.json";
pub const TIMER_STATES_FILE: &str = "timer_states.json";

fn default_clockify_base_url() -> String {
    DEFAULT_CLOCKIFY_BASE_URL.to_string()
}
fn default_ledger_path() -> PathBuf {
    PathBuf::from("attendance")
}
fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}
fn default_onsite_poll_secs() -> u64 {
    60
}
fn default_remote_poll_secs() -> u64 {
    10
}
fn default_overlap_secs() -> i64 {
    10
}
fn default_user_delay_ms() -> u64 {
    200
}
fn default_notify_min_interval_ms() -> u64 {
    1000
}
fn default_notify_max_attempts() -> u32 {
    3
}
fn default_notify_base_delay_ms() -> u64 {
    500
}
fn default_notify_rate_limit_delay_secs() -> u64 {
    10
}
fn default_http_timeout_secs() -> u64 {
    30
}

/// Environment configuration. Device and time-tracking credentials are
/// required; chat settings may be empty, in which case sending reports
/// "not configured".
#[derive(Deserialize, Clone)]
pub struct AppConfig {
    // Device
    pub device_url: String,
    pub device_username: String,
    pub device_password: String,
    #[serde(default)]
    pub jwt_token: Option<String>,

    // Time tracking
    pub clockify_api_key: String,
    pub clockify_workspace_id: String,
    #[serde(default = "default_clockify_base_url")]
    pub clockify_base_url: String,

    // Chat
    #[serde(default)]
    pub rocket_chat_server_url: String,
    #[serde(default)]
    pub rocket_chat_auth_token: String,
    #[serde(default)]
    pub rocket_chat_user_id: String,
    #[serde(default)]
    pub channel_name: String,

    // Files
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    // Cadence and tuning
    #[serde(default = "default_onsite_poll_secs")]
    pub onsite_poll_secs: u64,
    #[serde(default = "default_remote_poll_secs")]
    pub remote_poll_secs: u64,
    #[serde(default = "default_overlap_secs")]
    pub overlap_secs: i64,
    #[serde(default = "default_user_delay_ms")]
    pub user_delay_ms: u64,
    #[serde(default = "default_notify_min_interval_ms")]
    pub notify_min_interval_ms: u64,
    #[serde(default = "default_notify_max_attempts")]
    pub notify_max_attempts: u32,
    #[serde(default = "default_notify_base_delay_ms")]
    pub notify_base_delay_ms: u64,
    #[serde(default = "default_notify_rate_limit_delay_secs")]
    pub notify_rate_limit_delay_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

fn from_envy(e: envy::Error) -> AppError {
    match e {
        envy::Error::MissingValue(field) => AppError::MissingEnvVar(field.to_uppercase()),
        other => AppError::Config(other.to_string()),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();
        envy::from_env::<AppConfig>().map_err(from_envy)
    }

    pub fn from_pairs<I>(pairs: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(pairs).map_err(from_envy)
    }

    /// Offset used to read device timestamps and to place remote entries on
    /// a local day. Falls back to the host's current offset.
    pub fn utc_offset(&self) -> Result<FixedOffset, AppError> {
        match self.utc_offset_minutes {
            Some(minutes) => FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
                AppError::Config(format!("UTC_OFFSET_MINUTES out of range: {}", minutes))
            }),
            None => Ok(Local::now().offset().fix()),
        }
    }

    pub fn device_credentials(&self) -> DeviceCredentials {
        DeviceCredentials {
            username: self.device_username.clone(),
            password: self.device_password.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.notify_max_attempts.max(1),
            base_delay: Duration::from_millis(self.notify_base_delay_ms),
            rate_limit_delay: Duration::from_secs(self.notify_rate_limit_delay_secs),
            min_interval: Duration::from_millis(self.notify_min_interval_ms),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn onsite_interval(&self) -> Duration {
        Duration::from_secs(self.onsite_poll_secs.max(1))
    }

    pub fn remote_interval(&self) -> Duration {
        Duration::from_secs(self.remote_poll_secs.max(1))
    }

    pub fn overlap(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.overlap_secs.max(0))
    }

    pub fn user_delay(&self) -> Duration {
        Duration::from_millis(self.user_delay_ms)
    }

    pub fn processed_punches_path(&self) -> PathBuf {
        self.state_dir.join(PROCESSED_PUNCHES_FILE)
    }

    pub fn sync_cursor_path(&self) -> PathBuf {
        self.state_dir.join(SYNC_CURSOR_FILE)
    }

    pub fn timer_states_path(&self) -> PathBuf {
        self.state_dir.join(TIMER_STATES_FILE)
    }
}
