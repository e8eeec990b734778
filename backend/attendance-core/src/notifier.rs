// src/notifier.rs
//! Chat notifications for punches and remote sign-ins.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::time_util::format_message_time;

static WAIT_SECONDS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)wait\s+(\d+)\s+seconds?").expect("wait-seconds pattern compiles")
});

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Failed to send notification: {0}")]
    SendError(String),

    #[error("Notification rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("Notifier not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for NotificationError {
    fn from(e: reqwest::Error) -> Self {
        NotificationError::SendError(e.to_string())
    }
}

/// Classifies a failure text from the chat server. Rate-limit replies become
/// [`NotificationError::RateLimited`], carrying the server's `wait N seconds`
/// hint when it gives one.
pub fn classify_failure(text: &str) -> NotificationError {
    let lowered = text.to_ascii_lowercase();
    let retry_after = WAIT_SECONDS_RE
        .captures(text)
        .and_then(|caps| caps[1].parse::<u64>().ok())
        .map(Duration::from_secs);

    if retry_after.is_some()
        || lowered.contains("too many requests")
        || lowered.contains("error-too-many-requests")
    {
        NotificationError::RateLimited {
            retry_after,
            message: text.to_string(),
        }
    } else {
        NotificationError::SendError(text.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub label: String,
    /// Local wall time of the event.
    pub timestamp: NaiveDateTime,
    pub status: String,
    pub project: Option<String>,
    pub is_remote: bool,
}

impl Notification {
    pub fn onsite(label: impl Into<String>, timestamp: NaiveDateTime, status: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            timestamp,
            status: status.into(),
            project: None,
            is_remote: false,
        }
    }

    pub fn remote(
        label: impl Into<String>,
        timestamp: NaiveDateTime,
        status: impl Into<String>,
        project: Option<String>,
    ) -> Self {
        Self {
            label: label.into(),
            timestamp,
            status: status.into(),
            project,
            is_remote: true,
        }
    }

    /// `"{label} | {time} | {status}"`; remote messages add ` | {project}`
    /// after the label when a project is known.
    pub fn text(&self) -> String {
        let time = format_message_time(self.timestamp);
        match self.project.as_deref().filter(|p| self.is_remote && !p.is_empty()) {
            Some(project) => format!("{} | {} | {} | {}", self.label, project, time, self.status),
            None => format!("{} | {} | {}", self.label, time, self.status),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
}

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Posts to a Rocket.Chat channel through `chat.postMessage`.
pub struct RocketChatNotifier {
    http_client: Client,
    server_url: String,
    auth_token: String,
    user_id: String,
    channel: String,
}

impl RocketChatNotifier {
    pub fn new(
        server_url: &str,
        auth_token: &str,
        user_id: &str,
        channel: &str,
        timeout: Duration,
    ) -> Result<Self, NotificationError> {
        for (name, value) in [
            ("ROCKET_CHAT_SERVER_URL", server_url),
            ("ROCKET_CHAT_AUTH_TOKEN", auth_token),
            ("ROCKET_CHAT_USER_ID", user_id),
            ("CHANNEL_NAME", channel),
        ] {
            if value.trim().is_empty() {
                return Err(NotificationError::NotConfigured(format!("{} is empty", name)));
            }
        }
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            server_url: server_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.to_string(),
            user_id: user_id.to_string(),
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for RocketChatNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let text = notification.text();
        debug!("Posting to {}: {}", self.channel, text);

        let response = self
            .http_client
            .post(format!("{}/api/v1/chat.postMessage", self.server_url))
            .header("X-Auth-Token", &self.auth_token)
            .header("X-User-Id", &self.user_id)
            .json(&PostMessage {
                channel: &self.channel,
                text: &text,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(match classify_failure(&body) {
                limited @ NotificationError::RateLimited { .. } => limited,
                _ => NotificationError::RateLimited {
                    retry_after: None,
                    message: body,
                },
            });
        }
        if !status.is_success() {
            return Err(classify_failure(&format!("{}: {}", status, body)));
        }
        match serde_json::from_str::<PostMessageResponse>(&body) {
            Ok(reply) if !reply.success => Err(classify_failure(
                reply.error.as_deref().unwrap_or("chat server reported failure"),
            )),
            _ => {
                info!("Sent notification for {}", notification.label);
                Ok(())
            }
        }
    }
}

/// Upper bound on a server-supplied rate-limit wait.
pub const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Used when the server reports a rate limit without a wait hint.
    pub rate_limit_delay: Duration,
    /// Minimum spacing between any two sends.
    pub min_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            rate_limit_delay: Duration::from_secs(10),
            min_interval: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// `base_delay * 2^(attempt - 1)` for the 1-based attempt that just failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Wraps a notifier with global send spacing and bounded retries.
pub struct RetryingNotifier {
    inner: Arc<dyn Notifier>,
    policy: RetryPolicy,
    last_sent: Mutex<Option<Instant>>,
}

impl RetryingNotifier {
    pub fn new(inner: Arc<dyn Notifier>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            last_sent: Mutex::new(None),
        }
    }

    // Holds the lock while waiting so concurrent senders queue up behind it.
    async fn send_spaced(&self, notification: &Notification) -> Result<(), NotificationError> {
        let mut last_sent = self.last_sent.lock().await;
        if let Some(previous) = *last_sent {
            let elapsed = previous.elapsed();
            if elapsed < self.policy.min_interval {
                sleep(self.policy.min_interval - elapsed).await;
            }
        }
        let result = self.inner.send(notification).await;
        *last_sent = Some(Instant::now());
        result
    }

    fn retry_delay(&self, attempt: u32, error: &NotificationError) -> Duration {
        match error {
            NotificationError::RateLimited { retry_after, .. } => {
                let wait = retry_after.unwrap_or(self.policy.rate_limit_delay);
                if wait > MAX_RATE_LIMIT_WAIT {
                    warn!("Rate-limit wait of {:?} capped at {:?}", wait, MAX_RATE_LIMIT_WAIT);
                }
                wait.min(MAX_RATE_LIMIT_WAIT)
            }
            _ => {
                let base = self.policy.backoff(attempt);
                let jitter_cap = (base.as_millis() / 4) as u64;
                let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
                base + Duration::from_millis(jitter)
            }
        }
    }
}

#[async_trait]
impl Notifier for RetryingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.send_spaced(notification).await {
                Ok(()) => return Ok(()),
                Err(e @ NotificationError::NotConfigured(_)) => return Err(e),
                Err(e) => e,
            };
            if attempt >= max_attempts {
                error!(
                    "Giving up on notification for {} after {} attempts: {}",
                    notification.label, attempt, error
                );
                return Err(error);
            }
            let delay = self.retry_delay(attempt, &error);
            warn!(
                "Notification attempt {}/{} failed: {}. Retrying in {:?}",
                attempt, max_attempts, error, delay
            );
            sleep(delay).await;
        }
    }
}
