//! Mobile push delivery through the Expo push service.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{ChannelReport, DEFAULT_DELIVERY_TIMEOUT, with_timeout};
use crate::database::repositories::PushTargetRepository;
use crate::notification::error::NotifyError;
use crate::utils::http_client::build_push_client;
use crate::utils::text::truncate_chars;
use crate::{Error, Result};

const CHANNEL: &str = "mobile_push";

/// Title of every mobile notification.
pub const MOBILE_PUSH_TITLE: &str = "New on Sweet 🐝";

const DEFAULT_EXPO_PUSH_URL: &str = "https://exp.host/--/api/v2/push/send";

/// Expo accepts at most this many messages per request.
const EXPO_MAX_MESSAGES_PER_REQUEST: usize = 100;

/// Sends one notification to a batch of device tokens.
///
/// The batch succeeds or fails as a whole.
#[async_trait]
pub trait MobilePushSender: Send + Sync {
    async fn send_batch(&self, tokens: &[String], title: &str, body: &str) -> Result<()>;
}

/// Expo push API settings.
#[derive(Debug, Clone)]
pub struct ExpoPushConfig {
    pub push_url: String,
    /// Sent as a bearer token when Expo enhanced security is enabled.
    pub access_token: Option<String>,
}

impl Default for ExpoPushConfig {
    fn default() -> Self {
        Self {
            push_url: DEFAULT_EXPO_PUSH_URL.to_string(),
            access_token: None,
        }
    }
}

impl ExpoPushConfig {
    /// Read the Expo configuration from the environment.
    ///
    /// Returns `Ok(None)` when `MOBILE_PUSH_ENABLED` is set to a false value.
    pub fn from_env() -> Result<Option<Self>> {
        if let Ok(enabled) = std::env::var("MOBILE_PUSH_ENABLED") {
            match enabled.trim().to_ascii_lowercase().as_str() {
                "" | "1" | "true" | "yes" | "on" => {}
                "0" | "false" | "no" | "off" => return Ok(None),
                other => {
                    return Err(Error::config(format!(
                        "Invalid MOBILE_PUSH_ENABLED: {}",
                        other
                    )));
                }
            }
        }

        let push_url = std::env::var("EXPO_PUSH_URL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_EXPO_PUSH_URL.to_string());
        url::Url::parse(&push_url)
            .map_err(|e| Error::config(format!("Invalid EXPO_PUSH_URL: {}", e)))?;

        let access_token = std::env::var("EXPO_ACCESS_TOKEN")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Ok(Some(Self {
            push_url,
            access_token,
        }))
    }
}

#[derive(Debug, Serialize)]
struct ExpoMessage<'a> {
    to: &'a str,
    title: &'a str,
    body: &'a str,
    sound: &'static str,
}

#[derive(Debug, Default, Deserialize)]
struct ExpoResponse {
    #[serde(default)]
    data: Vec<ExpoTicket>,
    #[serde(default)]
    errors: Vec<ExpoRequestError>,
}

#[derive(Debug, Deserialize)]
struct ExpoTicket {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ExpoRequestError {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

/// Production mobile push sender.
pub struct ExpoPushSender {
    config: ExpoPushConfig,
    client: reqwest::Client,
}

impl ExpoPushSender {
    pub fn new(config: ExpoPushConfig, request_timeout: Duration) -> Result<Self> {
        Ok(Self {
            config,
            client: build_push_client(request_timeout)?,
        })
    }

    async fn send_chunk(&self, messages: &[ExpoMessage<'_>]) -> Result<()> {
        let mut request = self
            .client
            .post(&self.config.push_url)
            .header("Accept", "application/json")
            .json(messages);
        if let Some(token) = &self.config.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::Other(format!(
                "Expo push failed: status {} body {}",
                status,
                truncate_chars(&text, 500)
            )));
        }

        let parsed: ExpoResponse = serde_json::from_str(&text)?;
        if let Some(first) = parsed.errors.first() {
            return Err(Error::Other(format!(
                "Expo push rejected request: {} {}",
                first.code.as_deref().unwrap_or("UNKNOWN"),
                first.message
            )));
        }

        // Per-device errors (e.g. DeviceNotRegistered) do not fail the batch.
        for (message, ticket) in messages.iter().zip(parsed.data.iter()) {
            if ticket.status != "ok" {
                warn!(
                    token = %message.to,
                    message = ticket.message.as_deref().unwrap_or(""),
                    details = ?ticket.details,
                    "Expo push ticket error"
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MobilePushSender for ExpoPushSender {
    async fn send_batch(&self, tokens: &[String], title: &str, body: &str) -> Result<()> {
        let messages: Vec<ExpoMessage<'_>> = tokens
            .iter()
            .map(|token| ExpoMessage {
                to: token,
                title,
                body,
                sound: "default",
            })
            .collect();

        for chunk in messages.chunks(EXPO_MAX_MESSAGES_PER_REQUEST) {
            self.send_chunk(chunk).await?;
        }
        Ok(())
    }
}

/// Tokens in first-seen order with duplicates dropped.
pub(crate) fn unique_tokens(tokens: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(tokens.len());
    tokens
        .into_iter()
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

/// Delivers a notification to a user's mobile devices.
pub struct MobilePushChannel {
    sender: Arc<dyn MobilePushSender>,
    targets: Arc<dyn PushTargetRepository>,
    timeout: Duration,
}

impl MobilePushChannel {
    pub fn new(sender: Arc<dyn MobilePushSender>, targets: Arc<dyn PushTargetRepository>) -> Self {
        Self {
            sender,
            targets,
            timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Collapse duplicate tokens for `user_id` and send one batch to the
    /// remaining ones. The stored tokens are repaired even when the send
    /// fails.
    pub async fn deliver(&self, user_id: &str, tokens: Vec<String>, body: &str) -> ChannelReport {
        if tokens.is_empty() {
            return ChannelReport::skipped();
        }

        let tokens = unique_tokens(tokens);
        let mut report = ChannelReport {
            attempted: tokens.len(),
            ..ChannelReport::default()
        };

        let (repaired, sent) = tokio::join!(
            self.targets.dedupe_expo_tokens(user_id),
            with_timeout(
                self.timeout,
                self.sender.send_batch(&tokens, MOBILE_PUSH_TITLE, body)
            ),
        );

        match repaired {
            Ok(removed) => {
                report.pruned = removed as usize;
                if removed > 0 {
                    info!(user_id = %user_id, removed, "Removed duplicate Expo push tokens");
                }
            }
            Err(e) => warn!(
                user_id = %user_id,
                error = %e,
                "Failed to de-duplicate Expo push tokens"
            ),
        }

        match sent {
            Ok(()) => {
                report.delivered = tokens.len();
                debug!(user_id = %user_id, tokens = tokens.len(), "Mobile push sent");
            }
            Err(reason) => {
                warn!(user_id = %user_id, error = %reason, "Mobile push failed");
                report.failures.push(NotifyError::delivery(CHANNEL, reason));
            }
        }
        report
    }
}
