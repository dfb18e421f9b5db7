//! Mention emails over SMTP.
//!
//! Disabled unless an [`EmailSender`] is handed to the notifier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, warn};

use super::{ChannelReport, DEFAULT_DELIVERY_TIMEOUT, with_timeout};
use crate::notification::error::NotifyError;
use crate::{Error, Result};

const CHANNEL: &str = "email";

/// A notification email ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Sends a single notification email.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: &NotificationEmail) -> Result<()>;
}

/// SMTP settings for [`SmtpEmailSender`].
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
    /// Base URL prepended to notification links, e.g. `https://sweet.example`.
    pub public_url: String,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("from_address", &self.from_address)
            .field("public_url", &self.public_url)
            .finish_non_exhaustive()
    }
}

impl SmtpConfig {
    /// Read SMTP settings from the environment. `Ok(None)` when `SMTP_HOST`
    /// is unset.
    pub fn from_env() -> Result<Option<Self>> {
        let env = |key: &str| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let Some(host) = env("SMTP_HOST") else {
            return Ok(None);
        };
        let port = match env("SMTP_PORT") {
            Some(port) => port
                .parse()
                .map_err(|_| Error::config(format!("Invalid SMTP_PORT: {}", port)))?,
            None => 587,
        };
        let from_address =
            env("SMTP_FROM").ok_or_else(|| Error::config("SMTP_FROM must be set with SMTP_HOST"))?;

        Ok(Some(Self {
            host,
            port,
            username: env("SMTP_USERNAME"),
            password: env("SMTP_PASSWORD"),
            from_address,
            public_url: env("PUBLIC_URL").unwrap_or_default(),
        }))
    }
}

/// lettre-backed email sender.
pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailSender {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let from: Mailbox = config
            .from_address
            .parse()
            .map_err(|e| Error::config(format!("Invalid SMTP_FROM: {}", e)))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| Error::config(format!("SMTP relay error: {}", e)))?
            .port(config.port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, email: &NotificationEmail) -> Result<()> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| Error::validation(format!("Invalid recipient address: {}", e)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .map_err(|e| Error::Other(format!("Failed to build email: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| Error::Other(format!("SMTP send failed: {}", e)))?;
        Ok(())
    }
}

/// Compose a notification email.
pub fn compose_email(
    to: &str,
    actor: Option<&str>,
    email_text: &str,
    plain_text: &str,
    link: &str,
) -> NotificationEmail {
    let subject = match actor {
        Some(actor) => format!("@{} {}", actor, email_text),
        None => email_text.to_string(),
    };
    NotificationEmail {
        to: to.to_string(),
        subject,
        body: format!("{}\n\n{}\n", plain_text, link),
    }
}

/// Delivers mention emails.
pub struct EmailChannel {
    sender: Arc<dyn EmailSender>,
    public_url: String,
    timeout: Duration,
}

impl EmailChannel {
    pub fn new(sender: Arc<dyn EmailSender>, public_url: impl Into<String>) -> Self {
        Self {
            sender,
            public_url: public_url.into(),
            timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Absolute link for a notification url.
    pub fn link(&self, url: &str) -> String {
        format!("{}{}", self.public_url.trim_end_matches('/'), url)
    }

    pub async fn deliver(&self, email: NotificationEmail) -> ChannelReport {
        let mut report = ChannelReport {
            attempted: 1,
            ..ChannelReport::default()
        };
        match with_timeout(self.timeout, self.sender.send(&email)).await {
            Ok(()) => {
                report.delivered = 1;
                debug!(subject = %email.subject, "Notification email sent");
            }
            Err(reason) => {
                warn!(error = %reason, "Notification email failed");
                report.failures.push(NotifyError::delivery(CHANNEL, reason));
            }
        }
        report
    }
}
