//! Delivery channels.
//!
//! This module provides the channels a notification is delivered through:
//! - Web push (one encrypted request per browser subscription)
//! - Mobile push (one batched Expo request per notification)
//! - Email (optional, mention emails over SMTP)
//!
//! Each channel wraps a sender trait so the transport can be swapped out.

mod email;
mod mobile_push;
mod web_push;

pub use email::{
    EmailChannel, EmailSender, NotificationEmail, SmtpConfig, SmtpEmailSender, compose_email,
};
pub use mobile_push::{
    ExpoPushConfig, ExpoPushSender, MOBILE_PUSH_TITLE, MobilePushChannel, MobilePushSender,
};
pub use web_push::{
    VapidWebPushSender, WebPushChannel, WebPushConfig, WebPushMessage, WebPushSender,
};

use std::time::Duration;

use super::error::NotifyError;

/// Default bound on a single delivery call.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// What happened on one channel during one notification.
#[derive(Debug, Default)]
pub struct ChannelReport {
    /// Targets the channel tried to reach.
    pub attempted: usize,
    /// Targets that accepted the notification.
    pub delivered: usize,
    /// Targets removed from the notifiee (failed web push subscriptions,
    /// duplicate Expo tokens).
    pub pruned: usize,
    pub failures: Vec<NotifyError>,
}

impl ChannelReport {
    /// The channel had nothing to do.
    pub fn skipped() -> Self {
        Self::default()
    }

    pub fn is_skipped(&self) -> bool {
        self.attempted == 0
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Run `fut` under `limit`, folding a timeout into the error path.
pub(crate) async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, String>
where
    F: std::future::Future<Output = crate::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {:?}", limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout() {
        let ok = with_timeout(Duration::from_secs(1), async { Ok(3) }).await;
        assert_eq!(ok, Ok(3));

        let err: Result<(), String> = with_timeout(Duration::from_secs(1), async {
            Err(crate::Error::Other("boom".to_string()))
        })
        .await;
        assert_eq!(err, Err("boom".to_string()));

        let slow: Result<(), String> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(slow.unwrap_err().starts_with("timed out"));
    }

    #[test]
    fn test_skipped_report() {
        let report = ChannelReport::skipped();
        assert!(report.is_skipped());
        assert!(!report.has_failures());
    }
}
