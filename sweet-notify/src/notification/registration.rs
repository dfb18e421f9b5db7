//! Push target registration and notification settings.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;
use tracing::info;

use crate::database::models::{NotificationSettings, NotificationSettingsPatch, UserDbModel};
use crate::database::repositories::{PushTargetRepository, UserRepository};
use crate::{Error, Result};

static EXPO_TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?:ExponentPushToken|ExpoPushToken)\[.+\]|(?i:[a-z\d]{8}-[a-z\d]{4}-[a-z\d]{4}-[a-z\d]{4}-[a-z\d]{12}))$",
    )
    .unwrap()
});

/// Whether `token` looks like an Expo push token.
pub fn is_expo_push_token(token: &str) -> bool {
    EXPO_TOKEN_REGEX.is_match(token)
}

#[derive(Debug, Deserialize)]
struct SubscriptionShape {
    endpoint: String,
    keys: SubscriptionKeysShape,
}

#[derive(Debug, Deserialize)]
struct SubscriptionKeysShape {
    p256dh: String,
    auth: String,
}

/// Registers push targets and updates notification settings for users.
#[derive(Clone)]
pub struct PushRegistration {
    users: Arc<dyn UserRepository>,
    targets: Arc<dyn PushTargetRepository>,
}

impl PushRegistration {
    pub fn new(users: Arc<dyn UserRepository>, targets: Arc<dyn PushTargetRepository>) -> Self {
        Self { users, targets }
    }

    async fn require_user(&self, user_id: &str) -> Result<UserDbModel> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| Error::not_found("User", user_id))
    }

    /// Store an Expo token for the user. Re-registering a known token is
    /// allowed; duplicates are collapsed at send time.
    pub async fn register_expo_token(&self, user_id: &str, token: &str) -> Result<()> {
        let token = token.trim();
        if !is_expo_push_token(token) {
            return Err(Error::validation(format!(
                "Not a valid Expo push token: {}",
                token
            )));
        }
        self.require_user(user_id).await?;
        self.targets.add_expo_token(user_id, token).await?;
        info!(user_id = %user_id, "Registered Expo push token");
        Ok(())
    }

    /// Store a serialized browser push subscription for the user, as given.
    pub async fn register_web_push_subscription(
        &self,
        user_id: &str,
        subscription: &str,
    ) -> Result<()> {
        let shape: SubscriptionShape = serde_json::from_str(subscription).map_err(|e| {
            Error::validation(format!("Invalid web push subscription: {}", e))
        })?;
        if shape.endpoint.is_empty() || shape.keys.p256dh.is_empty() || shape.keys.auth.is_empty()
        {
            return Err(Error::validation(
                "Web push subscription needs an endpoint and both keys",
            ));
        }
        url::Url::parse(&shape.endpoint)
            .map_err(|e| Error::validation(format!("Invalid push endpoint: {}", e)))?;

        self.require_user(user_id).await?;
        self.targets
            .add_web_push_subscription(user_id, subscription)
            .await?;
        info!(user_id = %user_id, "Registered web push subscription");
        Ok(())
    }

    /// Merge `patch` into the user's notification settings and return the
    /// result.
    pub async fn update_settings(
        &self,
        user_id: &str,
        patch: NotificationSettingsPatch,
    ) -> Result<NotificationSettings> {
        if patch.is_empty() {
            return Err(Error::validation("No new settings provided"));
        }
        let user = self.require_user(user_id).await?;
        let settings = patch.apply(user.settings());
        self.users.update_settings(user_id, settings).await?;
        Ok(settings)
    }
}
