//! User database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User database model.
///
/// Only the fields the notification pipeline reads are modelled here; push
/// targets and the notification ledger live in their own tables.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserDbModel {
    /// Unique identifier (UUID)
    pub id: String,
    /// Unique username, rendered as `@username`
    pub username: String,
    /// Optional email address, used for mention emails
    pub email: Option<String>,
    /// Whether the user has a custom profile image
    pub image_enabled: bool,
    /// Profile image reference
    pub image: Option<String>,
    /// Opt-in flag for mobile (Expo) notifications
    pub send_mobile_notifications: bool,
    /// Opt-in flag for mention emails
    pub send_mention_emails: bool,
    /// Unix epoch milliseconds (UTC) when the user was created.
    pub created_at: i64,
    /// Unix epoch milliseconds (UTC) when the user was last updated.
    pub updated_at: i64,
}

impl UserDbModel {
    /// Create a new user with notifications opted out.
    pub fn new(username: impl Into<String>) -> Self {
        let now = crate::database::time::now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.into(),
            email: None,
            image_enabled: false,
            image: None,
            send_mobile_notifications: false,
            send_mention_emails: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// The profile image, if the user enabled one.
    pub fn profile_image(&self) -> Option<&str> {
        if self.image_enabled {
            self.image.as_deref().filter(|image| !image.is_empty())
        } else {
            None
        }
    }

    pub fn settings(&self) -> NotificationSettings {
        NotificationSettings {
            send_mobile_notifications: self.send_mobile_notifications,
            send_mention_emails: self.send_mention_emails,
        }
    }
}

/// Notification preferences stored on the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    pub send_mobile_notifications: bool,
    pub send_mention_emails: bool,
}

/// Partial settings update. Absent fields keep their stored value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_mobile_notifications: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_mention_emails: Option<bool>,
}

impl NotificationSettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.send_mobile_notifications.is_none() && self.send_mention_emails.is_none()
    }

    /// Merge this patch over `settings`.
    pub fn apply(&self, settings: NotificationSettings) -> NotificationSettings {
        NotificationSettings {
            send_mobile_notifications: self
                .send_mobile_notifications
                .unwrap_or(settings.send_mobile_notifications),
            send_mention_emails: self
                .send_mention_emails
                .unwrap_or(settings.send_mention_emails),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_defaults() {
        let user = UserDbModel::new("alice");
        assert_eq!(user.username, "alice");
        assert!(!user.send_mobile_notifications);
        assert!(!user.send_mention_emails);
        assert_eq!(user.created_at, user.updated_at);
    }

    #[test]
    fn test_profile_image_requires_enabled_flag() {
        let mut user = UserDbModel::new("alice");
        user.image = Some("/images/alice.jpg".to_string());
        assert_eq!(user.profile_image(), None);

        user.image_enabled = true;
        assert_eq!(user.profile_image(), Some("/images/alice.jpg"));

        user.image = Some(String::new());
        assert_eq!(user.profile_image(), None);
    }

    #[test]
    fn test_settings_patch_merges_over_existing() {
        let current = NotificationSettings {
            send_mobile_notifications: true,
            send_mention_emails: false,
        };
        let patch: NotificationSettingsPatch =
            serde_json::from_str(r#"{"sendMentionEmails":true}"#).unwrap();

        let merged = patch.apply(current);
        assert!(merged.send_mobile_notifications);
        assert!(merged.send_mention_emails);
        assert!(!patch.is_empty());
        assert!(NotificationSettingsPatch::default().is_empty());
    }
}
