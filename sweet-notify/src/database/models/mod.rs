//! Database models.

mod community;
mod notification;
mod user;

pub use community::CommunityDbModel;
pub use notification::{LedgerWrite, NewNotification, NotificationDbModel};
pub use user::{NotificationSettings, NotificationSettingsPatch, UserDbModel};
