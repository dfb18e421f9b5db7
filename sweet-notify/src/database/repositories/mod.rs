//! Repository layer for database operations.

mod community;
mod notification;
mod push_target;
mod user;

pub use community::{CommunityRepository, SqlxCommunityRepository};
pub use notification::{MergeFn, NotificationRepository, SqlxNotificationRepository};
pub use push_target::{PushTargetRepository, SqlxPushTargetRepository};
pub use user::{SqlxUserRepository, UserRepository};
