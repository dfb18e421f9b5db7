//! Notification ledger database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A stored notification, one entry of a user's ledger.
///
/// Entries are ordered by `id`, which only grows, so `id` order is
/// chronological order.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct NotificationDbModel {
    pub id: i64,
    /// The notifiee
    pub user_id: String,
    /// Cause of the event that produced this entry (e.g. "plus", "vote")
    pub category: String,
    pub source_id: String,
    pub subject_id: String,
    /// Username of the acting user, kept so merges never parse `text`
    pub actor_name: Option<String>,
    /// Free-form event context (e.g. "follow", "trust", "comment")
    pub context: String,
    /// Rendered display text, may contain `<strong>` markup
    pub text: String,
    pub image: String,
    pub url: String,
    pub seen: bool,
    /// Unix epoch milliseconds (UTC) when the entry was written.
    pub created_at: i64,
}

/// A ledger entry that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNotification {
    pub category: String,
    pub source_id: String,
    pub subject_id: String,
    pub actor_name: Option<String>,
    pub context: String,
    pub text: String,
    pub image: String,
    pub url: String,
}

/// How a ledger append was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerWrite {
    /// The entry was added to the end of the ledger.
    Appended,
    /// The entry replaced the most recent one.
    Merged,
}
