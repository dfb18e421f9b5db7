//! Per-user notification ledger.
//!
//! A bounded, ordered log of stored notifications. Consecutive follow and
//! trust notifications from the same profile collapse into one entry.

use std::sync::Arc;

use super::events::{Cause, NotifiableEvent};
use super::payload::NotificationPayload;
use crate::Result;
use crate::database::models::{LedgerWrite, NewNotification, NotificationDbModel};
use crate::database::repositories::NotificationRepository;

/// Maximum number of entries kept per user.
pub const LEDGER_CAPACITY: usize = 60;

const FOLLOW: &str = "follow";
const TRUST: &str = "trust";
const FOLLOWS_AND_TRUSTS: &str = "follow+trust";

fn complementary(a: &str, b: &str) -> bool {
    matches!((a, b), (FOLLOW, TRUST) | (TRUST, FOLLOW))
}

/// Build the ledger entry for an event and its payload.
pub fn entry_for(event: &NotifiableEvent, payload: &NotificationPayload) -> NewNotification {
    NewNotification {
        category: event.cause.clone(),
        source_id: event.source_id.clone(),
        subject_id: event.subject_id.clone(),
        actor_name: payload.actor_name.clone(),
        context: event.context.clone(),
        text: payload.display_text.clone(),
        image: payload.image.clone(),
        url: event.url.clone(),
    }
}

/// Merge rule for relationship notifications.
///
/// When the newest stored entry is a `follow` relationship and the incoming
/// one is a `trust` for the same url (or the other way round), the two are
/// combined into a single "now follows and trusts you" entry. The combined
/// entry is not merged again.
pub fn merge(last: &NotificationDbModel, incoming: &NewNotification) -> Option<NewNotification> {
    let relationship = Cause::Relationship.as_str();
    if last.category != relationship
        || incoming.category != relationship
        || last.url != incoming.url
        || !complementary(&last.context, &incoming.context)
    {
        return None;
    }

    let actor = last
        .actor_name
        .clone()
        .or_else(|| incoming.actor_name.clone())?;

    Some(NewNotification {
        category: relationship.to_string(),
        source_id: incoming.source_id.clone(),
        subject_id: incoming.subject_id.clone(),
        text: format!("<strong>@{actor}</strong> now follows and trusts you."),
        actor_name: Some(actor),
        context: FOLLOWS_AND_TRUSTS.to_string(),
        image: incoming.image.clone(),
        url: incoming.url.clone(),
    })
}

/// Ledger operations over a notification repository.
#[derive(Clone)]
pub struct Ledger {
    repo: Arc<dyn NotificationRepository>,
    capacity: usize,
}

impl Ledger {
    pub fn new(repo: Arc<dyn NotificationRepository>) -> Self {
        Self {
            repo,
            capacity: LEDGER_CAPACITY,
        }
    }

    /// Append (or merge) an entry, keeping at most the ledger capacity.
    pub async fn record(&self, user_id: &str, entry: &NewNotification) -> Result<LedgerWrite> {
        self.repo.append(user_id, entry, self.capacity, merge).await
    }

    /// Mark every unseen entry about `subject_id` as seen.
    pub async fn mark_read(&self, user_id: &str, subject_id: &str) -> Result<u64> {
        self.repo.mark_read(user_id, subject_id).await
    }

    /// The user's ledger, oldest first.
    pub async fn list(&self, user_id: &str) -> Result<Vec<NotificationDbModel>> {
        self.repo.list(user_id).await
    }
}
