//! Notification text builder.
//!
//! Turns a [`NotifiableEvent`] into the image, display text and email text
//! shown to the notifiee. Rendering is pure; [`PayloadBuilder`] only adds the
//! user and community lookups around it.

use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, LazyLock};
use tracing::warn;

use super::error::NotifyError;
use super::events::{Cause, NotifiableEvent, SubjectType};
use crate::database::models::{CommunityDbModel, UserDbModel};
use crate::database::repositories::{CommunityRepository, UserRepository};

pub const DEFAULT_USER_IMAGE: &str = "/images/cake.svg";
pub const DEFAULT_COMMUNITY_IMAGE: &str = "/images/communities/cake.svg";
pub const MENTION_EMAIL_TEXT: &str = "mentioned you on sweet 🙌";

static STRONG_TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?strong>").unwrap());

/// What a notification looks like, independent of the channel carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    pub image: String,
    /// Display text, may contain `<strong>` markup. Empty for unknown causes.
    pub display_text: String,
    /// Email text, empty unless the cause sends email.
    pub email_text: String,
    /// Username of the acting user.
    pub actor_name: Option<String>,
}

impl NotificationPayload {
    /// A payload for a cause with no template.
    pub fn is_degraded(&self) -> bool {
        self.display_text.is_empty()
    }

    /// Display text without markup, as used in push bodies.
    pub fn plain_text(&self) -> String {
        strip_markup(&self.display_text)
    }
}

/// Remove `<strong>` and `</strong>` tags.
pub fn strip_markup(text: &str) -> String {
    STRONG_TAG_REGEX.replace_all(text, "").into_owned()
}

/// Push services cannot show SVG images, so point at the PNG rendition.
/// Only the first `.svg` is replaced.
pub fn raster_image(image: &str) -> String {
    image.replacen(".svg", ".png", 1)
}

fn user_template(cause: Cause, context: &str) -> Option<String> {
    let text = match cause {
        Cause::Plus => "supports your post.".to_string(),
        Cause::Reply => "replied to your post.".to_string(),
        Cause::Boost => "boosted your post.".to_string(),
        Cause::SubscribedReply => "replied to a post you have also replied to.".to_string(),
        Cause::MentioningPostReply => "replied to a post you were mentioned in.".to_string(),
        Cause::BoostedPostReply => "replied to a post you boosted.".to_string(),
        Cause::CommentReply => "replied to your comment.".to_string(),
        Cause::Mention => format!("mentioned you in a {context}."),
        Cause::Relationship => format!("now {context}s you."),
        _ => return None,
    };
    Some(text)
}

fn community_template(cause: Cause, actor: &str, community: &str, context: &str) -> Option<String> {
    let text = match cause {
        Cause::Request => {
            format!("<strong>@{actor}</strong> has asked to join <strong>{community}</strong>.")
        }
        Cause::RequestResponse => {
            format!("Your request to join <strong>{community}</strong> has been {context}.")
        }
        Cause::Vote => format!("A vote has been {context} in <strong>{community}</strong>."),
        Cause::YourVote => format!("Your vote has been {context} in <strong>{community}</strong>."),
        Cause::Management => format!(
            "<strong>@{actor}</strong> has been {context} from <strong>{community}</strong>."
        ),
        Cause::ManagementResponse => {
            format!("You have been {context} from <strong>{community}</strong>.")
        }
        Cause::NameChange => format!(
            "The name of the community <strong>{context}</strong> has been changed to <strong>{community}</strong>."
        ),
        _ => return None,
    };
    Some(text)
}

/// Render a user-subject notification. `cause` is `None` when unknown, which
/// yields a degraded payload.
pub fn render_user(cause: Option<Cause>, actor: &UserDbModel, context: &str) -> NotificationPayload {
    let display_text = cause
        .and_then(|cause| user_template(cause, context))
        .map(|text| format!("<strong>@{}</strong> {}", actor.username, text))
        .unwrap_or_default();
    let email_text = match cause {
        Some(Cause::Mention) => MENTION_EMAIL_TEXT.to_string(),
        _ => String::new(),
    };

    NotificationPayload {
        image: actor.profile_image().unwrap_or(DEFAULT_USER_IMAGE).to_string(),
        display_text,
        email_text,
        actor_name: Some(actor.username.clone()),
    }
}

/// Render a community-subject notification.
pub fn render_community(
    cause: Option<Cause>,
    actor: &UserDbModel,
    community: &CommunityDbModel,
    context: &str,
) -> NotificationPayload {
    let display_text = cause
        .and_then(|cause| community_template(cause, &actor.username, &community.name, context))
        .unwrap_or_default();

    NotificationPayload {
        image: community
            .display_image()
            .unwrap_or(DEFAULT_COMMUNITY_IMAGE)
            .to_string(),
        display_text,
        email_text: String::new(),
        actor_name: Some(actor.username.clone()),
    }
}

/// Resolves the entities an event refers to and renders its payload.
#[derive(Clone)]
pub struct PayloadBuilder {
    users: Arc<dyn UserRepository>,
    communities: Arc<dyn CommunityRepository>,
}

impl PayloadBuilder {
    pub fn new(users: Arc<dyn UserRepository>, communities: Arc<dyn CommunityRepository>) -> Self {
        Self { users, communities }
    }

    /// Build the payload for `event`.
    ///
    /// Fails when the actor (or, for community events, the community) is
    /// missing or cannot be looked up. A cause with no template for the
    /// event's subject type is not an error: it logs a warning and returns a
    /// degraded payload.
    pub async fn build(&self, event: &NotifiableEvent) -> Result<NotificationPayload, NotifyError> {
        let cause = event
            .known_cause()
            .filter(|cause| cause.subject_type() == event.subject_type);
        if cause.is_none() {
            let err = NotifyError::UnknownCause {
                subject_type: event.subject_type.to_string(),
                cause: event.cause.clone(),
            };
            warn!(
                notifiee_id = %event.notifiee_id,
                error = %err,
                "Building degraded notification"
            );
        }

        let actor = self.find_actor(&event.source_id).await?;
        let payload = match event.subject_type {
            SubjectType::User => render_user(cause, &actor, &event.context),
            SubjectType::Community => {
                let community = self.find_community(&event.subject_id).await?;
                render_community(cause, &actor, &community, &event.context)
            }
        };
        Ok(payload)
    }

    async fn find_actor(&self, id: &str) -> Result<UserDbModel, NotifyError> {
        self.users
            .find_by_id(id)
            .await
            .map_err(NotifyError::Lookup)?
            .ok_or_else(|| NotifyError::SourceNotFound {
                entity_type: "user",
                id: id.to_string(),
            })
    }

    async fn find_community(&self, id: &str) -> Result<CommunityDbModel, NotifyError> {
        self.communities
            .find_by_id(id)
            .await
            .map_err(NotifyError::Lookup)?
            .ok_or_else(|| NotifyError::SourceNotFound {
                entity_type: "community",
                id: id.to_string(),
            })
    }
}
