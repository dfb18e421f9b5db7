//! Notifiable events.
//!
//! Defines the social events that produce notifications and the causes the
//! text builder knows how to render.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The general subject of a notification.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubjectType {
    /// Something a user did to the notifiee or their content.
    User,
    /// Something that happened in a community.
    Community,
}

/// A cause the text builder has a template for.
///
/// The wire name is the camelCase variant name (`subscribedReply`,
/// `requestResponse`, ...), which is also what the ledger stores as the
/// entry category.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::EnumIter,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Cause {
    Plus,
    Reply,
    Boost,
    SubscribedReply,
    MentioningPostReply,
    BoostedPostReply,
    CommentReply,
    Mention,
    Relationship,
    Request,
    RequestResponse,
    Vote,
    YourVote,
    Management,
    ManagementResponse,
    NameChange,
}

impl Cause {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// The subject type this cause is rendered under.
    pub fn subject_type(self) -> SubjectType {
        match self {
            Self::Plus
            | Self::Reply
            | Self::Boost
            | Self::SubscribedReply
            | Self::MentioningPostReply
            | Self::BoostedPostReply
            | Self::CommentReply
            | Self::Mention
            | Self::Relationship => SubjectType::User,
            Self::Request
            | Self::RequestResponse
            | Self::Vote
            | Self::YourVote
            | Self::Management
            | Self::ManagementResponse
            | Self::NameChange => SubjectType::Community,
        }
    }
}

/// A social event to notify a user about.
///
/// `cause` is kept as the raw string so that events with a cause this build
/// does not know still flow through the pipeline (with a degraded payload)
/// instead of failing to deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifiableEvent {
    pub subject_type: SubjectType,
    pub cause: String,
    /// The user who receives the notification.
    pub notifiee_id: String,
    /// The user who performed the action.
    pub source_id: String,
    /// The entity the action relates to (post, community, user).
    pub subject_id: String,
    /// Link opened when the notification is clicked.
    pub url: String,
    /// A verb or noun relating to the action ("follow", "comment", "approved").
    #[serde(default)]
    pub context: String,
}

impl NotifiableEvent {
    pub fn new(
        subject_type: SubjectType,
        cause: impl Into<String>,
        notifiee_id: impl Into<String>,
        source_id: impl Into<String>,
        subject_id: impl Into<String>,
        url: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            subject_type,
            cause: cause.into(),
            notifiee_id: notifiee_id.into(),
            source_id: source_id.into(),
            subject_id: subject_id.into(),
            url: url.into(),
            context: context.into(),
        }
    }

    /// The parsed cause, if it is one the builder knows.
    pub fn known_cause(&self) -> Option<Cause> {
        Cause::from_str(&self.cause).ok()
    }
}
