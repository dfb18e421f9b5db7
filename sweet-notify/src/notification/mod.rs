//! Notification composition and delivery.
//!
//! A [`NotifiableEvent`] is rendered into a [`NotificationPayload`], pushed to
//! the notifiee's browsers and devices, and recorded in their [`Ledger`].

pub mod channels;
mod error;
mod events;
mod ledger;
mod payload;
mod registration;
mod service;

pub use error::NotifyError;
pub use events::{Cause, NotifiableEvent, SubjectType};
pub use ledger::{LEDGER_CAPACITY, Ledger, entry_for, merge};
pub use payload::{
    DEFAULT_COMMUNITY_IMAGE, DEFAULT_USER_IMAGE, MENTION_EMAIL_TEXT, NotificationPayload,
    PayloadBuilder, raster_image, render_community, render_user, strip_markup,
};
pub use registration::{PushRegistration, is_expo_push_token};
pub use service::{Notifier, NotifierBuilder, NotifyOutcome};
