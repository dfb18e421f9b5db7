//! Notifier orchestration.
//!
//! The Notifier is responsible for:
//! - Resolving the notifiee and building the payload
//! - Delivering over web push, mobile push and (optionally) email
//! - Recording the notification in the notifiee's ledger
//!
//! Channels and the ledger run concurrently. Each one only touches its own
//! rows, so a failure in one never affects the others.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::channels::{
    ChannelReport, EmailChannel, ExpoPushSender, MobilePushChannel, SmtpEmailSender,
    VapidWebPushSender, WebPushChannel, WebPushMessage, compose_email,
};
use super::error::NotifyError;
use super::events::NotifiableEvent;
use super::ledger::{Ledger, entry_for};
use super::payload::{NotificationPayload, PayloadBuilder};
use crate::Result;
use crate::config::AppConfig;
use crate::database::DbPool;
use crate::database::models::{LedgerWrite, UserDbModel};
use crate::database::repositories::{
    CommunityRepository, NotificationRepository, PushTargetRepository, SqlxCommunityRepository,
    SqlxNotificationRepository, SqlxPushTargetRepository, SqlxUserRepository, UserRepository,
};

/// Result of one delivered notification.
#[derive(Debug)]
pub struct NotifyOutcome {
    pub ledger: LedgerWrite,
    /// The cause had no template; push channels were skipped.
    pub degraded: bool,
    pub web_push: ChannelReport,
    pub mobile_push: ChannelReport,
    pub email: ChannelReport,
}

impl NotifyOutcome {
    /// Delivery failures across all channels.
    pub fn failures(&self) -> impl Iterator<Item = &NotifyError> {
        self.web_push
            .failures
            .iter()
            .chain(self.mobile_push.failures.iter())
            .chain(self.email.failures.iter())
    }
}

/// Builder for [`Notifier`].
pub struct NotifierBuilder {
    users: Arc<dyn UserRepository>,
    communities: Arc<dyn CommunityRepository>,
    targets: Arc<dyn PushTargetRepository>,
    notifications: Arc<dyn NotificationRepository>,
    web_push: Option<WebPushChannel>,
    mobile_push: Option<MobilePushChannel>,
    email: Option<EmailChannel>,
}

impl NotifierBuilder {
    pub fn with_web_push(mut self, channel: WebPushChannel) -> Self {
        self.web_push = Some(channel);
        self
    }

    pub fn with_mobile_push(mut self, channel: MobilePushChannel) -> Self {
        self.mobile_push = Some(channel);
        self
    }

    pub fn with_email(mut self, channel: EmailChannel) -> Self {
        self.email = Some(channel);
        self
    }

    pub fn build(self) -> Notifier {
        Notifier {
            payloads: PayloadBuilder::new(self.users.clone(), self.communities),
            users: self.users,
            targets: self.targets,
            ledger: Ledger::new(self.notifications),
            web_push: self.web_push.map(Arc::new),
            mobile_push: self.mobile_push.map(Arc::new),
            email: self.email.map(Arc::new),
        }
    }
}

/// Composes and delivers notifications.
///
/// Cheap to clone; clones share channels and repositories.
#[derive(Clone)]
pub struct Notifier {
    users: Arc<dyn UserRepository>,
    targets: Arc<dyn PushTargetRepository>,
    payloads: PayloadBuilder,
    ledger: Ledger,
    web_push: Option<Arc<WebPushChannel>>,
    mobile_push: Option<Arc<MobilePushChannel>>,
    email: Option<Arc<EmailChannel>>,
}

impl Notifier {
    /// Start building a notifier with no delivery channels.
    pub fn builder(
        users: Arc<dyn UserRepository>,
        communities: Arc<dyn CommunityRepository>,
        targets: Arc<dyn PushTargetRepository>,
        notifications: Arc<dyn NotificationRepository>,
    ) -> NotifierBuilder {
        NotifierBuilder {
            users,
            communities,
            targets,
            notifications,
            web_push: None,
            mobile_push: None,
            email: None,
        }
    }

    /// Builder over the SQLx repositories for `pool`.
    pub fn builder_for_pool(pool: DbPool) -> NotifierBuilder {
        Self::builder(
            Arc::new(SqlxUserRepository::new(pool.clone())),
            Arc::new(SqlxCommunityRepository::new(pool.clone())),
            Arc::new(SqlxPushTargetRepository::new(pool.clone())),
            Arc::new(SqlxNotificationRepository::new(pool)),
        )
    }

    /// Notifier with the production senders enabled by `config`.
    pub fn from_config(pool: DbPool, config: &AppConfig) -> Result<Self> {
        let targets: Arc<dyn PushTargetRepository> =
            Arc::new(SqlxPushTargetRepository::new(pool.clone()));
        let mut builder = Self::builder_for_pool(pool);

        if let Some(web_push) = &config.web_push {
            let sender = VapidWebPushSender::new(web_push.clone(), config.push_timeout)?;
            builder = builder.with_web_push(
                WebPushChannel::new(Arc::new(sender), targets.clone())
                    .with_concurrency(config.web_push_concurrency)
                    .with_timeout(config.push_timeout),
            );
            info!("Web push enabled");
        } else {
            info!("Web push disabled: VAPID keys not configured");
        }

        if let Some(expo) = &config.expo {
            let sender = ExpoPushSender::new(expo.clone(), config.push_timeout)?;
            builder = builder.with_mobile_push(
                MobilePushChannel::new(Arc::new(sender), targets)
                    .with_timeout(config.push_timeout),
            );
            info!(push_url = %expo.push_url, "Mobile push enabled");
        }

        if let Some(smtp) = &config.smtp {
            let sender = SmtpEmailSender::new(smtp)?;
            builder = builder.with_email(
                EmailChannel::new(Arc::new(sender), smtp.public_url.clone())
                    .with_timeout(config.push_timeout),
            );
            info!(host = %smtp.host, "Mention emails enabled");
        }

        Ok(builder.build())
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Deliver and record a notification, logging any failure.
    pub async fn notify(&self, event: NotifiableEvent) {
        match self.dispatch(&event).await {
            Ok(outcome) => info!(
                notifiee_id = %event.notifiee_id,
                cause = %event.cause,
                ledger = ?outcome.ledger,
                degraded = outcome.degraded,
                web_push_delivered = outcome.web_push.delivered,
                web_push_pruned = outcome.web_push.pruned,
                mobile_push_delivered = outcome.mobile_push.delivered,
                email_delivered = outcome.email.delivered,
                failures = outcome.failures().count(),
                "Notification sent"
            ),
            Err(e) => {
                let subject_type = event.subject_type.to_string();
                if e.is_build_failure() {
                    warn!(
                        subject_type = %subject_type,
                        cause = %event.cause,
                        context = %event.context,
                        error = %e,
                        "Could not send notification"
                    );
                } else {
                    error!(
                        subject_type = %subject_type,
                        cause = %event.cause,
                        context = %event.context,
                        error = %e,
                        "Could not send notification"
                    );
                }
            }
        }
    }

    /// Run [`Notifier::notify`] in the background.
    pub fn spawn(&self, event: NotifiableEvent) -> JoinHandle<()> {
        let notifier = self.clone();
        tokio::spawn(async move { notifier.notify(event).await })
    }

    /// Deliver and record a notification, reporting what happened.
    ///
    /// Nothing is written when the notifiee or the payload cannot be
    /// resolved. Delivery failures are reported in the outcome; only a
    /// failure to record the ledger entry is returned as an error.
    #[instrument(
        skip(self, event),
        fields(notifiee_id = %event.notifiee_id, cause = %event.cause)
    )]
    pub async fn dispatch(
        &self,
        event: &NotifiableEvent,
    ) -> std::result::Result<NotifyOutcome, NotifyError> {
        let notifiee = self
            .users
            .find_by_id(&event.notifiee_id)
            .await
            .map_err(NotifyError::Lookup)?
            .ok_or_else(|| NotifyError::NotifieeNotFound(event.notifiee_id.clone()))?;

        let payload = self.payloads.build(event).await?;
        let entry = entry_for(event, &payload);

        let (web_push, mobile_push, email, ledger) = tokio::join!(
            self.send_web_push(&notifiee, &payload, &event.url),
            self.send_mobile_push(&notifiee, &payload),
            self.send_email(&notifiee, &payload, &event.url),
            self.ledger.record(&notifiee.id, &entry),
        );

        let ledger = ledger.map_err(NotifyError::Persistence)?;
        debug!(ledger = ?ledger, "Ledger updated");

        Ok(NotifyOutcome {
            ledger,
            degraded: payload.is_degraded(),
            web_push,
            mobile_push,
            email,
        })
    }

    /// Mark the user's notifications about `subject_id` as read, logging any
    /// failure.
    pub async fn mark_read(&self, user_id: &str, subject_id: &str) {
        match self.ledger.mark_read(user_id, subject_id).await {
            Ok(updated) => debug!(
                user_id = %user_id,
                subject_id = %subject_id,
                updated,
                "Marked notifications read"
            ),
            Err(e) => warn!(
                user_id = %user_id,
                subject_id = %subject_id,
                error = %e,
                "Failed to mark notifications read"
            ),
        }
    }

    async fn send_web_push(
        &self,
        notifiee: &UserDbModel,
        payload: &NotificationPayload,
        url: &str,
    ) -> ChannelReport {
        let Some(channel) = &self.web_push else {
            return ChannelReport::skipped();
        };
        if payload.is_degraded() {
            return ChannelReport::skipped();
        }

        match self.targets.list_web_push_subscriptions(&notifiee.id).await {
            Ok(subscriptions) => {
                channel
                    .deliver(&notifiee.id, subscriptions, &WebPushMessage::new(payload, url))
                    .await
            }
            Err(e) => target_lookup_failed(&notifiee.id, "web push subscriptions", e),
        }
    }

    async fn send_mobile_push(
        &self,
        notifiee: &UserDbModel,
        payload: &NotificationPayload,
    ) -> ChannelReport {
        let Some(channel) = &self.mobile_push else {
            return ChannelReport::skipped();
        };
        if payload.is_degraded() || !notifiee.send_mobile_notifications {
            return ChannelReport::skipped();
        }

        match self.targets.list_expo_tokens(&notifiee.id).await {
            Ok(tokens) => {
                channel
                    .deliver(&notifiee.id, tokens, &payload.plain_text())
                    .await
            }
            Err(e) => target_lookup_failed(&notifiee.id, "Expo push tokens", e),
        }
    }

    async fn send_email(
        &self,
        notifiee: &UserDbModel,
        payload: &NotificationPayload,
        url: &str,
    ) -> ChannelReport {
        let Some(channel) = &self.email else {
            return ChannelReport::skipped();
        };
        if payload.email_text.is_empty() || !notifiee.send_mention_emails {
            return ChannelReport::skipped();
        }
        let Some(address) = notifiee.email.as_deref() else {
            return ChannelReport::skipped();
        };

        let email = compose_email(
            address,
            payload.actor_name.as_deref(),
            &payload.email_text,
            &payload.plain_text(),
            &channel.link(url),
        );
        channel.deliver(email).await
    }
}

fn target_lookup_failed(user_id: &str, what: &str, e: crate::Error) -> ChannelReport {
    warn!(user_id = %user_id, error = %e, "Failed to load {}", what);
    ChannelReport {
        failures: vec![NotifyError::Persistence(e)],
        ..ChannelReport::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{CommunityDbModel, NewNotification, NotificationDbModel};
    use crate::database::repositories::MergeFn;
    use crate::database::test_pool;
    use crate::notification::channels::{
        EmailSender, MOBILE_PUSH_TITLE, MobilePushSender, NotificationEmail, WebPushSender,
    };
    use crate::notification::events::SubjectType;
    use crate::notification::ledger::LEDGER_CAPACITY;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct TestWebPush {
        attempts: AtomicU32,
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WebPushSender for TestWebPush {
        async fn send(&self, subscription: &str, message: &str) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.messages.lock().unwrap().push(message.to_string());
            if subscription.contains("stale") {
                return Err(crate::Error::Other("410 Gone".to_string()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestMobilePush {
        batches: Mutex<Vec<(Vec<String>, String, String)>>,
    }

    #[async_trait]
    impl MobilePushSender for TestMobilePush {
        async fn send_batch(&self, tokens: &[String], title: &str, body: &str) -> Result<()> {
            self.batches
                .lock()
                .unwrap()
                .push((tokens.to_vec(), title.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestEmail {
        sent: Mutex<Vec<NotificationEmail>>,
    }

    #[async_trait]
    impl EmailSender for TestEmail {
        async fn send(&self, email: &NotificationEmail) -> Result<()> {
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    struct Harness {
        notifier: Notifier,
        users: SqlxUserRepository,
        communities: SqlxCommunityRepository,
        targets: Arc<SqlxPushTargetRepository>,
        web_push: Arc<TestWebPush>,
        mobile_push: Arc<TestMobilePush>,
        email: Arc<TestEmail>,
    }

    async fn harness() -> Harness {
        let pool = test_pool().await;
        let targets = Arc::new(SqlxPushTargetRepository::new(pool.clone()));
        let web_push = Arc::new(TestWebPush::default());
        let mobile_push = Arc::new(TestMobilePush::default());
        let email = Arc::new(TestEmail::default());

        let notifier = Notifier::builder_for_pool(pool.clone())
            .with_web_push(WebPushChannel::new(web_push.clone(), targets.clone()))
            .with_mobile_push(MobilePushChannel::new(mobile_push.clone(), targets.clone()))
            .with_email(EmailChannel::new(email.clone(), "https://sweet.test"))
            .build();

        Harness {
            notifier,
            users: SqlxUserRepository::new(pool.clone()),
            communities: SqlxCommunityRepository::new(pool),
            targets,
            web_push,
            mobile_push,
            email,
        }
    }

    async fn create_user(h: &Harness, name: &str) -> UserDbModel {
        let mut user = UserDbModel::new(name);
        user.email = Some(format!("{name}@sweet.test"));
        h.users.create(&user).await.unwrap();
        user
    }

    fn user_event(
        cause: &str,
        notifiee: &UserDbModel,
        actor: &UserDbModel,
        context: &str,
    ) -> NotifiableEvent {
        NotifiableEvent::new(
            SubjectType::User,
            cause,
            &notifiee.id,
            &actor.id,
            "post-1",
            "/alice/post-1",
            context,
        )
    }

    #[tokio::test]
    async fn test_dispatch_delivers_everywhere() {
        let h = harness().await;
        let mut bob = create_user(&h, "bob").await;
        let alice = create_user(&h, "alice").await;
        bob.send_mobile_notifications = true;
        h.users.update_settings(&bob.id, bob.settings()).await.unwrap();
        h.targets.add_web_push_subscription(&bob.id, "sub-1").await.unwrap();
        h.targets.add_expo_token(&bob.id, "ExponentPushToken[a]").await.unwrap();

        let outcome = h
            .notifier
            .dispatch(&user_event("plus", &bob, &alice, ""))
            .await
            .unwrap();

        assert_eq!(outcome.ledger, LedgerWrite::Appended);
        assert!(!outcome.degraded);
        assert_eq!(outcome.web_push.delivered, 1);
        assert_eq!(outcome.mobile_push.delivered, 1);
        assert!(outcome.email.is_skipped(), "plus sends no email");
        assert_eq!(outcome.failures().count(), 0);

        let message: serde_json::Value =
            serde_json::from_str(&h.web_push.messages.lock().unwrap()[0]).unwrap();
        assert_eq!(message["body"], "@alice supports your post.");
        assert_eq!(message["imageURL"], "/images/cake.png");
        assert_eq!(message["link"], "/alice/post-1");

        {
            let batches = h.mobile_push.batches.lock().unwrap();
            assert_eq!(batches[0].1, MOBILE_PUSH_TITLE);
            assert_eq!(batches[0].2, "@alice supports your post.");
        }

        let ledger = h.notifier.ledger().list(&bob.id).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].category, "plus");
        assert_eq!(ledger[0].text, "<strong>@alice</strong> supports your post.");
        assert_eq!(ledger[0].source_id, alice.id);
    }

    #[tokio::test]
    async fn test_mobile_push_requires_opt_in() {
        let h = harness().await;
        let bob = create_user(&h, "bob").await;
        let alice = create_user(&h, "alice").await;
        h.targets.add_expo_token(&bob.id, "ExponentPushToken[a]").await.unwrap();
        h.targets.add_expo_token(&bob.id, "ExponentPushToken[a]").await.unwrap();

        let outcome = h
            .notifier
            .dispatch(&user_event("reply", &bob, &alice, ""))
            .await
            .unwrap();

        assert!(outcome.mobile_push.is_skipped());
        assert!(h.mobile_push.batches.lock().unwrap().is_empty());
        // Not sent, so not repaired either.
        assert_eq!(h.targets.list_expo_tokens(&bob.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mention_email_requires_opt_in() {
        let h = harness().await;
        let mut bob = create_user(&h, "bob").await;
        let alice = create_user(&h, "alice").await;
        let event = user_event("mention", &bob, &alice, "post");

        h.notifier.dispatch(&event).await.unwrap();
        assert!(h.email.sent.lock().unwrap().is_empty());

        bob.send_mention_emails = true;
        h.users.update_settings(&bob.id, bob.settings()).await.unwrap();
        let outcome = h.notifier.dispatch(&event).await.unwrap();

        assert_eq!(outcome.email.delivered, 1);
        let sent = h.email.sent.lock().unwrap();
        assert_eq!(sent[0].to, "bob@sweet.test");
        assert_eq!(sent[0].subject, "@alice mentioned you on sweet 🙌");
        assert!(sent[0].body.contains("https://sweet.test/alice/post-1"));
    }

    #[tokio::test]
    async fn test_missing_notifiee_writes_nothing() {
        let h = harness().await;
        let alice = create_user(&h, "alice").await;
        let mut ghost = UserDbModel::new("ghost");
        ghost.id = "ghost".to_string();

        let err = h
            .notifier
            .dispatch(&user_event("plus", &ghost, &alice, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::NotifieeNotFound(_)));
        assert_eq!(h.web_push.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_source_writes_nothing() {
        let h = harness().await;
        let bob = create_user(&h, "bob").await;
        h.targets.add_web_push_subscription(&bob.id, "sub-1").await.unwrap();
        let mut ghost = UserDbModel::new("ghost");
        ghost.id = "ghost".to_string();

        let err = h
            .notifier
            .dispatch(&user_event("plus", &bob, &ghost, ""))
            .await
            .unwrap_err();
        assert!(err.is_build_failure());
        assert_eq!(h.web_push.attempts.load(Ordering::SeqCst), 0);
        assert!(h.notifier.ledger().list(&bob.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_cause_is_recorded_but_not_pushed() {
        let h = harness().await;
        let bob = create_user(&h, "bob").await;
        let alice = create_user(&h, "alice").await;
        h.targets.add_web_push_subscription(&bob.id, "sub-1").await.unwrap();

        let outcome = h
            .notifier
            .dispatch(&user_event("poke", &bob, &alice, ""))
            .await
            .unwrap();

        assert!(outcome.degraded);
        assert!(outcome.web_push.is_skipped());
        let ledger = h.notifier.ledger().list(&bob.id).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].category, "poke");
        assert_eq!(ledger[0].text, "");
    }

    #[tokio::test]
    async fn test_community_event() {
        let h = harness().await;
        let bob = create_user(&h, "bob").await;
        let alice = create_user(&h, "alice").await;
        let community = CommunityDbModel::new("Garden Club");
        h.communities.create(&community).await.unwrap();

        let event = NotifiableEvent::new(
            SubjectType::Community,
            "management",
            &bob.id,
            &alice.id,
            &community.id,
            "/community/garden",
            "banned",
        );
        h.notifier.dispatch(&event).await.unwrap();

        let ledger = h.notifier.ledger().list(&bob.id).await.unwrap();
        assert_eq!(
            ledger[0].text,
            "<strong>@alice</strong> has been banned from <strong>Garden Club</strong>."
        );
        assert_eq!(ledger[0].image, "/images/communities/cake.svg");
        assert_eq!(ledger[0].subject_id, community.id);
    }

    #[tokio::test]
    async fn test_mark_read_and_spawn() {
        let h = harness().await;
        let bob = create_user(&h, "bob").await;
        let alice = create_user(&h, "alice").await;

        h.notifier
            .spawn(user_event("boost", &bob, &alice, ""))
            .await
            .unwrap();
        h.notifier.notify(user_event("reply", &bob, &alice, "")).await;

        h.notifier.mark_read(&bob.id, "post-1").await;
        let ledger = h.notifier.ledger().list(&bob.id).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.iter().all(|n| n.seen));
        assert!(ledger.len() <= LEDGER_CAPACITY);
    }

    /// Ledger storage that rejects every write.
    struct BrokenLedger;

    #[async_trait]
    impl NotificationRepository for BrokenLedger {
        async fn append(
            &self,
            _user_id: &str,
            _entry: &NewNotification,
            _capacity: usize,
            _merge: MergeFn,
        ) -> Result<LedgerWrite> {
            Err(crate::Error::Other("disk full".to_string()))
        }

        async fn list(&self, _user_id: &str) -> Result<Vec<NotificationDbModel>> {
            Ok(Vec::new())
        }

        async fn mark_read(&self, _user_id: &str, _subject_id: &str) -> Result<u64> {
            Err(crate::Error::Other("disk full".to_string()))
        }
    }

    /// Push target storage whose token lookup and subscription removal fail.
    struct FlakyTargets {
        inner: Arc<SqlxPushTargetRepository>,
    }

    #[async_trait]
    impl PushTargetRepository for FlakyTargets {
        async fn list_web_push_subscriptions(&self, user_id: &str) -> Result<Vec<String>> {
            self.inner.list_web_push_subscriptions(user_id).await
        }

        async fn add_web_push_subscription(&self, user_id: &str, subscription: &str) -> Result<()> {
            self.inner.add_web_push_subscription(user_id, subscription).await
        }

        async fn remove_web_push_subscription(
            &self,
            _user_id: &str,
            _subscription: &str,
        ) -> Result<u64> {
            Err(crate::Error::Other("database is gone".to_string()))
        }

        async fn list_expo_tokens(&self, _user_id: &str) -> Result<Vec<String>> {
            Err(crate::Error::Other("database is gone".to_string()))
        }

        async fn add_expo_token(&self, user_id: &str, token: &str) -> Result<()> {
            self.inner.add_expo_token(user_id, token).await
        }

        async fn dedupe_expo_tokens(&self, user_id: &str) -> Result<u64> {
            self.inner.dedupe_expo_tokens(user_id).await
        }
    }

    #[tokio::test]
    async fn test_ledger_failure_still_delivers() {
        let pool = test_pool().await;
        let users = Arc::new(SqlxUserRepository::new(pool.clone()));
        let targets = Arc::new(SqlxPushTargetRepository::new(pool.clone()));
        let web_push = Arc::new(TestWebPush::default());
        let mobile_push = Arc::new(TestMobilePush::default());

        let notifier = Notifier::builder(
            users.clone(),
            Arc::new(SqlxCommunityRepository::new(pool)),
            targets.clone(),
            Arc::new(BrokenLedger),
        )
        .with_web_push(WebPushChannel::new(web_push.clone(), targets.clone()))
        .with_mobile_push(MobilePushChannel::new(mobile_push.clone(), targets.clone()))
        .build();

        let mut bob = UserDbModel::new("bob");
        bob.send_mobile_notifications = true;
        users.create(&bob).await.unwrap();
        let alice = UserDbModel::new("alice");
        users.create(&alice).await.unwrap();
        targets.add_web_push_subscription(&bob.id, "sub-1").await.unwrap();
        targets.add_expo_token(&bob.id, "ExponentPushToken[a]").await.unwrap();

        let err = notifier
            .dispatch(&user_event("plus", &bob, &alice, ""))
            .await
            .unwrap_err();

        assert!(matches!(err, NotifyError::Persistence(_)));
        assert!(!err.is_build_failure());
        assert_eq!(web_push.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(mobile_push.batches.lock().unwrap().len(), 1);

        // Logged, never raised.
        notifier.notify(user_event("plus", &bob, &alice, "")).await;
        notifier.mark_read(&bob.id, "post-1").await;
        assert_eq!(web_push.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_target_storage_failure_is_reported_per_channel() {
        let pool = test_pool().await;
        let users = Arc::new(SqlxUserRepository::new(pool.clone()));
        let inner = Arc::new(SqlxPushTargetRepository::new(pool.clone()));
        let targets = Arc::new(FlakyTargets {
            inner: inner.clone(),
        });
        let web_push = Arc::new(TestWebPush::default());
        let mobile_push = Arc::new(TestMobilePush::default());

        let notifier = Notifier::builder(
            users.clone(),
            Arc::new(SqlxCommunityRepository::new(pool.clone())),
            targets.clone(),
            Arc::new(SqlxNotificationRepository::new(pool)),
        )
        .with_web_push(WebPushChannel::new(web_push.clone(), targets.clone()))
        .with_mobile_push(MobilePushChannel::new(mobile_push.clone(), targets))
        .build();

        let mut bob = UserDbModel::new("bob");
        bob.send_mobile_notifications = true;
        users.create(&bob).await.unwrap();
        let alice = UserDbModel::new("alice");
        users.create(&alice).await.unwrap();
        inner.add_web_push_subscription(&bob.id, "sub-stale").await.unwrap();
        inner.add_web_push_subscription(&bob.id, "sub-ok").await.unwrap();
        inner.add_expo_token(&bob.id, "ExponentPushToken[a]").await.unwrap();

        let outcome = notifier
            .dispatch(&user_event("plus", &bob, &alice, ""))
            .await
            .unwrap();

        // The stale subscription fails and cannot be removed; the other still gets it.
        assert_eq!(outcome.web_push.attempted, 2);
        assert_eq!(outcome.web_push.delivered, 1);
        assert_eq!(outcome.web_push.pruned, 0);
        assert_eq!(outcome.web_push.failures.len(), 1);

        // Token lookup failed, so mobile push reports it and sends nothing.
        assert!(matches!(
            outcome.mobile_push.failures.as_slice(),
            [NotifyError::Persistence(_)]
        ));
        assert!(mobile_push.batches.lock().unwrap().is_empty());

        assert_eq!(outcome.ledger, LedgerWrite::Appended);
        assert_eq!(notifier.ledger().list(&bob.id).await.unwrap().len(), 1);
        assert_eq!(inner.list_web_push_subscriptions(&bob.id).await.unwrap().len(), 2);
    }
}
