//! Notification ledger repository.

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

use crate::Result;
use crate::database::models::{LedgerWrite, NewNotification, NotificationDbModel};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::database::{DbPool, begin_immediate};

/// Decides whether an incoming entry replaces the most recent one. Returns the
/// combined entry to store in its place, or `None` to append.
pub type MergeFn = fn(&NotificationDbModel, &NewNotification) -> Option<NewNotification>;

/// Notification ledger repository trait.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Append `entry` to the user's ledger (or merge it into the most recent
    /// entry, as decided by `merge`), then keep only the newest `capacity`
    /// entries. The whole operation is atomic.
    async fn append(
        &self,
        user_id: &str,
        entry: &NewNotification,
        capacity: usize,
        merge: MergeFn,
    ) -> Result<LedgerWrite>;

    /// The user's ledger, oldest first.
    async fn list(&self, user_id: &str) -> Result<Vec<NotificationDbModel>>;

    /// Mark every unseen entry about `subject_id` as seen. Returns the number
    /// of entries changed.
    async fn mark_read(&self, user_id: &str, subject_id: &str) -> Result<u64>;
}

/// SQLx implementation of NotificationRepository.
pub struct SqlxNotificationRepository {
    pool: SqlitePool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn append_once(
        pool: &DbPool,
        user_id: &str,
        entry: &NewNotification,
        capacity: usize,
        merge: MergeFn,
    ) -> Result<LedgerWrite> {
        let mut tx = begin_immediate(pool).await?;
        match Self::append_in_tx(&mut tx, user_id, entry, capacity, merge).await {
            Ok(write) => {
                tx.commit().await?;
                Ok(write)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Failed to roll back ledger append");
                }
                Err(e)
            }
        }
    }

    async fn append_in_tx(
        conn: &mut SqliteConnection,
        user_id: &str,
        entry: &NewNotification,
        capacity: usize,
        merge: MergeFn,
    ) -> Result<LedgerWrite> {
        let last = sqlx::query_as::<_, NotificationDbModel>(
            "SELECT * FROM notifications WHERE user_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

        let now = now_ms();
        let merged = last
            .as_ref()
            .and_then(|last| merge(last, entry).map(|combined| (last.id, combined)));

        let write = match merged {
            Some((last_id, combined)) => {
                sqlx::query(
                    r#"
                    UPDATE notifications SET
                        category = ?,
                        source_id = ?,
                        subject_id = ?,
                        actor_name = ?,
                        context = ?,
                        text = ?,
                        image = ?,
                        url = ?,
                        seen = FALSE,
                        created_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&combined.category)
                .bind(&combined.source_id)
                .bind(&combined.subject_id)
                .bind(&combined.actor_name)
                .bind(&combined.context)
                .bind(&combined.text)
                .bind(&combined.image)
                .bind(&combined.url)
                .bind(now)
                .bind(last_id)
                .execute(&mut *conn)
                .await?;
                LedgerWrite::Merged
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO notifications (
                        user_id, category, source_id, subject_id, actor_name,
                        context, text, image, url, seen, created_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, FALSE, ?)
                    "#,
                )
                .bind(user_id)
                .bind(&entry.category)
                .bind(&entry.source_id)
                .bind(&entry.subject_id)
                .bind(&entry.actor_name)
                .bind(&entry.context)
                .bind(&entry.text)
                .bind(&entry.image)
                .bind(&entry.url)
                .bind(now)
                .execute(&mut *conn)
                .await?;
                LedgerWrite::Appended
            }
        };

        sqlx::query(
            r#"
            DELETE FROM notifications
            WHERE user_id = ?
              AND id NOT IN (
                  SELECT id FROM notifications WHERE user_id = ? ORDER BY id DESC LIMIT ?
              )
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(capacity as i64)
        .execute(&mut *conn)
        .await?;

        Ok(write)
    }
}

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    async fn append(
        &self,
        user_id: &str,
        entry: &NewNotification,
        capacity: usize,
        merge: MergeFn,
    ) -> Result<LedgerWrite> {
        retry_on_sqlite_busy("notification_append", || {
            Self::append_once(&self.pool, user_id, entry, capacity, merge)
        })
        .await
    }

    async fn list(&self, user_id: &str) -> Result<Vec<NotificationDbModel>> {
        let rows = sqlx::query_as::<_, NotificationDbModel>(
            "SELECT * FROM notifications WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_read(&self, user_id: &str, subject_id: &str) -> Result<u64> {
        let result = retry_on_sqlite_busy("notification_mark_read", || async {
            sqlx::query(
                "UPDATE notifications SET seen = TRUE WHERE user_id = ? AND subject_id = ? AND seen = FALSE",
            )
            .bind(user_id)
            .bind(subject_id)
            .execute(&self.pool)
            .await
            .map_err(Into::into)
        })
        .await?;
        Ok(result.rows_affected())
    }
}
