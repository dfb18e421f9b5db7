//! User repository for database operations.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{NotificationSettings, UserDbModel};
use crate::database::time::now_ms;
use crate::{Error, Result};

/// User repository trait for user data access operations.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user in the database.
    async fn create(&self, user: &UserDbModel) -> Result<()>;

    /// Find a user by their unique ID.
    async fn find_by_id(&self, id: &str) -> Result<Option<UserDbModel>>;

    /// Overwrite the user's notification settings.
    async fn update_settings(&self, id: &str, settings: NotificationSettings) -> Result<()>;
}

/// SQLx implementation of UserRepository.
pub struct SqlxUserRepository {
    pool: SqlitePool,
}

impl SqlxUserRepository {
    /// Create a new SqlxUserRepository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &UserDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (
                id, username, email, image_enabled, image,
                send_mobile_notifications, send_mention_emails, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.image_enabled)
        .bind(&user.image)
        .bind(user.send_mobile_notifications)
        .bind(user.send_mention_emails)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UserDbModel>> {
        let user = sqlx::query_as::<_, UserDbModel>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn update_settings(&self, id: &str, settings: NotificationSettings) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                send_mobile_notifications = ?,
                send_mention_emails = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(settings.send_mobile_notifications)
        .bind(settings.send_mention_emails)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("User", id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;

    #[tokio::test]
    async fn test_create_and_find() {
        let repo = SqlxUserRepository::new(test_pool().await);
        let mut user = UserDbModel::new("alice");
        user.image_enabled = true;
        user.image = Some("/images/alice.png".to_string());
        repo.create(&user).await.unwrap();

        let found = repo.find_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(found.username, "alice");
        assert_eq!(found.profile_image(), Some("/images/alice.png"));

        assert!(repo.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_settings() {
        let repo = SqlxUserRepository::new(test_pool().await);
        let user = UserDbModel::new("bob");
        repo.create(&user).await.unwrap();

        let settings = NotificationSettings {
            send_mobile_notifications: true,
            send_mention_emails: false,
        };
        repo.update_settings(&user.id, settings).await.unwrap();

        let found = repo.find_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(found.settings(), settings);

        let err = repo.update_settings("missing", settings).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
