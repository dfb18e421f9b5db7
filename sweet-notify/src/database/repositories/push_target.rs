//! Push target repository: web push subscriptions and Expo device tokens.
//!
//! Every write here touches only the rows it names, so concurrent
//! notifications for the same user never overwrite each other's changes.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::time::now_ms;

/// Access to a user's push delivery targets.
#[async_trait]
pub trait PushTargetRepository: Send + Sync {
    /// Serialized web push subscriptions, oldest first.
    async fn list_web_push_subscriptions(&self, user_id: &str) -> Result<Vec<String>>;

    async fn add_web_push_subscription(&self, user_id: &str, subscription: &str) -> Result<()>;

    /// Remove every copy of `subscription` from the user. Returns the number of
    /// rows removed.
    async fn remove_web_push_subscription(&self, user_id: &str, subscription: &str)
    -> Result<u64>;

    /// Expo tokens in registration order, duplicates included.
    async fn list_expo_tokens(&self, user_id: &str) -> Result<Vec<String>>;

    async fn add_expo_token(&self, user_id: &str, token: &str) -> Result<()>;

    /// Collapse duplicate Expo tokens, keeping the first registration of each.
    /// Returns the number of rows removed.
    async fn dedupe_expo_tokens(&self, user_id: &str) -> Result<u64>;
}

/// SQLx implementation of PushTargetRepository.
pub struct SqlxPushTargetRepository {
    pool: SqlitePool,
}

impl SqlxPushTargetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PushTargetRepository for SqlxPushTargetRepository {
    async fn list_web_push_subscriptions(&self, user_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT subscription FROM web_push_subscriptions WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    async fn add_web_push_subscription(&self, user_id: &str, subscription: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO web_push_subscriptions (user_id, subscription, created_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(subscription)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_web_push_subscription(
        &self,
        user_id: &str,
        subscription: &str,
    ) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM web_push_subscriptions WHERE user_id = ? AND subscription = ?")
                .bind(user_id)
                .bind(subscription)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn list_expo_tokens(&self, user_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT token FROM expo_push_tokens WHERE user_id = ? ORDER BY id")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    async fn add_expo_token(&self, user_id: &str, token: &str) -> Result<()> {
        sqlx::query("INSERT INTO expo_push_tokens (user_id, token, created_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(token)
            .bind(now_ms())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn dedupe_expo_tokens(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM expo_push_tokens
            WHERE user_id = ?
              AND id NOT IN (
                  SELECT MIN(id) FROM expo_push_tokens WHERE user_id = ? GROUP BY token
              )
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::UserDbModel;
    use crate::database::repositories::{SqlxUserRepository, UserRepository};
    use crate::database::test_pool;

    async fn setup() -> (SqlxPushTargetRepository, String, String) {
        let pool = test_pool().await;
        let users = SqlxUserRepository::new(pool.clone());
        let alice = UserDbModel::new("alice");
        let bob = UserDbModel::new("bob");
        users.create(&alice).await.unwrap();
        users.create(&bob).await.unwrap();
        (SqlxPushTargetRepository::new(pool), alice.id, bob.id)
    }

    #[tokio::test]
    async fn test_remove_subscription_is_scoped_to_user() {
        let (repo, alice, bob) = setup().await;
        repo.add_web_push_subscription(&alice, "sub-A").await.unwrap();
        repo.add_web_push_subscription(&alice, "sub-B").await.unwrap();
        repo.add_web_push_subscription(&alice, "sub-A").await.unwrap();
        repo.add_web_push_subscription(&bob, "sub-A").await.unwrap();

        let removed = repo.remove_web_push_subscription(&alice, "sub-A").await.unwrap();
        assert_eq!(removed, 2);

        assert_eq!(
            repo.list_web_push_subscriptions(&alice).await.unwrap(),
            vec!["sub-B".to_string()]
        );
        assert_eq!(
            repo.list_web_push_subscriptions(&bob).await.unwrap(),
            vec!["sub-A".to_string()]
        );
    }

    #[tokio::test]
    async fn test_dedupe_tokens_keeps_first_of_each() {
        let (repo, alice, bob) = setup().await;
        for token in ["tok1", "tok1", "tok2", "tok1", "tok2"] {
            repo.add_expo_token(&alice, token).await.unwrap();
        }
        repo.add_expo_token(&bob, "tok1").await.unwrap();
        repo.add_expo_token(&bob, "tok1").await.unwrap();

        let removed = repo.dedupe_expo_tokens(&alice).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(
            repo.list_expo_tokens(&alice).await.unwrap(),
            vec!["tok1".to_string(), "tok2".to_string()]
        );

        // Other users are untouched.
        assert_eq!(repo.list_expo_tokens(&bob).await.unwrap().len(), 2);

        // Already unique: nothing to do.
        assert_eq!(repo.dedupe_expo_tokens(&alice).await.unwrap(), 0);
    }
}
