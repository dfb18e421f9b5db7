//! Community repository for database operations.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::CommunityDbModel;

/// Community repository trait.
#[async_trait]
pub trait CommunityRepository: Send + Sync {
    async fn create(&self, community: &CommunityDbModel) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<CommunityDbModel>>;
}

/// SQLx implementation of CommunityRepository.
pub struct SqlxCommunityRepository {
    pool: SqlitePool,
}

impl SqlxCommunityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommunityRepository for SqlxCommunityRepository {
    async fn create(&self, community: &CommunityDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO communities (id, name, image_enabled, image, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&community.id)
        .bind(&community.name)
        .bind(community.image_enabled)
        .bind(&community.image)
        .bind(community.created_at)
        .bind(community.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<CommunityDbModel>> {
        let community =
            sqlx::query_as::<_, CommunityDbModel>("SELECT * FROM communities WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(community)
    }
}
