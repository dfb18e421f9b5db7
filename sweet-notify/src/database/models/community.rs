//! Community database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Community database model.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CommunityDbModel {
    pub id: String,
    pub name: String,
    pub image_enabled: bool,
    pub image: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CommunityDbModel {
    pub fn new(name: impl Into<String>) -> Self {
        let now = crate::database::time::now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            image_enabled: false,
            image: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The community image, if one is enabled.
    pub fn display_image(&self) -> Option<&str> {
        if self.image_enabled {
            self.image.as_deref().filter(|image| !image.is_empty())
        } else {
            None
        }
    }
}
