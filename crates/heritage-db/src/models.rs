//! Database row types: these map directly to SQLite rows.
//! Distinct from heritage-types models to keep the DB layer independent.
use anyhow::{Result, anyhow};
use heritage_types::models::{Comment, Like, MediaRef, StorageBackend};
use uuid::Uuid;

use crate::from_db_time;

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub email_verified: bool,
    pub is_admin: bool,
    pub created_at: String,
}

pub struct CommentRow {
    pub id: String,
    pub project_id: String,
    pub author_id: String,
    pub parent_id: Option<String>,
    pub content: String,
    pub created_at: String,
}

pub struct MediaRow {
    pub comment_id: String,
    pub position: i64,
    pub location: String,
    pub backend: String,
}

impl MediaRow {
    pub fn into_media_ref(self) -> Result<MediaRef> {
        let backend: StorageBackend = self
            .backend
            .parse()
            .map_err(|e| anyhow!("Corrupt media row for comment '{}': {}", self.comment_id, e))?;
        Ok(MediaRef::new(self.location, backend))
    }
}

impl CommentRow {
    /// Build the domain comment. `media` must already be in position order.
    pub fn into_comment(self, media: Vec<MediaRef>) -> Result<Comment> {
        let id = parse_uuid(&self.id, "id", &self.id)?;
        let author_id = parse_uuid(&self.author_id, "author_id", &self.id)?;
        let parent_id = self
            .parent_id
            .as_deref()
            .map(|p| parse_uuid(p, "parent_id", &self.id))
            .transpose()?;

        Ok(Comment {
            id,
            project_id: self.project_id,
            author_id,
            parent_id,
            text: self.content,
            media,
            created_at: from_db_time(&self.created_at)?,
        })
    }
}

pub struct LikeRow {
    pub id: String,
    pub user_id: String,
    pub comment_id: String,
    pub created_at: String,
}

impl LikeRow {
    pub fn into_like(self) -> Result<Like> {
        Ok(Like {
            id: parse_uuid(&self.id, "id", &self.comment_id)?,
            user_id: parse_uuid(&self.user_id, "user_id", &self.comment_id)?,
            comment_id: parse_uuid(&self.comment_id, "comment_id", &self.comment_id)?,
            created_at: from_db_time(&self.created_at)?,
        })
    }
}

fn parse_uuid(raw: &str, column: &str, row_id: &str) -> Result<Uuid> {
    raw.parse()
        .map_err(|e| anyhow!("Corrupt {} '{}' on comment '{}': {}", column, raw, row_id, e))
}
