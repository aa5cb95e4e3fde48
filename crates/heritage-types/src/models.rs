use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A comment on a project. Replies point at their parent through `parent_id`.
///
/// Comments are never edited: they are created once and only ever removed as
/// part of a subtree deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub project_id: String,
    pub author_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub text: String,
    pub media: Vec<MediaRef>,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// True when a comment body carries something worth storing.
/// Whitespace-only text counts as empty.
pub fn has_content(text: &str, media: &[MediaRef]) -> bool {
    !text.trim().is_empty() || !media.is_empty()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Like {
    pub id: Uuid,
    pub user_id: Uuid,
    pub comment_id: Uuid,
    pub created_at: DateTime<Utc>,
}

// -- Media --

/// Where a media reference physically lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Cloudinary,
    R2,
    Local,
    /// Pre-existing URL carried over from legacy data.
    External,
}

impl StorageBackend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cloudinary => "cloudinary",
            Self::R2 => "r2",
            Self::Local => "local",
            Self::External => "external",
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cloudinary" => Ok(Self::Cloudinary),
            "r2" => Ok(Self::R2),
            "local" => Ok(Self::Local),
            "external" => Ok(Self::External),
            other => Err(format!("unknown storage backend: {}", other)),
        }
    }
}

/// Durable pointer to an uploaded file: a URL for remote backends, a
/// site-relative path for the local one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub location: String,
    pub backend: StorageBackend,
}

impl MediaRef {
    pub fn new(location: impl Into<String>, backend: StorageBackend) -> Self {
        Self {
            location: location.into(),
            backend,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn is_video(self) -> bool {
        matches!(self, Self::Video)
    }
}

// -- Read models --

/// One node of a rendered comment tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentNode {
    pub comment: Comment,
    pub like_count: u64,
    /// Always false when the tree was requested without a viewer.
    pub liked_by_viewer: bool,
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    /// Number of comments in this node's subtree, itself included.
    pub fn subtree_len(&self) -> usize {
        let mut len = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            len += 1;
            stack.extend(&node.replies);
        }
        len
    }
}

// Reply chains can be arbitrarily deep; unlink them one level at a time
// instead of letting drop glue recurse.
impl Drop for CommentNode {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.replies);
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.replies);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleOutcome {
    pub liked: bool,
    pub like_count: u64,
}

/// Who is asking. Passed explicitly into every authorization check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequesterContext {
    pub user_id: Option<Uuid>,
    /// Set by the outer layer when the request carries an admin login.
    pub admin_session: bool,
    /// Email typed in by someone claiming to be a comment's author.
    pub claimed_email: Option<String>,
}

impl RequesterContext {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn admin_session() -> Self {
        Self {
            admin_session: true,
            ..Self::default()
        }
    }

    pub fn anonymous_with_email(email: impl Into<String>) -> Self {
        Self {
            claimed_email: Some(email.into()),
            ..Self::default()
        }
    }
}
