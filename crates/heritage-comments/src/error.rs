use std::path::PathBuf;

use heritage_media::UploadFailure;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CommentError {
    #[error("comment has neither text nor media")]
    EmptyContent,

    #[error("author {0} is not a verified user")]
    AuthorNotVerified(Uuid),

    #[error("parent comment {0} does not exist")]
    ParentNotFound(Uuid),

    #[error("parent comment {parent_id} belongs to project '{parent_project}', not '{project}'")]
    ParentProjectMismatch {
        parent_id: Uuid,
        parent_project: String,
        project: String,
    },

    #[error("comment {0} does not exist")]
    NotFound(Uuid),

    #[error("not allowed to delete comment {0}")]
    NotAuthorized(Uuid),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ReactionError {
    #[error("comment {0} does not exist")]
    CommentNotFound(Uuid),

    #[error("user {0} is not a verified user")]
    NotVerified(Uuid),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("store already holds {existing} comments; refusing to import")]
    AlreadyPopulated { existing: u64 },

    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("legacy comments are not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Failures of the request-level operations in [`crate::service`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Upload(#[from] UploadFailure),

    #[error(transparent)]
    Comment(#[from] CommentError),

    #[error(transparent)]
    Reaction(#[from] ReactionError),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
