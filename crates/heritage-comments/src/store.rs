use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use heritage_db::models::{CommentRow, MediaRow};
use heritage_db::{Database, db_now, queries};
use heritage_types::models::{Comment, CommentNode, MediaRef, RequesterContext, has_content};
use rusqlite::Connection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::CommentError;
use crate::identity::Identity;
use crate::tree;

/// Behaviour switches for [`CommentStore`].
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Let an anonymous requester delete a comment by naming the author's
    /// email. Kept for old clients; every use is logged.
    pub legacy_email_delete: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            legacy_email_delete: true,
        }
    }
}

impl StoreSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let legacy_email_delete = lookup("HERITAGE_LEGACY_EMAIL_DELETE")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(true);
        Self {
            legacy_email_delete,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub project_id: String,
    pub author_id: Uuid,
    pub text: String,
    pub parent_id: Option<Uuid>,
    pub media: Vec<MediaRef>,
}

/// What a subtree delete removed. `comment_ids` is children first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedSubtree {
    pub comment_ids: Vec<Uuid>,
    pub likes_removed: usize,
}

pub struct CommentStore {
    db: Arc<Database>,
    identity: Arc<dyn Identity>,
    settings: StoreSettings,
}

impl CommentStore {
    pub fn new(db: Arc<Database>, identity: Arc<dyn Identity>, settings: StoreSettings) -> Self {
        Self {
            db,
            identity,
            settings,
        }
    }

    pub fn create(&self, new: NewComment) -> Result<Comment, CommentError> {
        let text = new.text.trim().to_string();
        if !has_content(&text, &new.media) {
            return Err(CommentError::EmptyContent);
        }
        // Identity lookups take the connection lock themselves, so they run
        // before the transaction does.
        self.check_author(new.author_id)?;

        let comment = Comment {
            id: Uuid::new_v4(),
            project_id: new.project_id,
            author_id: new.author_id,
            parent_id: new.parent_id,
            text,
            media: new.media,
            created_at: db_now(),
        };

        self.db.with_tx(|conn| {
            if let Some(parent_id) = comment.parent_id {
                let parent = queries::comment_by_id(conn, &parent_id.to_string())?;
                check_parent(&comment.project_id, parent_id, parent)?;
            }
            queries::insert_comment(conn, &comment)?;
            Ok::<(), CommentError>(())
        })?;

        info!(
            "Comment {} added to '{}' ({} media, reply: {})",
            comment.id,
            comment.project_id,
            comment.media.len(),
            comment.parent_id.is_some()
        );
        Ok(comment)
    }

    /// The author and parent checks of [`Self::create`], without writing
    /// anything. Lets callers refuse a comment before uploading its media.
    pub fn check(&self, new: &NewComment) -> Result<(), CommentError> {
        self.check_author(new.author_id)?;
        if let Some(parent_id) = new.parent_id {
            let parent = self
                .db
                .with_conn(|conn| queries::comment_by_id(conn, &parent_id.to_string()))?;
            check_parent(&new.project_id, parent_id, parent)?;
        }
        Ok(())
    }

    fn check_author(&self, author_id: Uuid) -> Result<(), CommentError> {
        if !self.identity.is_verified(author_id)? {
            return Err(CommentError::AuthorNotVerified(author_id));
        }
        Ok(())
    }

    pub fn get(&self, comment_id: Uuid) -> Result<Option<Comment>, CommentError> {
        let comment = self.db.with_conn(|conn| {
            let Some(row) = queries::comment_by_id(conn, &comment_id.to_string())? else {
                return Ok(None);
            };
            let mut media = queries::media_for_comments(conn, std::slice::from_ref(&row.id))?;
            assemble(row, &mut media).map(Some)
        })?;
        Ok(comment)
    }

    /// Every comment of a project as a forest, annotated for `viewer`.
    pub fn get_tree(
        &self,
        project_id: &str,
        viewer: Option<Uuid>,
    ) -> Result<Vec<CommentNode>, CommentError> {
        let forest = self.db.with_conn(|conn| {
            let rows = queries::comments_for_project(conn, project_id)?;
            let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
            let mut media = queries::media_for_comments(conn, &ids)?;
            let like_counts = queries::like_counts_for_project(conn, project_id)?;
            let liked = match viewer {
                Some(user) => queries::liked_comment_ids(conn, project_id, &user.to_string())?,
                None => HashSet::new(),
            };

            let comments = rows
                .into_iter()
                .map(|row| assemble(row, &mut media))
                .collect::<Result<Vec<_>>>()?;

            debug!("Loaded {} comments for '{}'", comments.len(), project_id);
            Ok(tree::build_forest(comments, &like_counts, &liked))
        })?;
        Ok(forest)
    }

    pub fn count_for_project(&self, project_id: &str) -> Result<u64, CommentError> {
        Ok(self
            .db
            .with_conn(|conn| queries::count_comments_for_project(conn, project_id))?)
    }

    /// Remove a comment, every descendant, and all their likes, atomically.
    pub fn delete_subtree(
        &self,
        comment_id: Uuid,
        requester: &RequesterContext,
    ) -> Result<DeletedSubtree, CommentError> {
        let id = comment_id.to_string();
        let target = self
            .db
            .with_conn(|conn| queries::comment_by_id(conn, &id))?
            .ok_or(CommentError::NotFound(comment_id))?;
        let author_id: Uuid = target
            .author_id
            .parse()
            .with_context(|| format!("Corrupt author_id on comment {}", id))?;

        self.authorize_delete(comment_id, author_id, requester)?;

        let (ids, likes_removed) = self.db.with_tx(|conn| {
            // Someone else may have removed it since the check above.
            if queries::comment_by_id(conn, &id)?.is_none() {
                return Err(CommentError::NotFound(comment_id));
            }
            let mut ids = subtree_ids(conn, &id)?;
            ids.reverse();
            let likes_removed = queries::delete_comments(conn, &ids)?;
            Ok((ids, likes_removed))
        })?;

        let comment_ids = ids
            .iter()
            .map(|raw| raw.parse::<Uuid>().map_err(|e| anyhow!("Corrupt comment id '{}': {}", raw, e)))
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Deleted comment {} with {} descendant(s) and {} like(s)",
            comment_id,
            comment_ids.len() - 1,
            likes_removed
        );
        Ok(DeletedSubtree {
            comment_ids,
            likes_removed,
        })
    }

    fn authorize_delete(
        &self,
        comment_id: Uuid,
        author_id: Uuid,
        requester: &RequesterContext,
    ) -> Result<(), CommentError> {
        if requester.user_id == Some(author_id) {
            return Ok(());
        }
        if self.identity.is_admin(requester)? {
            debug!("Admin delete of comment {}", comment_id);
            return Ok(());
        }

        if self.settings.legacy_email_delete {
            if let Some(claimed) = requester.claimed_email.as_deref() {
                let author_email = self.identity.email_of(author_id)?;
                if author_email.is_some_and(|email| email.trim().eq_ignore_ascii_case(claimed.trim())) {
                    warn!(
                        "Comment {} deleted by unauthenticated email match; this path is deprecated",
                        comment_id
                    );
                    return Ok(());
                }
            }
        }

        Err(CommentError::NotAuthorized(comment_id))
    }
}

fn check_parent(project_id: &str, parent_id: Uuid, parent: Option<CommentRow>) -> Result<(), CommentError> {
    let parent = parent.ok_or(CommentError::ParentNotFound(parent_id))?;
    if parent.project_id != project_id {
        return Err(CommentError::ParentProjectMismatch {
            parent_id,
            parent_project: parent.project_id,
            project: project_id.to_string(),
        });
    }
    Ok(())
}

/// Breadth-first ids of `root` and all descendants, parents before children.
fn subtree_ids(conn: &Connection, root: &str) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    let mut queue = VecDeque::from([root.to_string()]);
    while let Some(id) = queue.pop_front() {
        queue.extend(queries::child_ids(conn, &id)?);
        ids.push(id);
    }
    Ok(ids)
}

fn assemble(row: CommentRow, media: &mut HashMap<String, Vec<MediaRow>>) -> Result<Comment> {
    let refs = media
        .remove(&row.id)
        .unwrap_or_default()
        .into_iter()
        .map(MediaRow::into_media_ref)
        .collect::<Result<Vec<_>>>()?;
    row.into_comment(refs)
}
