use std::sync::Arc;

use anyhow::Result;
use heritage_db::models::LikeRow;
use heritage_db::{Database, db_now, is_unique_violation, queries};
use heritage_types::models::{Like, ToggleOutcome};
use rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use crate::error::ReactionError;
use crate::identity::Identity;

/// Likes on comments: at most one per user and comment.
pub struct ReactionLedger {
    db: Arc<Database>,
    identity: Arc<dyn Identity>,
}

impl ReactionLedger {
    pub fn new(db: Arc<Database>, identity: Arc<dyn Identity>) -> Self {
        Self { db, identity }
    }

    /// Like if not liked, unlike if liked. The returned count is read in the
    /// same transaction as the change.
    pub fn toggle(&self, user_id: Uuid, comment_id: Uuid) -> Result<ToggleOutcome, ReactionError> {
        if !self.identity.is_verified(user_id)? {
            return Err(ReactionError::NotVerified(user_id));
        }

        let uid = user_id.to_string();
        let cid = comment_id.to_string();

        let outcome = self.db.with_tx(|conn| {
            if queries::comment_by_id(conn, &cid)?.is_none() {
                return Err(ReactionError::CommentNotFound(comment_id));
            }

            let liked = match queries::like_id(conn, &uid, &cid)? {
                Some(existing) => {
                    queries::delete_like(conn, &existing)?;
                    false
                }
                None => {
                    like_once(conn, &uid, &cid)?;
                    true
                }
            };

            let like_count = queries::count_likes(conn, &cid)?;
            Ok(ToggleOutcome { liked, like_count })
        })?;

        debug!(
            "User {} {} comment {} (now {})",
            user_id,
            if outcome.liked { "liked" } else { "unliked" },
            comment_id,
            outcome.like_count
        );
        Ok(outcome)
    }

    /// Distinct users liking the comment. Unknown comments have none.
    pub fn count_for(&self, comment_id: Uuid) -> Result<u64, ReactionError> {
        Ok(self
            .db
            .with_conn(|conn| queries::count_likes(conn, &comment_id.to_string()))?)
    }

    /// Who liked the comment, oldest like first.
    pub fn likes_on(&self, comment_id: Uuid) -> Result<Vec<Like>, ReactionError> {
        let likes = self.db.with_conn(|conn| {
            queries::likes_for_comment(conn, &comment_id.to_string())?
                .into_iter()
                .map(LikeRow::into_like)
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(likes)
    }

    pub fn liked_by(&self, user_id: Uuid, comment_id: Uuid) -> Result<bool, ReactionError> {
        let liked = self.db.with_conn(|conn| {
            Ok(queries::like_id(conn, &user_id.to_string(), &comment_id.to_string())?.is_some())
        })?;
        Ok(liked)
    }
}

/// Insert the like unless the pair already has one.
fn like_once(conn: &Connection, user_id: &str, comment_id: &str) -> Result<()> {
    match queries::insert_like(conn, &Uuid::new_v4().to_string(), user_id, comment_id, db_now()) {
        Ok(()) => Ok(()),
        // A like that already exists is the state we wanted.
        Err(e) if is_unique_violation(&e) => {
            debug!("Like by {} on {} already present", user_id, comment_id);
            Ok(())
        }
        Err(e) => Err(e),
    }
}
