use std::sync::Arc;

use anyhow::Result;
use heritage_db::Database;
use heritage_types::models::RequesterContext;
use uuid::Uuid;

/// Account facts the comment core needs but does not own.
pub trait Identity: Send + Sync {
    /// Unknown users are simply not verified.
    fn is_verified(&self, user_id: Uuid) -> Result<bool>;

    fn is_admin(&self, requester: &RequesterContext) -> Result<bool>;

    fn email_of(&self, user_id: Uuid) -> Result<Option<String>>;
}

/// [`Identity`] backed by the `users` table.
pub struct DbIdentity {
    db: Arc<Database>,
}

impl DbIdentity {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl Identity for DbIdentity {
    fn is_verified(&self, user_id: Uuid) -> Result<bool> {
        let user = self.db.get_user_by_id(&user_id.to_string())?;
        Ok(user.is_some_and(|u| u.email_verified))
    }

    fn is_admin(&self, requester: &RequesterContext) -> Result<bool> {
        if requester.admin_session {
            return Ok(true);
        }
        let Some(user_id) = requester.user_id else {
            return Ok(false);
        };
        let user = self.db.get_user_by_id(&user_id.to_string())?;
        Ok(user.is_some_and(|u| u.is_admin))
    }

    fn email_of(&self, user_id: Uuid) -> Result<Option<String>> {
        Ok(self
            .db
            .get_user_by_id(&user_id.to_string())?
            .map(|u| u.email))
    }
}
