//! SQL for users, comments, comment media and likes.
//!
//! Everything here takes a plain `&Connection` so the same function can run on
//! its own or as one step of a [`Database::with_tx`] transaction.

use std::collections::{HashMap, HashSet};

use crate::models::{CommentRow, LikeRow, MediaRow, UserRow};
use crate::{Database, to_db_time};
use anyhow::Result;
use chrono::{DateTime, Utc};
use heritage_types::models::{Comment, MediaRef};
use rusqlite::{Connection, ErrorCode, params_from_iter};

/// Stay well under SQLite's bound-parameter limit for `IN (...)` lists.
const MAX_IN_PARAMS: usize = 500;

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &UserRow) -> Result<()> {
        self.with_conn(|conn| insert_user(conn, user))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| user_by_id(conn, id))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| user_by_email(conn, email))
    }
}

// -- Users --

pub fn insert_user(conn: &Connection, user: &UserRow) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, name, email, email_verified, is_admin, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            user.id,
            user.name,
            user.email,
            user.email_verified,
            user.is_admin,
            user.created_at
        ],
    )?;
    Ok(())
}

pub fn user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    query_user(conn, "WHERE id = ?1", id)
}

pub fn user_by_email(conn: &Connection, email: &str) -> Result<Option<UserRow>> {
    query_user(conn, "WHERE email = ?1 COLLATE NOCASE", email)
}

fn query_user(conn: &Connection, filter: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, name, email, email_verified, is_admin, created_at FROM users {}",
        filter
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                email_verified: row.get(3)?,
                is_admin: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

// -- Comments --

/// Insert a comment together with its media rows.
pub fn insert_comment(conn: &Connection, comment: &Comment) -> Result<()> {
    conn.execute(
        "INSERT INTO comments (id, project_id, author_id, parent_id, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            comment.id.to_string(),
            comment.project_id,
            comment.author_id.to_string(),
            comment.parent_id.map(|p| p.to_string()),
            comment.text,
            to_db_time(comment.created_at),
        ],
    )?;
    insert_media(conn, &comment.id.to_string(), &comment.media)
}

fn insert_media(conn: &Connection, comment_id: &str, media: &[MediaRef]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO comment_media (comment_id, position, location, backend)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (position, m) in media.iter().enumerate() {
        stmt.execute(rusqlite::params![
            comment_id,
            position as i64,
            m.location,
            m.backend.as_str()
        ])?;
    }
    Ok(())
}

const COMMENT_COLUMNS: &str = "id, project_id, author_id, parent_id, content, created_at";

fn comment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        author_id: row.get(2)?,
        parent_id: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn comment_by_id(conn: &Connection, id: &str) -> Result<Option<CommentRow>> {
    let sql = format!("SELECT {} FROM comments WHERE id = ?1", COMMENT_COLUMNS);
    let row = conn.query_row(&sql, [id], comment_row).optional()?;
    Ok(row)
}

/// All comments of a project, oldest first. Ties keep insertion order.
pub fn comments_for_project(conn: &Connection, project_id: &str) -> Result<Vec<CommentRow>> {
    let sql = format!(
        "SELECT {} FROM comments WHERE project_id = ?1 ORDER BY created_at ASC, rowid ASC",
        COMMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([project_id], comment_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn child_ids(conn: &Connection, parent_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM comments WHERE parent_id = ?1")?;
    let ids = stmt
        .query_map([parent_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn count_comments(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM comments", [], |r| r.get(0))?;
    Ok(n as u64)
}

pub fn count_comments_for_project(conn: &Connection, project_id: &str) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM comments WHERE project_id = ?1",
        [project_id],
        |r| r.get(0),
    )?;
    Ok(n as u64)
}

/// Media rows for a set of comments, grouped by comment id, each group in
/// position order.
pub fn media_for_comments(
    conn: &Connection,
    comment_ids: &[String],
) -> Result<HashMap<String, Vec<MediaRow>>> {
    let mut grouped: HashMap<String, Vec<MediaRow>> = HashMap::new();

    for chunk in comment_ids.chunks(MAX_IN_PARAMS) {
        let sql = format!(
            "SELECT comment_id, position, location, backend FROM comment_media
             WHERE comment_id IN ({}) ORDER BY comment_id, position",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
            Ok(MediaRow {
                comment_id: row.get(0)?,
                position: row.get(1)?,
                location: row.get(2)?,
                backend: row.get(3)?,
            })
        })?;
        for row in rows {
            let row = row?;
            grouped.entry(row.comment_id.clone()).or_default().push(row);
        }
    }

    Ok(grouped)
}

/// Remove comments, their media rows and every like that points at them.
///
/// `ids` must list children before their parents; the delete runs in that
/// order so the `parent_id` foreign key holds after every statement.
/// Returns the number of likes removed.
pub fn delete_comments(conn: &Connection, ids: &[String]) -> Result<usize> {
    let mut likes_removed = 0;
    for chunk in ids.chunks(MAX_IN_PARAMS) {
        let marks = placeholders(chunk.len());
        likes_removed += conn.execute(
            &format!("DELETE FROM likes WHERE comment_id IN ({})", marks),
            params_from_iter(chunk.iter()),
        )?;
        conn.execute(
            &format!("DELETE FROM comment_media WHERE comment_id IN ({})", marks),
            params_from_iter(chunk.iter()),
        )?;
        conn.execute(
            &format!("DELETE FROM comments WHERE id IN ({})", marks),
            params_from_iter(chunk.iter()),
        )?;
    }
    Ok(likes_removed)
}

// -- Likes --

pub fn like_id(conn: &Connection, user_id: &str, comment_id: &str) -> Result<Option<String>> {
    let id = conn
        .query_row(
            "SELECT id FROM likes WHERE user_id = ?1 AND comment_id = ?2",
            [user_id, comment_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn insert_like(
    conn: &Connection,
    id: &str,
    user_id: &str,
    comment_id: &str,
    created_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO likes (id, user_id, comment_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![id, user_id, comment_id, to_db_time(created_at)],
    )?;
    Ok(())
}

pub fn delete_like(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM likes WHERE id = ?1", [id])?;
    Ok(())
}

/// Likes on one comment, oldest first.
pub fn likes_for_comment(conn: &Connection, comment_id: &str) -> Result<Vec<LikeRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, comment_id, created_at FROM likes
         WHERE comment_id = ?1 ORDER BY created_at ASC, rowid ASC",
    )?;
    let rows = stmt
        .query_map([comment_id], |row| {
            Ok(LikeRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                comment_id: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_likes(conn: &Connection, comment_id: &str) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT user_id) FROM likes WHERE comment_id = ?1",
        [comment_id],
        |r| r.get(0),
    )?;
    Ok(n as u64)
}

/// Like counts for every liked comment of a project.
pub fn like_counts_for_project(conn: &Connection, project_id: &str) -> Result<HashMap<String, u64>> {
    let mut stmt = conn.prepare(
        "SELECT l.comment_id, COUNT(DISTINCT l.user_id)
         FROM likes l
         JOIN comments c ON c.id = l.comment_id
         WHERE c.project_id = ?1
         GROUP BY l.comment_id",
    )?;
    let counts = stmt
        .query_map([project_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?
        .collect::<std::result::Result<HashMap<_, _>, _>>()?;
    Ok(counts)
}

/// Ids of the comments in a project that `user_id` currently likes.
pub fn liked_comment_ids(conn: &Connection, project_id: &str, user_id: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT l.comment_id
         FROM likes l
         JOIN comments c ON c.id = l.comment_id
         WHERE c.project_id = ?1 AND l.user_id = ?2",
    )?;
    let ids = stmt
        .query_map([project_id, user_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<HashSet<_>, _>>()?;
    Ok(ids)
}

/// True when `err` is SQLite refusing a row because of a UNIQUE or PRIMARY KEY
/// constraint.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<rusqlite::Error>() {
        Some(rusqlite::Error::SqliteFailure(e, _)) => {
            e.code == ErrorCode::ConstraintViolation
                && matches!(
                    e.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
        }
        _ => false,
    }
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_now;
    use heritage_types::models::StorageBackend;
    use uuid::Uuid;

    fn user(conn: &Connection, email: &str) -> String {
        let id = Uuid::new_v4().to_string();
        insert_user(
            conn,
            &UserRow {
                id: id.clone(),
                name: "Nino".into(),
                email: email.into(),
                email_verified: true,
                is_admin: false,
                created_at: to_db_time(db_now()),
            },
        )
        .unwrap();
        id
    }

    fn comment(author: &str, parent: Option<Uuid>, media: Vec<MediaRef>) -> Comment {
        Comment {
            id: Uuid::new_v4(),
            project_id: "gelati".into(),
            author_id: author.parse().unwrap(),
            parent_id: parent,
            text: "text".into(),
            media,
            created_at: db_now(),
        }
    }

    #[test]
    fn comment_and_media_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let author = user(conn, "a@example.com");
            let media = vec![
                MediaRef::new("https://cdn/1.jpg", StorageBackend::Cloudinary),
                MediaRef::new("/projects/gelati/comments/2.mp4", StorageBackend::Local),
            ];
            let c = comment(&author, None, media.clone());
            insert_comment(conn, &c)?;

            let row = comment_by_id(conn, &c.id.to_string())?.unwrap();
            let mut grouped = media_for_comments(conn, &[c.id.to_string()])?;
            let refs = grouped
                .remove(&c.id.to_string())
                .unwrap()
                .into_iter()
                .map(MediaRow::into_media_ref)
                .collect::<Result<Vec<_>>>()?;
            assert_eq!(row.into_comment(refs)?, c);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn duplicate_like_is_a_unique_violation() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let author = user(conn, "a@example.com");
            let c = comment(&author, None, vec![]);
            insert_comment(conn, &c)?;
            let cid = c.id.to_string();

            insert_like(conn, &Uuid::new_v4().to_string(), &author, &cid, db_now())?;
            let err = insert_like(conn, &Uuid::new_v4().to_string(), &author, &cid, db_now())
                .unwrap_err();
            assert!(is_unique_violation(&err));
            assert!(!is_unique_violation(&anyhow::anyhow!("other")));
            assert_eq!(count_likes(conn, &cid)?, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn delete_children_first_respects_foreign_keys() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let author = user(conn, "a@example.com");
            let parent = comment(&author, None, vec![]);
            let child = comment(&author, Some(parent.id), vec![]);
            insert_comment(conn, &parent)?;
            insert_comment(conn, &child)?;
            insert_like(conn, &Uuid::new_v4().to_string(), &author, &child.id.to_string(), db_now())?;

            let removed = delete_comments(conn, &[child.id.to_string(), parent.id.to_string()])?;
            assert_eq!(removed, 1);
            assert_eq!(count_comments(conn)?, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn user_lookup_by_email_ignores_case() {
        let db = Database::open_in_memory().unwrap();
        let id = db.with_conn(|conn| Ok(user(conn, "Nino@Example.com"))).unwrap();
        let found = db.get_user_by_email("nino@example.com").unwrap().unwrap();
        assert_eq!(found.id, id);
        assert!(db.get_user_by_id("missing").unwrap().is_none());
    }
}
