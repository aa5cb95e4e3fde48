use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                email           TEXT NOT NULL UNIQUE,
                email_verified  INTEGER NOT NULL DEFAULT 0,
                is_admin        INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            );

            CREATE TABLE comments (
                id          TEXT PRIMARY KEY,
                project_id  TEXT NOT NULL,
                author_id   TEXT NOT NULL REFERENCES users(id),
                parent_id   TEXT REFERENCES comments(id),
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_comments_project
                ON comments(project_id, created_at);

            CREATE INDEX idx_comments_parent
                ON comments(parent_id);

            CREATE TABLE comment_media (
                comment_id  TEXT NOT NULL REFERENCES comments(id),
                position    INTEGER NOT NULL,
                location    TEXT NOT NULL,
                backend     TEXT NOT NULL,
                PRIMARY KEY (comment_id, position)
            );

            CREATE TABLE likes (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id),
                comment_id  TEXT NOT NULL REFERENCES comments(id),
                created_at  TEXT NOT NULL,
                UNIQUE(user_id, comment_id)
            );

            CREATE INDEX idx_likes_comment
                ON likes(comment_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_twice_is_harmless() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
