//! One-time import of the legacy `comments.json` document.
//!
//! The legacy file maps project ids to lists of comments in three historical
//! shapes (see [`LegacyShape`]). Each shape is normalized into ordinary
//! [`Comment`] records owned by a single imported author.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use heritage_db::models::UserRow;
use heritage_db::{Database, db_now, queries, to_db_time};
use heritage_types::legacy::{LegacyDocument, LegacyShape};
use heritage_types::models::{Comment, CommentNode, MediaRef, StorageBackend, has_content};
use rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::MigrationError;
use crate::tree;

pub const IMPORTED_AUTHOR_EMAIL: &str = "imported@comments.local";
const IMPORTED_AUTHOR_NAME: &str = "Imported";

/// Hands out strictly increasing timestamps so that document order survives
/// as creation order.
#[derive(Debug, Clone)]
pub struct ImportClock {
    next: DateTime<Utc>,
}

impl ImportClock {
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self { next: start }
    }

    pub fn tick(&mut self) -> DateTime<Utc> {
        let now = self.next;
        self.next += Duration::microseconds(1);
        now
    }
}

/// Legacy media strings are either absolute URLs or bare file names under
/// the project's comment directory.
pub fn legacy_media_ref(project_id: &str, raw: &str) -> MediaRef {
    let raw = raw.trim();
    if raw.starts_with("http://") || raw.starts_with("https://") {
        MediaRef::new(raw, StorageBackend::External)
    } else if raw.starts_with('/') {
        MediaRef::new(raw, StorageBackend::Local)
    } else {
        MediaRef::new(
            format!("/projects/{}/comments/{}", project_id, raw),
            StorageBackend::Local,
        )
    }
}

/// Flatten one legacy entry (and its replies) into comments, parents first.
///
/// Entries with neither text nor media are dropped; their replies move up to
/// the dropped entry's parent.
pub fn normalize(
    project_id: &str,
    shape: &LegacyShape,
    author_id: Uuid,
    clock: &mut ImportClock,
) -> Vec<Comment> {
    let mut out = Vec::new();
    normalize_into(project_id, shape, None, author_id, clock, &mut out);
    out
}

fn normalize_into(
    project_id: &str,
    shape: &LegacyShape,
    parent_id: Option<Uuid>,
    author_id: Uuid,
    clock: &mut ImportClock,
    out: &mut Vec<Comment>,
) {
    let text = shape.text().trim().to_string();
    let media: Vec<MediaRef> = shape
        .media()
        .map(|raw| legacy_media_ref(project_id, raw))
        .into_iter()
        .collect();

    let reply_parent = if has_content(&text, &media) {
        let comment = Comment {
            id: Uuid::new_v4(),
            project_id: project_id.to_string(),
            author_id,
            parent_id,
            text,
            media,
            created_at: clock.tick(),
        };
        let id = comment.id;
        out.push(comment);
        Some(id)
    } else {
        warn!("Dropping empty legacy comment in '{}'", project_id);
        parent_id
    };

    for reply in shape.replies() {
        normalize_into(project_id, reply, reply_parent, author_id, clock, out);
    }
}

fn shape_count(shape: &LegacyShape) -> usize {
    1 + shape.replies().iter().map(shape_count).sum::<usize>()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub projects: usize,
    pub comments: usize,
    pub replies: usize,
    pub skipped_empty: usize,
}

pub struct LegacyImporter {
    db: Arc<Database>,
}

impl LegacyImporter {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn import_file(&self, path: &Path) -> Result<ImportReport, MigrationError> {
        let raw = std::fs::read_to_string(path).map_err(|source| MigrationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let document: LegacyDocument = serde_json::from_str(&raw)?;
        self.import(&document)
    }

    /// Import everything or nothing. Refuses to run against a store that
    /// already holds comments.
    pub fn import(&self, document: &LegacyDocument) -> Result<ImportReport, MigrationError> {
        let report = self.db.with_tx(|conn| {
            let existing = queries::count_comments(conn)?;
            if existing > 0 {
                return Err(MigrationError::AlreadyPopulated { existing });
            }

            let author_id = ensure_imported_author(conn)?;
            let mut clock = ImportClock::starting_at(db_now());
            let mut report = ImportReport::default();

            for (project_id, entries) in document {
                for entry in entries {
                    let comments = normalize(project_id, entry, author_id, &mut clock);
                    report.skipped_empty += shape_count(entry) - comments.len();
                    for comment in &comments {
                        queries::insert_comment(conn, comment)?;
                        if comment.parent_id.is_some() {
                            report.replies += 1;
                        }
                    }
                    report.comments += comments.len();
                }
                report.projects += 1;
            }
            Ok(report)
        })?;

        info!(
            "Imported {} comments ({} replies) across {} projects, skipped {} empty",
            report.comments, report.replies, report.projects, report.skipped_empty
        );
        Ok(report)
    }
}

fn ensure_imported_author(conn: &Connection) -> Result<Uuid> {
    if let Some(user) = queries::user_by_email(conn, IMPORTED_AUTHOR_EMAIL)? {
        return Ok(user.id.parse()?);
    }

    let id = Uuid::new_v4();
    queries::insert_user(
        conn,
        &UserRow {
            id: id.to_string(),
            name: IMPORTED_AUTHOR_NAME.to_string(),
            email: IMPORTED_AUTHOR_EMAIL.to_string(),
            email_verified: true,
            is_admin: false,
            created_at: to_db_time(db_now()),
        },
    )?;
    info!("Created imported author {}", id);
    Ok(id)
}

/// Read-only view over a legacy document for deployments that have not
/// imported yet. Comments carry a nil author id.
pub struct LegacyCatalog {
    document: LegacyDocument,
}

impl LegacyCatalog {
    pub fn load(path: &Path) -> Result<Self, MigrationError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_json(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("No legacy comments at {}; serving none", path.display());
                Ok(Self {
                    document: LegacyDocument::new(),
                })
            }
            Err(source) => Err(MigrationError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, MigrationError> {
        Ok(Self {
            document: serde_json::from_str(raw)?,
        })
    }

    pub fn document(&self) -> &LegacyDocument {
        &self.document
    }

    /// The project's comments arranged like [`crate::store::CommentStore::get_tree`].
    pub fn tree(&self, project_id: &str) -> Vec<CommentNode> {
        let Some(entries) = self.document.get(project_id) else {
            return Vec::new();
        };
        let mut clock = ImportClock::starting_at(DateTime::<Utc>::default());
        let comments: Vec<Comment> = entries
            .iter()
            .flat_map(|entry| normalize(project_id, entry, Uuid::nil(), &mut clock))
            .collect();
        tree::build_forest(comments, &Default::default(), &Default::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::testing::Users;
    use crate::store::{CommentStore, NewComment, StoreSettings};

    const LEGACY: &str = r#"{
        "gelati": [
            "Plain old comment",
            {"text": "With a photo", "media": "fresco.jpg"},
            {"text": "Thread", "media": "https://cdn.example.com/a.png", "replies": [
                {"text": "First reply", "replies": []},
                {"text": "", "media": "", "replies": [
                    {"text": "Orphaned reply", "replies": []}
                ]}
            ]}
        ],
        "vardzia": [
            {"text": "", "media": ""}
        ]
    }"#;

    fn document() -> LegacyDocument {
        serde_json::from_str(LEGACY).unwrap()
    }

    #[test]
    fn normalize_maps_each_shape() {
        let doc = document();
        let author = Uuid::new_v4();
        let mut clock = ImportClock::starting_at(Utc::now());

        let all: Vec<Comment> = doc["gelati"]
            .iter()
            .flat_map(|entry| normalize("gelati", entry, author, &mut clock))
            .collect();

        assert_eq!(all.len(), 5);
        assert_eq!(all[0].text, "Plain old comment");
        assert!(all[0].media.is_empty());
        assert_eq!(
            all[1].media,
            [MediaRef::new("/projects/gelati/comments/fresco.jpg", StorageBackend::Local)]
        );
        assert_eq!(all[2].media[0].backend, StorageBackend::External);
        assert!(all.iter().all(|c| c.author_id == author));
        assert!(all.windows(2).all(|w| w[0].created_at < w[1].created_at));
    }

    #[test]
    fn bare_string_and_threaded_object() {
        let author = Uuid::new_v4();
        let mut clock = ImportClock::starting_at(Utc::now());

        let plain: LegacyShape = serde_json::from_str(r#""hello""#).unwrap();
        let out = normalize("p", &plain, author, &mut clock);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "hello");
        assert!(out[0].media.is_empty());
        assert_eq!(out[0].parent_id, None);

        let threaded: LegacyShape =
            serde_json::from_str(r#"{"text": "hi", "media": "pic.jpg", "replies": [{"text": "re"}]}"#)
                .unwrap();
        let out = normalize("p", &threaded, author, &mut clock);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text, "hi");
        assert_eq!(out[0].media.len(), 1);
        assert_eq!(out[0].parent_id, None);
        assert_eq!(out[1].text, "re");
        assert_eq!(out[1].parent_id, Some(out[0].id));
    }

    #[test]
    fn empty_node_is_dropped_and_its_replies_move_up() {
        let doc = document();
        let mut clock = ImportClock::starting_at(Utc::now());
        let thread = normalize("gelati", &doc["gelati"][2], Uuid::nil(), &mut clock);

        assert_eq!(thread.len(), 3);
        let root = &thread[0];
        assert!(root.is_top_level());
        let orphan = thread.iter().find(|c| c.text == "Orphaned reply").unwrap();
        assert_eq!(orphan.parent_id, Some(root.id));
    }

    #[test]
    fn import_fills_store_and_refuses_second_run() {
        let users = Users::new();
        let importer = LegacyImporter::new(users.db.clone());

        let report = importer.import(&document()).unwrap();
        assert_eq!(
            report,
            ImportReport {
                projects: 2,
                comments: 5,
                replies: 2,
                skipped_empty: 2,
            }
        );

        let store = CommentStore::new(users.db.clone(), users.identity(), StoreSettings::default());
        let forest = store.get_tree("gelati", None).unwrap();
        let roots: Vec<&str> = forest.iter().map(|n| n.comment.text.as_str()).collect();
        assert_eq!(roots, ["Thread", "With a photo", "Plain old comment"]);
        let replies: Vec<&str> = forest[0].replies.iter().map(|n| n.comment.text.as_str()).collect();
        assert_eq!(replies, ["First reply", "Orphaned reply"]);

        let author = users.db.get_user_by_email(IMPORTED_AUTHOR_EMAIL).unwrap().unwrap();
        assert!(author.email_verified);

        assert!(matches!(
            importer.import(&document()),
            Err(MigrationError::AlreadyPopulated { existing: 5 })
        ));
        assert_eq!(store.count_for_project("gelati").unwrap(), 5);
    }

    #[test]
    fn import_refuses_a_store_with_live_comments() {
        let users = Users::new();
        let ana = users.verified("ana@example.com");
        let store = CommentStore::new(users.db.clone(), users.identity(), StoreSettings::default());
        store
            .create(NewComment {
                project_id: "p".into(),
                author_id: ana,
                text: "live".into(),
                parent_id: None,
                media: vec![],
            })
            .unwrap();

        let err = LegacyImporter::new(users.db.clone()).import(&document()).unwrap_err();
        assert!(matches!(err, MigrationError::AlreadyPopulated { existing: 1 }));
        assert_eq!(store.count_for_project("gelati").unwrap(), 0);
    }

    #[test]
    fn import_file_reports_unreadable_and_malformed_input() {
        let dir = tempfile::tempdir().unwrap();
        let importer = LegacyImporter::new(Arc::new(Database::open_in_memory().unwrap()));

        let missing = dir.path().join("missing.json");
        assert!(matches!(importer.import_file(&missing), Err(MigrationError::Read { .. })));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{not json").unwrap();
        assert!(matches!(importer.import_file(&broken), Err(MigrationError::Parse(_))));
    }

    #[test]
    fn catalog_serves_legacy_trees_without_a_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comments.json");
        std::fs::write(&path, LEGACY).unwrap();

        let catalog = LegacyCatalog::load(&path).unwrap();
        let forest = catalog.tree("gelati");
        assert_eq!(forest.len(), 3);
        assert_eq!(forest[0].comment.text, "Thread");
        assert_eq!(forest[0].subtree_len(), 3);
        assert!(catalog.tree("vardzia").is_empty());
        assert!(catalog.tree("unknown").is_empty());

        let absent = LegacyCatalog::load(&dir.path().join("nope.json")).unwrap();
        assert!(absent.document().is_empty());
    }
}
