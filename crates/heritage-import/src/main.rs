use std::path::PathBuf;
use std::sync::Arc;

use heritage_comments::{LegacyImporter, MigrationError};
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "heritage=debug".into()),
        )
        .init();

    let db_path = std::env::var("HERITAGE_DB_PATH").unwrap_or_else(|_| "heritage.db".into());
    let json_path =
        std::env::var("HERITAGE_COMMENTS_JSON").unwrap_or_else(|_| "comments.json".into());

    let db = Arc::new(heritage_db::Database::open(&PathBuf::from(&db_path))?);
    let importer = LegacyImporter::new(db);

    info!("Importing legacy comments from {} into {}", json_path, db_path);
    match importer.import_file(&PathBuf::from(&json_path)) {
        Ok(report) => {
            info!(
                "Done: {} projects, {} comments ({} replies), {} empty entries skipped",
                report.projects, report.comments, report.replies, report.skipped_empty
            );
            Ok(())
        }
        // Running twice is expected; the first run already did the work.
        Err(MigrationError::AlreadyPopulated { existing }) => {
            warn!("Database already holds {} comments; nothing imported", existing);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
