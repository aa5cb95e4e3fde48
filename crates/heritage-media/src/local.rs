use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use heritage_types::models::{MediaRef, StorageBackend};
use tokio::fs;
use tracing::{info, warn};

use crate::backend::{BackendError, MediaBackend};
use crate::upload::PreparedUpload;

/// Abandoned writes are noticed between chunks of this size.
const WRITE_CHUNK: usize = 1024 * 1024;

/// Last-resort backend: files under `{root}/projects/{project}/comments/`.
///
/// The returned reference is the site-relative path the web layer serves the
/// file from, not the filesystem path.
pub struct LocalBackend {
    root: Option<PathBuf>,
}

impl LocalBackend {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

/// Flags the blocking writer when the `put` future goes away, e.g. because
/// the resolver's timeout fired.
struct AbandonOnDrop(Arc<AtomicBool>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    target.with_file_name(format!(".{}.part", file_name))
}

fn abandoned() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "write abandoned")
}

/// Temp file + rename. The temp file never survives a failed or abandoned
/// write.
fn write_atomically(target: &Path, data: &[u8], abandon: &AtomicBool) -> io::Result<()> {
    let tmp = partial_path(target);
    let result = write_then_rename(&tmp, target, data, abandon);

    if result.is_err() {
        if let Err(e) = std::fs::remove_file(&tmp) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove partial upload {}: {}", tmp.display(), e);
            }
        }
    }
    result
}

fn write_then_rename(tmp: &Path, target: &Path, data: &[u8], abandon: &AtomicBool) -> io::Result<()> {
    let mut file = std::fs::File::create(tmp)?;
    for chunk in data.chunks(WRITE_CHUNK) {
        if abandon.load(Ordering::Acquire) {
            return Err(abandoned());
        }
        file.write_all(chunk)?;
    }
    file.sync_all()?;
    drop(file);

    if abandon.load(Ordering::Acquire) {
        return Err(abandoned());
    }
    std::fs::rename(tmp, target)
}

#[async_trait]
impl MediaBackend for LocalBackend {
    fn kind(&self) -> StorageBackend {
        StorageBackend::Local
    }

    fn is_configured(&self) -> bool {
        self.root.is_some()
    }

    async fn put(&self, upload: &PreparedUpload) -> Result<MediaRef, BackendError> {
        let root = self.root.as_ref().ok_or(BackendError::NotConfigured)?;

        let dir = root
            .join("projects")
            .join(&upload.key.project_id)
            .join("comments");
        fs::create_dir_all(&dir).await?;

        let target = dir.join(&upload.key.file_name);
        let abandon = Arc::new(AtomicBool::new(false));
        let _guard = AbandonOnDrop(abandon.clone());

        let payload = upload.payload.clone();
        let path = target.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &payload, &abandon))
            .await
            .map_err(io::Error::other)??;

        info!("Stored upload locally at {}", target.display());
        Ok(MediaRef::new(format!("/{}", upload.key.path()), StorageBackend::Local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{MediaResolver, UploadFailure};
    use crate::upload::{MediaUpload, ObjectKey};
    use bytes::Bytes;
    use heritage_types::models::MediaKind;
    use std::time::Duration;

    fn prepared(project: &str, name: &str, data: &'static [u8]) -> PreparedUpload {
        PreparedUpload {
            key: ObjectKey {
                project_id: project.into(),
                file_name: name.into(),
            },
            kind: MediaKind::Image,
            content_type: "image/png",
            payload: Bytes::from_static(data),
        }
    }

    #[tokio::test]
    async fn writes_file_and_returns_site_path() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(Some(dir.path().to_path_buf()));

        let media = backend.put(&prepared("gelati", "a.png", b"png-bytes")).await.unwrap();

        assert_eq!(media.location, "/projects/gelati/comments/a.png");
        assert_eq!(media.backend, StorageBackend::Local);
        let on_disk = std::fs::read(dir.path().join("projects/gelati/comments/a.png")).unwrap();
        assert_eq!(on_disk, b"png-bytes");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("projects/gelati/comments"))
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn failed_write_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        // A directory squatting on the target name makes the rename fail.
        std::fs::create_dir_all(dir.path().join("projects/gelati/comments/a.png/inner")).unwrap();
        let backend = LocalBackend::new(Some(dir.path().to_path_buf()));

        let result = backend.put(&prepared("gelati", "a.png", b"data")).await;

        assert!(matches!(result, Err(BackendError::Io(_))));
        assert!(!dir.path().join("projects/gelati/comments/.a.png.part").exists());
    }

    #[tokio::test]
    async fn timed_out_write_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = MediaResolver::new(
            vec![Box::new(LocalBackend::new(Some(dir.path().to_path_buf()))) as Box<dyn MediaBackend>],
            Duration::from_millis(1),
            usize::MAX,
        );

        let err = resolver
            .store(MediaUpload::new("gelati", "big.mp4", vec![7u8; 128 * 1024 * 1024]))
            .await
            .unwrap_err();

        match err {
            UploadFailure::Exhausted { attempts } => {
                assert!(matches!(attempts[0].error, BackendError::Timeout(_)));
            }
            other => panic!("unexpected failure: {other}"),
        }

        // The writer notices within one chunk and cleans up after itself.
        let comments = dir.path().join("projects/gelati/comments");
        let mut remaining = usize::MAX;
        for _ in 0..400 {
            remaining = std::fs::read_dir(&comments).map(|d| d.count()).unwrap_or(0);
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(remaining, 0);
    }

    #[test]
    fn abandoned_write_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("clip.mp4");

        let err = write_atomically(&target, b"data", &AtomicBool::new(true)).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn unconfigured_backend_refuses() {
        let backend = LocalBackend::new(None);
        assert!(!backend.is_configured());
        let result = backend.put(&prepared("gelati", "a.png", b"data")).await;
        assert!(matches!(result, Err(BackendError::NotConfigured)));
    }
}
