use std::fmt;
use std::time::Duration;

use heritage_types::models::{MediaRef, StorageBackend};
use tracing::{debug, info, warn};

use crate::backend::{BackendError, MediaBackend};
use crate::cloudinary::CloudinaryBackend;
use crate::config::MediaConfig;
use crate::local::LocalBackend;
use crate::r2::R2Backend;
use crate::upload::{self, MediaUpload, ObjectKey, PreparedUpload};

/// A backend attempt that did not produce a reference.
#[derive(Debug)]
pub struct FailedAttempt {
    pub backend: StorageBackend,
    pub error: BackendError,
}

impl fmt::Display for FailedAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.backend, self.error)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadFailure {
    #[error("upload is empty")]
    EmptyPayload,

    #[error("file type of '{filename}' is not allowed")]
    DisallowedExtension { filename: String },

    #[error("upload of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("no storage backend is configured")]
    NoBackendConfigured,

    #[error("every storage backend failed ({})", join_attempts(.attempts))]
    Exhausted { attempts: Vec<FailedAttempt> },
}

fn join_attempts(attempts: &[FailedAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Persists comment attachments through an ordered chain of backends.
///
/// Backends are tried one after another, never in parallel, so a file is
/// never uploaded twice to paid storage. The first success wins.
pub struct MediaResolver {
    backends: Vec<Box<dyn MediaBackend>>,
    backend_timeout: Duration,
    max_upload_bytes: usize,
}

impl MediaResolver {
    pub fn new(
        backends: Vec<Box<dyn MediaBackend>>,
        backend_timeout: Duration,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            backends,
            backend_timeout,
            max_upload_bytes,
        }
    }

    /// Standard chain: Cloudinary, then R2, then the local filesystem.
    pub fn from_config(config: &MediaConfig) -> Self {
        let client = reqwest::Client::new();
        let backends: Vec<Box<dyn MediaBackend>> = vec![
            Box::new(CloudinaryBackend::new(config.cloudinary.clone(), client.clone())),
            Box::new(R2Backend::new(config.r2.clone(), client)),
            Box::new(LocalBackend::new(config.upload_root.clone())),
        ];

        let configured: Vec<&str> = backends
            .iter()
            .filter(|b| b.is_configured())
            .map(|b| b.kind().as_str())
            .collect();
        info!("Media backends in order: [{}]", configured.join(", "));

        Self::new(backends, config.backend_timeout, config.max_upload_bytes)
    }

    /// Validate an upload without touching any backend.
    pub fn prepare(&self, upload: MediaUpload) -> Result<PreparedUpload, UploadFailure> {
        if upload.payload.is_empty() {
            return Err(UploadFailure::EmptyPayload);
        }
        if upload.payload.len() > self.max_upload_bytes {
            return Err(UploadFailure::TooLarge {
                size: upload.payload.len(),
                max: self.max_upload_bytes,
            });
        }

        let ext = upload::extension(&upload.filename);
        let kind = ext.as_deref().and_then(upload::media_kind).ok_or_else(|| {
            UploadFailure::DisallowedExtension {
                filename: upload.filename.clone(),
            }
        })?;
        let content_type = upload::content_type(ext.as_deref().unwrap_or_default());

        Ok(PreparedUpload {
            key: ObjectKey::generate(&upload.project_id, &upload.filename),
            kind,
            content_type,
            payload: upload.payload,
        })
    }

    pub async fn store(&self, upload: MediaUpload) -> Result<MediaRef, UploadFailure> {
        let prepared = self.prepare(upload)?;
        self.store_prepared(&prepared).await
    }

    pub async fn store_prepared(&self, upload: &PreparedUpload) -> Result<MediaRef, UploadFailure> {
        let mut attempts = Vec::new();

        for backend in &self.backends {
            if !backend.is_configured() {
                debug!("Skipping unconfigured {} backend", backend.kind());
                continue;
            }

            let outcome = tokio::time::timeout(self.backend_timeout, backend.put(upload))
                .await
                .unwrap_or_else(|_| Err(BackendError::Timeout(self.backend_timeout)));

            match outcome {
                Ok(media) => {
                    info!(
                        "Stored {} on {} after {} failed attempt(s)",
                        upload.key.path(),
                        backend.kind(),
                        attempts.len()
                    );
                    return Ok(media);
                }
                Err(error) => {
                    warn!("{} upload of {} failed: {}", backend.kind(), upload.key.path(), error);
                    attempts.push(FailedAttempt {
                        backend: backend.kind(),
                        error,
                    });
                }
            }
        }

        if attempts.is_empty() {
            Err(UploadFailure::NoBackendConfigured)
        } else {
            Err(UploadFailure::Exhausted { attempts })
        }
    }
}
