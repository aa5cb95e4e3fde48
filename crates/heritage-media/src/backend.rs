use std::time::Duration;

use async_trait::async_trait;
use heritage_types::models::{MediaRef, StorageBackend};

use crate::upload::PreparedUpload;

/// Why a single backend refused an upload. These never reach the caller on
/// their own: the resolver records them and moves on to the next backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend is not configured")]
    NotConfigured,

    #[error("upload rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot sign request: {0}")]
    Signing(String),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("no answer within {0:?}")]
    Timeout(Duration),
}

/// One storage provider in the fallback chain.
///
/// A failed `put` must not leave a partial object behind on that backend.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    fn kind(&self) -> StorageBackend;

    /// Unconfigured backends are skipped without counting as an attempt.
    fn is_configured(&self) -> bool {
        true
    }

    async fn put(&self, upload: &PreparedUpload) -> Result<MediaRef, BackendError>;
}
