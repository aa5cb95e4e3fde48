use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::Utc;
use heritage_types::models::{MediaRef, StorageBackend};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::backend::{BackendError, MediaBackend};
use crate::config::CloudinaryConfig;
use crate::upload::PreparedUpload;

const API_BASE: &str = "https://api.cloudinary.com/v1_1";

/// Primary backend: Cloudinary signed uploads.
pub struct CloudinaryBackend {
    config: Option<CloudinaryConfig>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl CloudinaryBackend {
    pub fn new(config: Option<CloudinaryConfig>, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

/// Cloudinary request signature: parameters sorted by name, joined as
/// `k=v&k=v`, secret appended, SHA-1 in hex.
pub fn sign_params(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha1::new();
    hasher.update(joined.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl MediaBackend for CloudinaryBackend {
    fn kind(&self) -> StorageBackend {
        StorageBackend::Cloudinary
    }

    fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    async fn put(&self, upload: &PreparedUpload) -> Result<MediaRef, BackendError> {
        let cfg = self.config.as_ref().ok_or(BackendError::NotConfigured)?;

        let resource_type = if upload.kind.is_video() { "video" } else { "image" };
        let timestamp = Utc::now().timestamp().to_string();
        let public_id = upload.key.public_id();
        let signature = sign_params(
            &[("public_id", public_id.as_str()), ("timestamp", timestamp.as_str())],
            &cfg.api_secret,
        );
        let file = format!(
            "data:{};base64,{}",
            upload.content_type,
            B64.encode(&upload.payload)
        );

        let url = format!("{}/{}/{}/upload", API_BASE, cfg.cloud_name, resource_type);
        debug!("Cloudinary upload of {} ({} bytes)", public_id, upload.payload.len());

        let resp = self
            .client
            .post(&url)
            .form(&[
                ("file", file.as_str()),
                ("api_key", cfg.api_key.as_str()),
                ("timestamp", timestamp.as_str()),
                ("public_id", public_id.as_str()),
                ("signature", signature.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: UploadResponse = serde_json::from_slice(&body)
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        Ok(MediaRef::new(parsed.secure_url, StorageBackend::Cloudinary))
    }
}
