use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heritage_types::models::{MediaRef, StorageBackend};
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::backend::{BackendError, MediaBackend};
use crate::config::R2Config;
use crate::upload::PreparedUpload;

type HmacSha256 = Hmac<Sha256>;

const REGION: &str = "auto";
const SERVICE: &str = "s3";
const SIGNED_HEADERS: &str = "content-type;host;x-amz-content-sha256;x-amz-date";

/// Secondary backend: Cloudflare R2 through its S3-compatible API.
pub struct R2Backend {
    config: Option<R2Config>,
    client: reqwest::Client,
}

impl R2Backend {
    pub fn new(config: Option<R2Config>, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

/// Everything that goes into an AWS SigV4 signature for a single-part PUT.
pub struct SigningInput<'a> {
    pub method: &'a str,
    pub host: &'a str,
    /// Already URI-encoded path, starting with `/`.
    pub canonical_uri: &'a str,
    pub content_type: &'a str,
    pub payload_sha256: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub time: DateTime<Utc>,
}

pub fn amz_date(time: DateTime<Utc>) -> String {
    time.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Value of the `Authorization` header.
pub fn authorization(input: &SigningInput<'_>) -> Result<String, BackendError> {
    let amz_date = amz_date(input.time);
    let date = input.time.format("%Y%m%d").to_string();

    let canonical_headers = format!(
        "content-type:{}\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
        input.content_type, input.host, input.payload_sha256, amz_date
    );
    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        input.method, input.canonical_uri, canonical_headers, SIGNED_HEADERS, input.payload_sha256
    );

    let scope = format!("{}/{}/{}/aws4_request", date, REGION, SERVICE);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac(format!("AWS4{}", input.secret_key).as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, REGION.as_bytes())?;
    let k_service = hmac(&k_region, SERVICE.as_bytes())?;
    let k_signing = hmac(&k_service, b"aws4_request")?;
    let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes())?);

    Ok(format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        input.access_key, scope, SIGNED_HEADERS, signature
    ))
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, BackendError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| BackendError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// S3 flavour of percent-encoding: unreserved characters stay, `/` stays when
/// encoding a path, everything else becomes `%XX`.
pub fn uri_encode(raw: &str, keep_slash: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            b'/' if keep_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[async_trait]
impl MediaBackend for R2Backend {
    fn kind(&self) -> StorageBackend {
        StorageBackend::R2
    }

    fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    async fn put(&self, upload: &PreparedUpload) -> Result<MediaRef, BackendError> {
        let cfg = self.config.as_ref().ok_or(BackendError::NotConfigured)?;

        let key = upload.key.path();
        let host = format!("{}.r2.cloudflarestorage.com", cfg.account_id);
        let canonical_uri = format!("/{}/{}", uri_encode(&cfg.bucket, false), uri_encode(&key, true));
        let payload_sha256 = hex::encode(Sha256::digest(&upload.payload));
        let now = Utc::now();

        let auth = authorization(&SigningInput {
            method: "PUT",
            host: &host,
            canonical_uri: &canonical_uri,
            content_type: upload.content_type,
            payload_sha256: &payload_sha256,
            access_key: &cfg.access_key,
            secret_key: &cfg.secret_key,
            time: now,
        })?;

        debug!("R2 upload of {} ({} bytes)", key, upload.payload.len());

        let resp = self
            .client
            .put(format!("https://{}{}", host, canonical_uri))
            .header(CONTENT_TYPE, upload.content_type)
            .header("x-amz-content-sha256", &payload_sha256)
            .header("x-amz-date", amz_date(now))
            .header(AUTHORIZATION, auth)
            .body(upload.payload.clone())
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(MediaRef::new(
            format!("{}/{}", cfg.public_base, key),
            StorageBackend::R2,
        ))
    }
}
