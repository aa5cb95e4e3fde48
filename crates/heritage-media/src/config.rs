use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Same ceiling the site has always enforced on request bodies.
const DEFAULT_MAX_UPLOAD_BYTES: usize = 500 * 1024 * 1024;
const DEFAULT_R2_BUCKET: &str = "portfolio-files";

#[derive(Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Clone)]
pub struct R2Config {
    pub account_id: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    /// Base URL objects are publicly served from.
    pub public_base: String,
}

#[derive(Clone)]
pub struct MediaConfig {
    pub cloudinary: Option<CloudinaryConfig>,
    pub r2: Option<R2Config>,
    /// Root for the local fallback; `None` disables it.
    pub upload_root: Option<PathBuf>,
    pub backend_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl MediaConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key/value source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let cloudinary = match (
            get("CLOUDINARY_CLOUD_NAME"),
            get("CLOUDINARY_API_KEY"),
            get("CLOUDINARY_API_SECRET"),
        ) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => Some(CloudinaryConfig {
                cloud_name,
                api_key,
                api_secret,
            }),
            _ => None,
        };

        let r2 = match (
            get("CLOUDFLARE_R2_ACCOUNT_ID"),
            get("CLOUDFLARE_R2_ACCESS_KEY"),
            get("CLOUDFLARE_R2_SECRET_KEY"),
        ) {
            (Some(account_id), Some(access_key), Some(secret_key)) => {
                let public_base = get("CLOUDFLARE_R2_PUBLIC_URL")
                    .unwrap_or_else(|| format!("https://pub-{}.r2.dev", account_id));
                Some(R2Config {
                    bucket: get("CLOUDFLARE_R2_BUCKET_NAME").unwrap_or_else(|| DEFAULT_R2_BUCKET.into()),
                    public_base: public_base.trim_end_matches('/').to_string(),
                    account_id,
                    access_key,
                    secret_key,
                })
            }
            _ => None,
        };

        // Unset means "current directory"; explicitly empty disables the fallback.
        let upload_root = match lookup("HERITAGE_UPLOAD_DIR") {
            None => Some(PathBuf::from(".")),
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(PathBuf::from(v.trim())),
        };

        let backend_timeout = match get("HERITAGE_UPLOAD_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(
                v.parse()
                    .with_context(|| format!("HERITAGE_UPLOAD_TIMEOUT_SECS is not a number: {}", v))?,
            ),
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let max_upload_bytes = match get("HERITAGE_MAX_UPLOAD_BYTES") {
            Some(v) => v
                .parse()
                .with_context(|| format!("HERITAGE_MAX_UPLOAD_BYTES is not a number: {}", v))?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Self {
            cloudinary,
            r2,
            upload_root,
            backend_timeout,
            max_upload_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = MediaConfig::from_lookup(lookup(&[])).unwrap();
        assert!(cfg.cloudinary.is_none());
        assert!(cfg.r2.is_none());
        assert_eq!(cfg.upload_root, Some(PathBuf::from(".")));
        assert_eq!(cfg.backend_timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_upload_bytes, 500 * 1024 * 1024);
    }

    #[test]
    fn partial_credentials_leave_backend_unconfigured() {
        let cfg = MediaConfig::from_lookup(lookup(&[
            ("CLOUDINARY_CLOUD_NAME", "demo"),
            ("CLOUDINARY_API_KEY", "123"),
            ("CLOUDINARY_API_SECRET", "  "),
        ]))
        .unwrap();
        assert!(cfg.cloudinary.is_none());
    }

    #[test]
    fn r2_public_url_defaults_to_account_subdomain() {
        let cfg = MediaConfig::from_lookup(lookup(&[
            ("CLOUDFLARE_R2_ACCOUNT_ID", "acc"),
            ("CLOUDFLARE_R2_ACCESS_KEY", "ak"),
            ("CLOUDFLARE_R2_SECRET_KEY", "sk"),
            ("HERITAGE_UPLOAD_DIR", ""),
        ]))
        .unwrap();
        let r2 = cfg.r2.unwrap();
        assert_eq!(r2.public_base, "https://pub-acc.r2.dev");
        assert_eq!(r2.bucket, "portfolio-files");
        assert!(cfg.upload_root.is_none());
    }

    #[test]
    fn bad_numbers_are_errors() {
        assert!(MediaConfig::from_lookup(lookup(&[("HERITAGE_UPLOAD_TIMEOUT_SECS", "soon")])).is_err());
    }
}
