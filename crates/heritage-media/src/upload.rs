use bytes::Bytes;
use chrono::Utc;
use heritage_types::models::MediaKind;
use uuid::Uuid;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "ogg", "mov", "avi"];

/// A raw file as received from the web layer.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub project_id: String,
    pub filename: String,
    pub payload: Bytes,
}

impl MediaUpload {
    pub fn new(project_id: impl Into<String>, filename: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            project_id: project_id.into(),
            filename: filename.into(),
            payload: payload.into(),
        }
    }
}

/// An upload that passed validation and is ready to hand to a backend.
#[derive(Debug, Clone)]
pub struct PreparedUpload {
    pub key: ObjectKey,
    pub kind: MediaKind,
    pub content_type: &'static str,
    pub payload: Bytes,
}

/// Lower-cased text after the last dot, if any.
pub fn extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Classify an extension; `None` means the file type is not accepted.
pub fn media_kind(ext: &str) -> Option<MediaKind> {
    if IMAGE_EXTENSIONS.contains(&ext) {
        Some(MediaKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

pub fn content_type(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "ogg" => "video/ogg",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

/// Make one path segment safe: ASCII alphanumerics, `.`, `-` and `_` survive,
/// everything else becomes `_`. Leading dots are stripped so a segment can
/// never be `..` or a hidden file.
pub fn sanitize_segment(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = mapped.trim_start_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Storage key for a comment attachment:
/// `projects/{project_id}/comments/{file_name}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    pub project_id: String,
    pub file_name: String,
}

impl ObjectKey {
    /// Fresh key with a unique, time-prefixed file name.
    pub fn generate(project_id: &str, original_filename: &str) -> Self {
        let unique = Uuid::new_v4().simple().to_string();
        let file_name = format!(
            "{}_{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &unique[..8],
            sanitize_segment(original_filename)
        );
        Self {
            project_id: sanitize_segment(project_id),
            file_name,
        }
    }

    pub fn path(&self) -> String {
        format!("projects/{}/comments/{}", self.project_id, self.file_name)
    }

    /// Key without the file extension, as Cloudinary expects public ids.
    pub fn public_id(&self) -> String {
        let stem = match self.file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.file_name,
        };
        format!("projects/{}/comments/{}", self.project_id, stem)
    }
}
