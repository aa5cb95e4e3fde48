//! Media Upload Resolver: stores comment attachments on the first storage
//! backend that accepts them.

pub mod backend;
pub mod cloudinary;
pub mod config;
pub mod local;
pub mod r2;
pub mod resolver;
pub mod upload;

pub use backend::{BackendError, MediaBackend};
pub use config::MediaConfig;
pub use resolver::{FailedAttempt, MediaResolver, UploadFailure};
pub use upload::MediaUpload;
