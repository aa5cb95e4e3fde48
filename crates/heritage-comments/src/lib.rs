//! Threaded project comments: the tree store, likes, the legacy import and
//! the async submission flow that ties them to media uploads.

pub mod error;
pub mod identity;
pub mod migrate;
pub mod reactions;
pub mod service;
pub mod store;
pub mod tree;

pub use error::{CommentError, MigrationError, ReactionError, ServiceError};
pub use identity::{DbIdentity, Identity};
pub use migrate::{ImportReport, LegacyCatalog, LegacyImporter};
pub use reactions::ReactionLedger;
pub use service::{CommentService, MediaFailurePolicy, Submission, Submitted};
pub use store::{CommentStore, DeletedSubtree, NewComment, StoreSettings};
