use std::sync::Arc;

use heritage_media::{MediaResolver, MediaUpload, UploadFailure};
use heritage_types::models::{Comment, CommentNode, RequesterContext, ToggleOutcome};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CommentError, ServiceError};
use crate::reactions::ReactionLedger;
use crate::store::{CommentStore, DeletedSubtree, NewComment};

/// What to do when an attachment cannot be stored anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaFailurePolicy {
    /// Fail the whole submission; nothing is saved.
    #[default]
    Abort,
    /// Save the comment without the failed attachments and report them.
    KeepText,
}

#[derive(Debug)]
pub struct Submission {
    pub project_id: String,
    pub author_id: Uuid,
    pub text: String,
    pub parent_id: Option<Uuid>,
    pub files: Vec<MediaUpload>,
}

#[derive(Debug)]
pub struct DroppedUpload {
    pub filename: String,
    pub reason: UploadFailure,
}

#[derive(Debug)]
pub struct Submitted {
    pub comment: Comment,
    pub dropped: Vec<DroppedUpload>,
}

/// Async front door for callers running on the tokio runtime. Database work
/// goes to the blocking pool; uploads stay on the runtime.
#[derive(Clone)]
pub struct CommentService {
    store: Arc<CommentStore>,
    ledger: Arc<ReactionLedger>,
    resolver: Arc<MediaResolver>,
    policy: MediaFailurePolicy,
}

impl CommentService {
    pub fn new(
        store: Arc<CommentStore>,
        ledger: Arc<ReactionLedger>,
        resolver: Arc<MediaResolver>,
        policy: MediaFailurePolicy,
    ) -> Self {
        Self {
            store,
            ledger,
            resolver,
            policy,
        }
    }

    pub async fn submit(&self, submission: Submission) -> Result<Submitted, ServiceError> {
        if submission.text.trim().is_empty() && submission.files.is_empty() {
            return Err(CommentError::EmptyContent.into());
        }

        let mut new = NewComment {
            project_id: submission.project_id,
            author_id: submission.author_id,
            text: submission.text,
            parent_id: submission.parent_id,
            media: Vec::new(),
        };
        // Nothing is uploaded for a comment that would be refused anyway.
        let store = self.store.clone();
        let pending = new.clone();
        tokio::task::spawn_blocking(move || store.check(&pending)).await??;

        // Validate every file before uploading any of them.
        let mut prepared = Vec::with_capacity(submission.files.len());
        let mut dropped = Vec::new();
        for file in submission.files {
            let filename = file.filename.clone();
            match self.resolver.prepare(file) {
                Ok(p) => prepared.push((filename, p)),
                Err(reason) => self.reject(filename, reason, &mut dropped)?,
            }
        }

        let mut media = Vec::with_capacity(prepared.len());
        for (filename, upload) in &prepared {
            match self.resolver.store_prepared(upload).await {
                Ok(stored) => media.push(stored),
                Err(reason) => self.reject(filename.clone(), reason, &mut dropped)?,
            }
        }

        new.media = media;
        let store = self.store.clone();
        let comment = tokio::task::spawn_blocking(move || store.create(new)).await??;

        if !dropped.is_empty() {
            info!(
                "Comment {} saved without {} attachment(s)",
                comment.id,
                dropped.len()
            );
        }
        Ok(Submitted { comment, dropped })
    }

    fn reject(
        &self,
        filename: String,
        reason: UploadFailure,
        dropped: &mut Vec<DroppedUpload>,
    ) -> Result<(), ServiceError> {
        match self.policy {
            MediaFailurePolicy::Abort => Err(reason.into()),
            MediaFailurePolicy::KeepText => {
                warn!("Dropping attachment '{}': {}", filename, reason);
                dropped.push(DroppedUpload { filename, reason });
                Ok(())
            }
        }
    }

    pub async fn tree(
        &self,
        project_id: &str,
        viewer: Option<Uuid>,
    ) -> Result<Vec<CommentNode>, ServiceError> {
        let store = self.store.clone();
        let project_id = project_id.to_string();
        Ok(tokio::task::spawn_blocking(move || store.get_tree(&project_id, viewer)).await??)
    }

    pub async fn delete(
        &self,
        comment_id: Uuid,
        requester: RequesterContext,
    ) -> Result<DeletedSubtree, ServiceError> {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || store.delete_subtree(comment_id, &requester)).await??)
    }

    pub async fn toggle_like(
        &self,
        user_id: Uuid,
        comment_id: Uuid,
    ) -> Result<ToggleOutcome, ServiceError> {
        let ledger = self.ledger.clone();
        Ok(tokio::task::spawn_blocking(move || ledger.toggle(user_id, comment_id)).await??)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::testing::Users;
    use crate::store::StoreSettings;
    use async_trait::async_trait;
    use heritage_media::{BackendError, MediaBackend};
    use heritage_media::upload::PreparedUpload;
    use heritage_types::models::{MediaRef, StorageBackend};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Accepts everything except files whose name contains "broken".
    /// Counts every `put` it sees.
    struct Picky {
        puts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MediaBackend for Picky {
        fn kind(&self) -> StorageBackend {
            StorageBackend::Local
        }

        async fn put(&self, upload: &PreparedUpload) -> Result<MediaRef, BackendError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            if upload.key.file_name.contains("broken") {
                return Err(BackendError::Rejected {
                    status: 507,
                    message: "disk full".into(),
                });
            }
            Ok(MediaRef::new(format!("/{}", upload.key.path()), StorageBackend::Local))
        }
    }

    fn service(users: &Users, policy: MediaFailurePolicy) -> CommentService {
        counted_service(users, policy, Arc::default())
    }

    fn counted_service(
        users: &Users,
        policy: MediaFailurePolicy,
        puts: Arc<AtomicUsize>,
    ) -> CommentService {
        let store = Arc::new(CommentStore::new(
            users.db.clone(),
            users.identity(),
            StoreSettings::default(),
        ));
        let ledger = Arc::new(ReactionLedger::new(users.db.clone(), users.identity()));
        let resolver = Arc::new(MediaResolver::new(
            vec![Box::new(Picky { puts }) as Box<dyn MediaBackend>],
            Duration::from_secs(1),
            1024,
        ));
        CommentService::new(store, ledger, resolver, policy)
    }

    fn submission(author: Uuid, text: &str, files: &[&str]) -> Submission {
        Submission {
            project_id: "gelati".into(),
            author_id: author,
            text: text.into(),
            parent_id: None,
            files: files
                .iter()
                .map(|name| MediaUpload::new("gelati", *name, &b"bytes"[..]))
                .collect(),
        }
    }

    #[tokio::test]
    async fn uploads_then_saves_with_media_in_order() {
        let users = Users::new();
        let ana = users.verified("ana@example.com");
        let svc = service(&users, MediaFailurePolicy::Abort);

        let out = svc.submit(submission(ana, "look", &["a.png", "b.mp4"])).await.unwrap();

        assert!(out.dropped.is_empty());
        assert_eq!(out.comment.media.len(), 2);
        assert!(out.comment.media[0].location.ends_with("_a.png"));
        assert!(out.comment.media[1].location.ends_with("_b.mp4"));
        let forest = svc.tree("gelati", None).await.unwrap();
        assert_eq!(forest[0].comment, out.comment);
    }

    #[tokio::test]
    async fn abort_policy_saves_nothing_on_upload_failure() {
        let users = Users::new();
        let ana = users.verified("ana@example.com");
        let svc = service(&users, MediaFailurePolicy::Abort);

        let err = svc.submit(submission(ana, "look", &["a.png", "broken.png"])).await.unwrap_err();

        assert!(matches!(err, ServiceError::Upload(UploadFailure::Exhausted { .. })));
        assert!(svc.tree("gelati", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keep_text_policy_reports_dropped_files() {
        let users = Users::new();
        let ana = users.verified("ana@example.com");
        let svc = service(&users, MediaFailurePolicy::KeepText);

        let out = svc
            .submit(submission(ana, "look", &["a.png", "broken.png", "notes.txt"]))
            .await
            .unwrap();

        assert_eq!(out.comment.media.len(), 1);
        let names: Vec<&str> = out.dropped.iter().map(|d| d.filename.as_str()).collect();
        assert_eq!(names, ["notes.txt", "broken.png"]);
        assert!(matches!(out.dropped[0].reason, UploadFailure::DisallowedExtension { .. }));
    }

    #[tokio::test]
    async fn empty_submission_is_rejected_up_front() {
        let users = Users::new();
        let ana = users.verified("ana@example.com");
        let svc = service(&users, MediaFailurePolicy::KeepText);

        let err = svc.submit(submission(ana, "  ", &[])).await.unwrap_err();
        assert!(matches!(err, ServiceError::Comment(CommentError::EmptyContent)));

        // Every attachment dropped leaves nothing to save.
        let err = svc.submit(submission(ana, "", &["broken.png"])).await.unwrap_err();
        assert!(matches!(err, ServiceError::Comment(CommentError::EmptyContent)));
    }

    #[tokio::test]
    async fn refused_comments_upload_nothing() {
        let users = Users::new();
        let ana = users.verified("ana@example.com");
        let ghost = users.add("ghost@example.com", false, false);
        let puts = Arc::new(AtomicUsize::new(0));
        let svc = counted_service(&users, MediaFailurePolicy::Abort, puts.clone());

        let err = svc.submit(submission(ghost, "hi", &["a.png"])).await.unwrap_err();
        assert!(matches!(err, ServiceError::Comment(CommentError::AuthorNotVerified(id)) if id == ghost));

        let mut reply = submission(ana, "hi", &["a.png", "b.mp4"]);
        reply.parent_id = Some(Uuid::new_v4());
        let err = svc.submit(reply).await.unwrap_err();
        assert!(matches!(err, ServiceError::Comment(CommentError::ParentNotFound(_))));

        assert_eq!(puts.load(Ordering::SeqCst), 0);
        assert!(svc.tree("gelati", None).await.unwrap().is_empty());

        // The same upload goes through once the author is allowed to post.
        svc.submit(submission(ana, "hi", &["a.png"])).await.unwrap();
        assert_eq!(puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn like_and_delete_through_the_service() {
        let users = Users::new();
        let ana = users.verified("ana@example.com");
        let svc = service(&users, MediaFailurePolicy::Abort);
        let out = svc.submit(submission(ana, "hello", &[])).await.unwrap();

        let liked = svc.toggle_like(ana, out.comment.id).await.unwrap();
        assert!(liked.liked);

        let deleted = svc
            .delete(out.comment.id, RequesterContext::user(ana))
            .await
            .unwrap();
        assert_eq!(deleted.likes_removed, 1);
        assert!(svc.tree("gelati", None).await.unwrap().is_empty());
    }
}
