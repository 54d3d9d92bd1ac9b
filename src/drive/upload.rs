use super::{StorageBackend, StorageError, StoredFile};
use crate::retry::{Attempt, RetryPolicy};
use bytes::Bytes;
use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const PDF_MIME: &str = "application/pdf";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResult {
    Published { file_id: String, link: String },
    Failed { error: String },
}

/// What an upload has achieved so far, kept across retries.
#[derive(Default)]
struct Progress {
    file: Option<StoredFile>,
    shared: bool,
}

/// Publishes documents to a [`StorageBackend`] with retries and a capped
/// number of forced re-authentications per upload.
#[derive(Clone)]
pub struct Uploader {
    backend: Arc<dyn StorageBackend>,
    policy: RetryPolicy,
    folder_id: Option<String>,
    reauth_budget: u32,
}

impl Uploader {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        policy: RetryPolicy,
        folder_id: Option<String>,
        reauth_budget: u32,
    ) -> Self {
        Self {
            backend,
            policy,
            folder_id,
            reauth_budget,
        }
    }

    pub async fn publish(&self, name: &str, document: Bytes) -> UploadResult {
        let reauths = AtomicU32::new(0);
        let progress = Mutex::new(Progress::default());
        let outcome = self
            .policy
            .run("upload", |attempt| {
                let document = document.clone();
                let reauths = &reauths;
                let progress = &progress;
                async move {
                    let mut progress = progress.lock().await;
                    match self.attempt(name, document, &mut progress).await {
                        Ok(published) => Ok(published),
                        Err(err) => {
                            warn!(target = "labelhub.drive", name, attempt, error = %err, "upload_attempt_failed");
                            Err(self.classify(err, reauths).await)
                        }
                    }
                }
            })
            .await;

        match outcome {
            Ok((file, link)) => {
                info!(target = "labelhub.drive", name, file_id = %file.id, "upload_published");
                UploadResult::Published {
                    file_id: file.id,
                    link,
                }
            }
            Err(failure) => {
                warn!(target = "labelhub.drive", name, attempts = failure.attempts, error = %failure.error, "upload_failed");
                if let Some(file) = progress.into_inner().file {
                    self.discard(&file.id).await;
                }
                UploadResult::Failed {
                    error: failure.error.to_string(),
                }
            }
        }
    }

    /// One pass over the upload steps. Steps already done by an earlier
    /// attempt are not repeated, so a retry never creates a second file.
    async fn attempt(
        &self,
        name: &str,
        document: Bytes,
        progress: &mut Progress,
    ) -> Result<(StoredFile, String), StorageError> {
        match self.backend.refresh_credentials(false).await {
            Ok(()) => {}
            Err(err @ StorageError::Credentials(_)) => return Err(err),
            // a stale token surfaces as a 401 below and is handled there
            Err(err) => warn!(target = "labelhub.drive", error = %err, "credential_refresh_skipped"),
        }

        let file = match &progress.file {
            Some(file) => file.clone(),
            None => {
                let file = self
                    .backend
                    .create_file(name, self.folder_id.as_deref(), PDF_MIME, document)
                    .await?;
                progress.file = Some(file.clone());
                file
            }
        };
        if !progress.shared {
            self.backend.share_publicly(&file.id).await?;
            progress.shared = true;
        }
        let link = self.backend.shareable_link(&file).await?;
        Ok((file, link))
    }

    async fn discard(&self, file_id: &str) {
        match self.backend.delete_file(file_id).await {
            Ok(()) => info!(target = "labelhub.drive", file_id, "partial_upload_deleted"),
            Err(err) => {
                error!(target = "labelhub.drive", file_id, error = %err, "partial_upload_not_deleted")
            }
        }
    }

    async fn classify(&self, err: StorageError, reauths: &AtomicU32) -> Attempt<StorageError> {
        match err {
            StorageError::Unauthorized(_) => {
                let used = reauths.fetch_add(1, Ordering::SeqCst);
                if used >= self.reauth_budget {
                    warn!(target = "labelhub.drive", budget = self.reauth_budget, "reauth_budget_exhausted");
                    return Attempt::Permanent(err);
                }
                match self.backend.refresh_credentials(true).await {
                    Ok(()) => {
                        info!(target = "labelhub.drive", "reauthenticated_after_401");
                        Attempt::Transient(err)
                    }
                    Err(refresh_err) => Attempt::Permanent(refresh_err),
                }
            }
            StorageError::Credentials(_) => Attempt::Permanent(err),
            StorageError::Request(_) => Attempt::Transient(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeStorage;
    use tokio::time::Duration;

    const FAST: RetryPolicy = RetryPolicy::new(3, Duration::ZERO);

    fn uploader(storage: &Arc<FakeStorage>, budget: u32) -> Uploader {
        Uploader::new(storage.clone(), FAST, Some("folder-1".into()), budget)
    }

    #[tokio::test]
    async fn publishes_and_shares_after_create() {
        let storage = Arc::new(FakeStorage::new());
        let result = uploader(&storage, 1)
            .publish("out.pdf", Bytes::from_static(b"%PDF"))
            .await;
        assert_eq!(
            result,
            UploadResult::Published {
                file_id: "file-1".into(),
                link: "https://drive.example/file-1/view".into(),
            }
        );
        assert_eq!(
            storage.events(),
            vec!["refresh", "create:out.pdf@folder-1", "share:file-1", "link:file-1"]
        );
    }

    #[tokio::test]
    async fn unauthorized_triggers_one_reauth_then_succeeds() {
        let storage = Arc::new(FakeStorage::new());
        storage.fail_create(vec![StorageError::Unauthorized("HTTP 401".into())]);
        let result = uploader(&storage, 1)
            .publish("out.pdf", Bytes::from_static(b"%PDF"))
            .await;
        assert!(matches!(result, UploadResult::Published { .. }));
        let events = storage.events();
        assert_eq!(events.iter().filter(|e| *e == "refresh:force").count(), 1);
        assert_eq!(events.iter().filter(|e| e.starts_with("share:")).count(), 1);
    }

    #[tokio::test]
    async fn repeated_unauthorized_stops_when_budget_spent() {
        let storage = Arc::new(FakeStorage::new());
        storage.fail_create(vec![
            StorageError::Unauthorized("HTTP 401 a".into()),
            StorageError::Unauthorized("HTTP 401 b".into()),
            StorageError::Unauthorized("HTTP 401 c".into()),
        ]);
        let result = uploader(&storage, 1)
            .publish("out.pdf", Bytes::from_static(b"%PDF"))
            .await;
        assert_eq!(
            result,
            UploadResult::Failed {
                error: "unauthorized: HTTP 401 b".into()
            }
        );
        assert_eq!(storage.count("create:"), 2);
    }

    #[tokio::test]
    async fn failed_forced_refresh_is_permanent() {
        let storage = Arc::new(FakeStorage::new());
        storage.fail_create(vec![StorageError::Unauthorized("HTTP 401".into())]);
        storage.fail_forced_refresh();
        let result = uploader(&storage, 3)
            .publish("out.pdf", Bytes::from_static(b"%PDF"))
            .await;
        assert!(matches!(result, UploadResult::Failed { ref error } if error.starts_with("credentials unavailable")));
        assert_eq!(storage.count("create:"), 1);
    }

    #[tokio::test]
    async fn link_failure_retries_on_the_same_file() {
        let storage = Arc::new(FakeStorage::new());
        storage.fail_link(vec![StorageError::Request("HTTP 500".into())]);
        let result = uploader(&storage, 1)
            .publish("out.pdf", Bytes::from_static(b"%PDF"))
            .await;
        assert!(matches!(result, UploadResult::Published { ref file_id, .. } if file_id == "file-1"));
        assert_eq!(storage.count("create:"), 1);
        assert_eq!(storage.count("share:"), 1);
        assert_eq!(storage.count("link:"), 2);
        assert_eq!(storage.public_files(), vec!["file-1"]);
    }

    #[tokio::test]
    async fn exhausted_upload_leaves_nothing_shared() {
        let storage = Arc::new(FakeStorage::new());
        storage.fail_link(vec![
            StorageError::Request("HTTP 500".into()),
            StorageError::Request("HTTP 500".into()),
            StorageError::Request("HTTP 500".into()),
        ]);
        let result = uploader(&storage, 1)
            .publish("out.pdf", Bytes::from_static(b"%PDF"))
            .await;
        assert_eq!(
            result,
            UploadResult::Failed {
                error: "storage request failed: HTTP 500".into()
            }
        );
        assert_eq!(storage.count("create:"), 1);
        assert!(storage.public_files().is_empty());
        assert_eq!(storage.events().last().map(String::as_str), Some("delete:file-1"));
    }

    #[tokio::test]
    async fn generic_failures_retry_and_report_last_error() {
        let storage = Arc::new(FakeStorage::new());
        storage.fail_create(vec![
            StorageError::Request("HTTP 500 one".into()),
            StorageError::Request("HTTP 500 two".into()),
            StorageError::Request("HTTP 503 three".into()),
        ]);
        let result = uploader(&storage, 1)
            .publish("out.pdf", Bytes::from_static(b"%PDF"))
            .await;
        assert_eq!(
            result,
            UploadResult::Failed {
                error: "storage request failed: HTTP 503 three".into()
            }
        );
        assert_eq!(storage.count("share:"), 0);
    }
}
