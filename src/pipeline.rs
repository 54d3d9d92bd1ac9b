use crate::drive::{UploadResult, Uploader};
use crate::models::StageReport;
use crate::pdf::{FetchResult, Fetcher, MergeResult, merge_documents};
use crate::pool::{WorkerPool, describe_join_error};
use crate::retry::{Attempt, RetryPolicy};
use crate::tasks::{
    StoreError, Task, TaskId, TaskStatus, TaskStore, Transition, TransitionError, UrlOutcome,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::{future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{error, info, warn};

/// Drives one task through fetch, merge and upload, recording every status
/// change in the task store.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn TaskStore>,
    fetcher: Fetcher,
    uploader: Uploader,
    download_workers: usize,
    store_retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The task was not pending when this run looked at it.
    Skipped { status: TaskStatus },
    Completed {
        drive_link: String,
        successful: usize,
        failed: usize,
    },
    Failed { error: String },
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped { .. } => "skipped",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub task_id: TaskId,
    pub outcome: RunOutcome,
    pub stages: Vec<StageReport>,
}

impl RunReport {
    pub fn elapsed_ms(&self) -> u128 {
        self.stages.iter().map(|stage| stage.elapsed_ms).sum()
    }
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn TaskStore>,
        fetcher: Fetcher,
        uploader: Uploader,
        download_workers: usize,
        store_retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            fetcher,
            uploader,
            download_workers,
            store_retry,
        }
    }

    /// Runs task `id` to a terminal state. Only a pending task is touched;
    /// anything else is a no-op. Unexpected errors end in FAILED.
    pub async fn process(&self, id: TaskId, job_ref: Option<String>) -> RunReport {
        let mut stages = Vec::new();
        let outcome = match self.drive(id, job_ref, &mut stages).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(target = "labelhub.pipeline", task_id = id, stage = err.stage(), kind = ?err.kind(), error = %err, "pipeline_aborted");
                let outcome = err.outcome().cloned().unwrap_or_default();
                self.fail_with(id, err.detail(), outcome).await
            }
        };
        crate::metrics::task_finished(outcome.label());
        RunReport {
            task_id: id,
            outcome,
            stages,
        }
    }

    /// Marks a task that was left in PROCESSING as FAILED with `error`.
    pub async fn fail_abandoned(&self, id: TaskId, error: &str) -> RunOutcome {
        self.fail_with(id, error, UrlOutcome::default()).await
    }

    async fn fail_with(&self, id: TaskId, error: &str, outcome: UrlOutcome) -> RunOutcome {
        let transition = Transition::Fail {
            error: error.to_string(),
            outcome,
        };
        match self.record(id, transition).await {
            Ok(_) => {}
            Err(StoreError::Transition(TransitionError::Illegal { from, .. })) => {
                warn!(target = "labelhub.pipeline", task_id = id, status = %from, "abandoned_task_not_processing");
            }
            Err(err) => {
                error!(target = "labelhub.pipeline", task_id = id, error = %err, "abandoned_task_not_recorded");
            }
        }
        RunOutcome::Failed {
            error: error.to_string(),
        }
    }

    async fn drive(
        &self,
        id: TaskId,
        job_ref: Option<String>,
        stages: &mut Vec<StageReport>,
    ) -> Result<RunOutcome, PipelineError> {
        let task = match self.start(id, job_ref, stages).await? {
            Started::Running(task) => task,
            Started::Skipped(status) => {
                info!(target = "labelhub.pipeline", task_id = id, status = %status, "task_not_pending");
                return Ok(RunOutcome::Skipped { status });
            }
        };

        let results = capture_stage("fetch", stages, async {
            let pool = WorkerPool::new("download", self.download_workers);
            let results = self.fetcher.fetch_all(&task.urls, &pool).await;
            let fetched = results.iter().filter(|r| r.is_fetched()).count();
            let output = json!({
                "total": results.len(),
                "fetched": fetched,
                "failed": results.len() - fetched,
            });
            Ok(StageOutcome::new(results, output))
        })
        .await?;

        let merged = capture_stage("merge", stages, merge_stage(results)).await?;
        let (document, successful_urls, failed_urls) = match merged {
            MergeResult::Merged {
                document,
                successful_urls,
                failed_urls,
            } => (document, successful_urls, failed_urls),
            MergeResult::Failed { error, failed_urls } => {
                let outcome = UrlOutcome {
                    successful_urls: Vec::new(),
                    failed_urls,
                };
                return self.finish_failed(id, error, outcome).await;
            }
        };

        let file_name = output_file_name(id, Utc::now());
        let uploaded = capture_stage("upload", stages, async {
            let result = self.uploader.publish(&file_name, Bytes::from(document)).await;
            let output = match &result {
                UploadResult::Published { file_id, .. } => {
                    json!({ "file_name": file_name, "file_id": file_id })
                }
                UploadResult::Failed { error } => json!({ "file_name": file_name, "error": error }),
            };
            Ok(StageOutcome::new(result, output))
        })
        .await?;

        let outcome = UrlOutcome {
            successful_urls,
            failed_urls,
        };
        match uploaded {
            UploadResult::Published { link, .. } => self.finish_completed(id, link, outcome).await,
            UploadResult::Failed { error } => {
                let error = format!("Failed to upload to Google Drive: {error}");
                self.finish_failed(id, error, outcome).await
            }
        }
    }

    async fn start(
        &self,
        id: TaskId,
        job_ref: Option<String>,
        stages: &mut Vec<StageReport>,
    ) -> Result<Started, PipelineError> {
        capture_stage("start", stages, self.claim(id, job_ref)).await
    }

    async fn claim(
        &self,
        id: TaskId,
        job_ref: Option<String>,
    ) -> Result<StageOutcome<Started>, PipelineError> {
        let task = self
            .store
            .get(id)
            .await
            .map_err(|err| PipelineError::internal("start", err.to_string()))?
            .ok_or_else(|| PipelineError::invalid_input("start", format!("task {id} not found")))?;
        if task.status != TaskStatus::Pending {
            let output = json!({ "status": task.status });
            return Ok(StageOutcome::new(Started::Skipped(task.status), output));
        }

        match self.store.transition(id, Transition::Start { job_ref }).await {
            Ok(task) => {
                info!(target = "labelhub.pipeline", task_id = id, urls = task.total_urls, job_ref = ?task.job_ref, "task_processing");
                let output = json!({ "total_urls": task.total_urls, "job_ref": task.job_ref });
                Ok(StageOutcome::new(Started::Running(task), output))
            }
            // lost the race to a cancel or to another dispatcher
            Err(StoreError::Conflict(_) | StoreError::Transition(_)) => {
                let status = self
                    .store
                    .get(id)
                    .await
                    .ok()
                    .flatten()
                    .map(|current| current.status)
                    .unwrap_or(task.status);
                Ok(StageOutcome::new(
                    Started::Skipped(status),
                    json!({ "status": status, "claimed_elsewhere": true }),
                ))
            }
            Err(err) => Err(PipelineError::internal("start", err.to_string())),
        }
    }

    /// Persists a terminal transition, retrying while the store is
    /// unreachable. Rejections from the store are returned at once.
    async fn record(&self, id: TaskId, transition: Transition) -> Result<Task, StoreError> {
        self.store_retry
            .run("record", |attempt| {
                let transition = transition.clone();
                async move {
                    self.store.transition(id, transition).await.map_err(|err| {
                        warn!(target = "labelhub.pipeline", task_id = id, attempt, error = %err, "store_write_failed");
                        match err {
                            StoreError::Backend(_) => Attempt::Transient(err),
                            other => Attempt::Permanent(other),
                        }
                    })
                }
            })
            .await
            .map_err(|failure| failure.error)
    }

    async fn finish_completed(
        &self,
        id: TaskId,
        drive_link: String,
        outcome: UrlOutcome,
    ) -> Result<RunOutcome, PipelineError> {
        let transition = Transition::Complete {
            drive_link: drive_link.clone(),
            outcome: outcome.clone(),
        };
        let task = match self.record(id, transition).await {
            Ok(task) => task,
            Err(err) => {
                error!(target = "labelhub.pipeline", task_id = id, drive_link = %drive_link, error = %err, "completion_not_recorded");
                let error = format!("Combined PDF was published to {drive_link} but the task could not be completed: {err}");
                return self.finish_failed(id, error, outcome).await;
            }
        };
        info!(
            target = "labelhub.pipeline",
            task_id = id,
            successful = task.successful_count,
            failed = task.failed_count,
            "task_completed"
        );
        Ok(RunOutcome::Completed {
            drive_link: task.drive_link.unwrap_or_default(),
            successful: task.successful_count,
            failed: task.failed_count,
        })
    }

    async fn finish_failed(
        &self,
        id: TaskId,
        error: String,
        outcome: UrlOutcome,
    ) -> Result<RunOutcome, PipelineError> {
        warn!(target = "labelhub.pipeline", task_id = id, error = %error, failed = outcome.failed_urls.len(), "task_failed");
        let transition = Transition::Fail {
            error: error.clone(),
            outcome: outcome.clone(),
        };
        if let Err(err) = self.record(id, transition).await {
            error!(target = "labelhub.pipeline", task_id = id, error = %err, "failure_not_recorded");
            return Err(PipelineError::internal("fail", error).with_outcome(outcome));
        }
        Ok(RunOutcome::Failed { error })
    }
}

#[derive(Debug)]
enum Started {
    Running(Task),
    Skipped(TaskStatus),
}

async fn merge_stage(results: Vec<FetchResult>) -> Result<StageOutcome<MergeResult>, PipelineError> {
    let merged = tokio::task::spawn_blocking(move || merge_documents(results))
        .await
        .map_err(|err| PipelineError::internal("merge", describe_join_error(err)))?;
    let output = match &merged {
        MergeResult::Merged {
            document,
            successful_urls,
            failed_urls,
        } => json!({
            "bytes": document.len(),
            "merged": successful_urls.len(),
            "failed": failed_urls.len(),
        }),
        MergeResult::Failed { error, failed_urls } => json!({
            "error": error,
            "failed": failed_urls.len(),
        }),
    };
    Ok(StageOutcome::new(merged, output))
}

pub fn output_file_name(id: TaskId, at: DateTime<Utc>) -> String {
    format!("combined_labels_{id}_{}.pdf", at.format("%Y%m%d_%H%M%S"))
}

async fn capture_stage<T, Fut>(
    name: &'static str,
    stages: &mut Vec<StageReport>,
    fut: Fut,
) -> Result<T, PipelineError>
where
    Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
{
    let started = Instant::now();
    let outcome = fut.await?;
    let elapsed_ms = started.elapsed().as_millis();
    crate::metrics::stage_elapsed(name, elapsed_ms);
    stages.push(StageReport::new(name, elapsed_ms, outcome.output));
    Ok(outcome.value)
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
    /// URL breakdown known when the error happened, if any.
    outcome: Option<UrlOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
            outcome: None,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
            outcome: None,
        }
    }

    pub fn with_outcome(mut self, outcome: UrlOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn outcome(&self) -> Option<&UrlOutcome> {
        self.outcome.as_ref()
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
struct StageOutcome<T> {
    value: T,
    output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::StorageError;
    use crate::retry::RetryPolicy;
    use crate::tasks::{FailedUrl, MemoryTaskStore};
    use crate::testing::{
        FakeStorage, FlakyStore, ScriptedSource, page_tags, pdf_response, pdf_with_pages,
    };
    use chrono::TimeZone;
    use tokio::time::Duration;

    const FAST: RetryPolicy = RetryPolicy::new(3, Duration::ZERO);

    struct Harness {
        store: MemoryTaskStore,
        source: Arc<ScriptedSource>,
        storage: Arc<FakeStorage>,
        pipeline: Pipeline,
    }

    fn harness() -> Harness {
        let store = MemoryTaskStore::new();
        build(store.clone(), Arc::new(store))
    }

    /// Harness whose pipeline writes through a [`FlakyStore`] over the same
    /// rows the harness reads.
    fn flaky_harness() -> (Harness, Arc<FlakyStore>) {
        let store = MemoryTaskStore::new();
        let flaky = Arc::new(FlakyStore::new(store.clone()));
        (build(store, flaky.clone()), flaky)
    }

    fn build(store: MemoryTaskStore, writes: Arc<dyn TaskStore>) -> Harness {
        let source = Arc::new(ScriptedSource::new());
        let storage = Arc::new(FakeStorage::new());
        let pipeline = Pipeline::new(
            writes,
            Fetcher::new(source.clone(), FAST),
            Uploader::new(storage.clone(), FAST, Some("labels".into()), 1),
            4,
            FAST,
        );
        Harness {
            store,
            source,
            storage,
            pipeline,
        }
    }

    fn urls(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    async fn stored(h: &Harness, id: TaskId) -> Task {
        h.store.get(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn all_good_urls_complete_in_order() {
        let h = harness();
        h.source.script("good1.pdf", vec![Ok(pdf_response(pdf_with_pages(&["one"])))]);
        h.source.script("good2.pdf", vec![Ok(pdf_response(pdf_with_pages(&["two", "three"])))]);
        let task = h.store.create("owner", urls(&["good1.pdf", "good2.pdf"])).await.unwrap();

        let report = h.pipeline.process(task.id, Some("dispatch-1".into())).await;
        assert!(matches!(report.outcome, RunOutcome::Completed { successful: 2, failed: 0, .. }));
        let names: Vec<&str> = report.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["start", "fetch", "merge", "upload"]);

        let task = stored(&h, task.id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.successful_count, 2);
        assert_eq!(task.failed_count, 0);
        assert_eq!(task.drive_link.as_deref(), Some("https://drive.example/file-1/view"));
        assert_eq!(task.job_ref.as_deref(), Some("dispatch-1"));
        assert!(task.completed_at.is_some());

        let (name, bytes) = h.storage.last_upload().unwrap();
        assert!(name.starts_with(&format!("combined_labels_{}_", task.id)));
        assert_eq!(page_tags(&bytes), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn one_missing_url_is_a_partial_success() {
        let h = harness();
        h.source.script("good.pdf", vec![Ok(pdf_response(pdf_with_pages(&["g"])))]);
        h.source.script("404.pdf", vec![Ok(ScriptedSource::status(404))]);
        let task = h.store.create("owner", urls(&["good.pdf", "404.pdf"])).await.unwrap();

        h.pipeline.process(task.id, None).await;
        let task = stored(&h, task.id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.successful_count, 1);
        assert_eq!(task.failed_count, 1);
        assert_eq!(task.failed_urls, vec![FailedUrl::new("404.pdf", "HTTP 404")]);
        assert!(task.drive_link.is_some());
    }

    #[tokio::test]
    async fn unparseable_documents_fail_the_task() {
        let h = harness();
        h.source.script("bad1.pdf", vec![Ok(pdf_response(b"not a pdf".to_vec()))]);
        h.source.script("bad2.pdf", vec![Ok(pdf_response(b"<html>moved</html>".to_vec()))]);
        let task = h.store.create("owner", urls(&["bad1.pdf", "bad2.pdf"])).await.unwrap();

        let report = h.pipeline.process(task.id, None).await;
        assert!(matches!(report.outcome, RunOutcome::Failed { .. }));
        let task = stored(&h, task.id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some("No PDFs were successfully downloaded"));
        assert!(task.drive_link.is_none());
        assert_eq!(task.failed_count, 2);
        assert_eq!(task.successful_count, 0);
        assert_eq!(h.storage.count("create:"), 0);
    }

    #[tokio::test]
    async fn cancelled_task_is_never_downloaded() {
        let h = harness();
        let task = h.store.create("owner", urls(&["a.pdf"])).await.unwrap();
        h.store.transition(task.id, Transition::Cancel).await.unwrap();

        let report = h.pipeline.process(task.id, None).await;
        assert_eq!(
            report.outcome,
            RunOutcome::Skipped {
                status: TaskStatus::Cancelled
            }
        );
        let task = stored(&h, task.id).await;
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.completed_at.is_some());
        assert_eq!(h.source.total_calls(), 0);
    }

    #[tokio::test]
    async fn upload_failure_keeps_url_breakdown() {
        let h = harness();
        h.source.script("a.pdf", vec![Ok(pdf_response(pdf_with_pages(&["a"])))]);
        h.source.script("b.pdf", vec![Ok(ScriptedSource::status(410))]);
        h.storage.fail_create(vec![
            StorageError::Request("HTTP 500".into()),
            StorageError::Request("HTTP 502".into()),
            StorageError::Request("HTTP 503".into()),
        ]);
        let task = h.store.create("owner", urls(&["a.pdf", "b.pdf"])).await.unwrap();

        h.pipeline.process(task.id, None).await;
        let task = stored(&h, task.id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.error_message.as_deref(),
            Some("Failed to upload to Google Drive: storage request failed: HTTP 503")
        );
        assert_eq!(task.successful_urls, vec!["a.pdf"]);
        assert_eq!(task.failed_count, 1);
        assert!(task.drive_link.is_none());
    }

    async fn partial_batch(h: &Harness) -> Task {
        h.source.script("a.pdf", vec![Ok(pdf_response(pdf_with_pages(&["a"])))]);
        h.source.script("b.pdf", vec![Ok(ScriptedSource::status(404))]);
        h.store.create("owner", urls(&["a.pdf", "b.pdf"])).await.unwrap()
    }

    #[tokio::test]
    async fn completion_write_is_retried() {
        let (h, flaky) = flaky_harness();
        let task = partial_batch(&h).await;
        flaky.fail_completes(1);

        h.pipeline.process(task.id, None).await;
        let task = stored(&h, task.id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.drive_link.as_deref(), Some("https://drive.example/file-1/view"));
        assert_eq!(task.successful_urls, vec!["a.pdf"]);
        assert_eq!(task.failed_urls, vec![FailedUrl::new("b.pdf", "HTTP 404")]);
        assert_eq!(h.storage.public_files(), vec!["file-1"]);
    }

    #[tokio::test]
    async fn unrecordable_completion_fails_with_breakdown_and_link() {
        let (h, flaky) = flaky_harness();
        let task = partial_batch(&h).await;
        flaky.fail_completes(3);

        let report = h.pipeline.process(task.id, None).await;
        assert!(matches!(report.outcome, RunOutcome::Failed { .. }));
        let task = stored(&h, task.id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        let error = task.error_message.unwrap_or_default();
        assert!(error.contains("https://drive.example/file-1/view"), "{error}");
        assert!(error.contains("HTTP 503"), "{error}");
        assert_eq!(task.successful_urls, vec!["a.pdf"]);
        assert_eq!(task.failed_urls, vec![FailedUrl::new("b.pdf", "HTTP 404")]);
        assert!(task.completed_at.is_some());
    }

    #[tokio::test]
    async fn failure_write_fallback_keeps_breakdown() {
        let (h, flaky) = flaky_harness();
        let task = partial_batch(&h).await;
        h.storage.fail_create(vec![
            StorageError::Request("HTTP 500".into()),
            StorageError::Request("HTTP 500".into()),
            StorageError::Request("HTTP 500".into()),
        ]);
        // every retry of the regular FAILED write is lost; the fallback lands
        flaky.fail_fails(3);

        h.pipeline.process(task.id, None).await;
        let task = stored(&h, task.id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.error_message.as_deref(),
            Some("Failed to upload to Google Drive: storage request failed: HTTP 500")
        );
        assert_eq!(task.successful_urls, vec!["a.pdf"]);
        assert_eq!(task.failed_count, 1);
    }

    #[tokio::test]
    async fn finished_task_is_not_reprocessed() {
        let h = harness();
        h.source.script("a.pdf", vec![Ok(pdf_response(pdf_with_pages(&["a"])))]);
        let task = h.store.create("owner", urls(&["a.pdf"])).await.unwrap();
        h.pipeline.process(task.id, None).await;

        let again = h.pipeline.process(task.id, None).await;
        assert_eq!(
            again.outcome,
            RunOutcome::Skipped {
                status: TaskStatus::Completed
            }
        );
        assert_eq!(h.source.calls("a.pdf"), 1);
        assert_eq!(h.storage.count("create:"), 1);
    }

    #[tokio::test]
    async fn missing_task_reports_failure_without_writing() {
        let h = harness();
        let report = h.pipeline.process(99, None).await;
        assert!(matches!(report.outcome, RunOutcome::Failed { ref error } if error.contains("not found")));
    }

    #[tokio::test]
    async fn abandoned_processing_task_is_failed() {
        let h = harness();
        let task = h.store.create("owner", urls(&["a.pdf"])).await.unwrap();
        h.store
            .transition(task.id, Transition::Start { job_ref: None })
            .await
            .unwrap();

        h.pipeline.fail_abandoned(task.id, "worker panicked: boom").await;
        let task = stored(&h, task.id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some("worker panicked: boom"));
        assert!(task.completed_at.is_some());
    }

    #[tokio::test]
    async fn counts_never_exceed_total() {
        let h = harness();
        h.source.script("a.pdf", vec![Ok(pdf_response(pdf_with_pages(&["a"])))]);
        h.source.script("b.pdf", vec![Ok(pdf_response(b"junk".to_vec()))]);
        h.source.script("c.pdf", vec![Ok(ScriptedSource::status(404))]);
        let task = h.store.create("owner", urls(&["a.pdf", "b.pdf", "c.pdf"])).await.unwrap();
        h.pipeline.process(task.id, None).await;

        let task = stored(&h, task.id).await;
        assert_eq!(task.successful_count + task.failed_count, task.total_urls);
        let mut seen: Vec<&str> = task.successful_urls.iter().map(String::as_str).collect();
        seen.extend(task.failed_urls.iter().map(|f| f.url.as_str()));
        seen.sort();
        assert_eq!(seen, vec!["a.pdf", "b.pdf", "c.pdf"]);
    }

    #[test]
    fn file_name_uses_utc_timestamp() {
        let at = Utc.with_ymd_and_hms(2025, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(output_file_name(42, at), "combined_labels_42_20250309_140507.pdf");
    }
}
