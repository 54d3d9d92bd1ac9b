pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use memory::MemoryTaskStore;
pub use supabase::SupabaseTaskStore;

pub type TaskId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedUrl {
    pub url: String,
    pub error: String,
}

impl FailedUrl {
    pub fn new(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            error: error.into(),
        }
    }
}

/// Per-URL breakdown written onto a task when it reaches a terminal state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlOutcome {
    pub successful_urls: Vec<String>,
    pub failed_urls: Vec<FailedUrl>,
}

/// One batch of label URLs to be combined into a single PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub owner_id: String,
    pub urls: Vec<String>,
    pub total_urls: usize,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub successful_count: usize,
    #[serde(default)]
    pub failed_count: usize,
    #[serde(default)]
    pub successful_urls: Vec<String>,
    #[serde(default)]
    pub failed_urls: Vec<FailedUrl>,
    #[serde(default)]
    pub drive_link: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub job_ref: Option<String>,
}

/// A requested status change. Only [`Task::apply`] interprets these.
#[derive(Debug, Clone)]
pub enum Transition {
    Start { job_ref: Option<String> },
    Complete { drive_link: String, outcome: UrlOutcome },
    Fail { error: String, outcome: UrlOutcome },
    Cancel,
}

impl Transition {
    pub fn target(&self) -> TaskStatus {
        match self {
            Transition::Start { .. } => TaskStatus::Processing,
            Transition::Complete { .. } => TaskStatus::Completed,
            Transition::Fail { .. } => TaskStatus::Failed,
            Transition::Cancel => TaskStatus::Cancelled,
        }
    }

    /// Status a task must be in for this transition to be legal.
    pub fn required_status(&self) -> TaskStatus {
        match self {
            Transition::Start { .. } | Transition::Cancel => TaskStatus::Pending,
            Transition::Complete { .. } | Transition::Fail { .. } => TaskStatus::Processing,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("can only cancel pending tasks")]
    CancelNotPending { status: TaskStatus },
    #[error("illegal transition from {from} to {to}")]
    Illegal { from: TaskStatus, to: TaskStatus },
    #[error("invariant violated: {0}")]
    Invariant(&'static str),
}

impl Task {
    pub fn new(id: TaskId, owner_id: impl Into<String>, urls: Vec<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id: owner_id.into(),
            total_urls: urls.len(),
            urls,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            successful_count: 0,
            failed_count: 0,
            successful_urls: Vec::new(),
            failed_urls: Vec::new(),
            drive_link: None,
            error_message: None,
            job_ref: None,
        }
    }

    /// Applies `transition` in place, enforcing the task state machine.
    ///
    /// On error the task is left untouched.
    pub fn apply(&mut self, transition: Transition, now: DateTime<Utc>) -> Result<(), TransitionError> {
        let required = transition.required_status();
        if self.status != required {
            return Err(match transition {
                Transition::Cancel => TransitionError::CancelNotPending {
                    status: self.status,
                },
                other => TransitionError::Illegal {
                    from: self.status,
                    to: other.target(),
                },
            });
        }

        match transition {
            Transition::Start { job_ref } => {
                self.status = TaskStatus::Processing;
                self.started_at = Some(now);
                if job_ref.is_some() {
                    self.job_ref = job_ref;
                }
            }
            Transition::Complete {
                drive_link,
                outcome,
            } => {
                if drive_link.trim().is_empty() {
                    return Err(TransitionError::Invariant(
                        "completed task requires a drive link",
                    ));
                }
                if outcome.successful_urls.is_empty() {
                    return Err(TransitionError::Invariant(
                        "completed task requires at least one merged url",
                    ));
                }
                self.check_counts(&outcome)?;
                self.record_outcome(outcome);
                self.status = TaskStatus::Completed;
                self.drive_link = Some(drive_link);
                self.error_message = None;
                self.completed_at = Some(now);
            }
            Transition::Fail { error, outcome } => {
                self.check_counts(&outcome)?;
                self.record_outcome(outcome);
                self.status = TaskStatus::Failed;
                self.drive_link = None;
                self.error_message = Some(error);
                self.completed_at = Some(now);
            }
            Transition::Cancel => {
                self.status = TaskStatus::Cancelled;
                self.completed_at = Some(now);
            }
        }
        self.updated_at = now;
        Ok(())
    }

    fn check_counts(&self, outcome: &UrlOutcome) -> Result<(), TransitionError> {
        if outcome.successful_urls.len() + outcome.failed_urls.len() > self.total_urls {
            return Err(TransitionError::Invariant(
                "successful + failed urls exceed total_urls",
            ));
        }
        Ok(())
    }

    fn record_outcome(&mut self, outcome: UrlOutcome) {
        self.successful_count = outcome.successful_urls.len();
        self.failed_count = outcome.failed_urls.len();
        self.successful_urls = outcome.successful_urls;
        self.failed_urls = outcome.failed_urls;
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(TaskId),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("task {0} was modified concurrently")]
    Conflict(TaskId),
    #[error("task store request failed: {0}")]
    Backend(String),
}

/// Persistence for combine-label tasks. The store is the single writer of
/// task rows; every status change goes through [`TaskStore::transition`].
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, owner_id: &str, urls: Vec<String>) -> Result<Task, StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Tasks owned by `owner_id`, newest first.
    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Task>, StoreError>;

    /// Oldest pending tasks not in `exclude`, at most `limit` of them.
    async fn list_pending(&self, exclude: &[TaskId], limit: usize) -> Result<Vec<Task>, StoreError>;

    /// Processing tasks started before `started_before`, oldest first.
    async fn list_stalled(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Task>, StoreError>;

    /// Validates `transition` against the current row and persists it only
    /// if the row still holds the status it was validated against.
    async fn transition(&self, id: TaskId, transition: Transition) -> Result<Task, StoreError>;
}
