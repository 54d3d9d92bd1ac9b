use crate::tasks::{FailedUrl, Task, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub total_urls: usize,
    pub created_at: DateTime<Utc>,
    pub message: String,
}

impl From<&Task> for CreateTaskResponse {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            total_urls: task.total_urls,
            created_at: task.created_at,
            message: format!("Task created with {} URLs", task.total_urls),
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub total_urls: usize,
    pub successful_count: usize,
    pub failed_count: usize,
    pub drive_link: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            total_urls: task.total_urls,
            successful_count: task.successful_count,
            failed_count: task.failed_count,
            drive_link: task.drive_link.clone(),
            created_at: task.created_at,
            completed_at: task.completed_at,
        }
    }
}

/// Everything a client can learn about one task, including which URLs made
/// it into the output and why the others did not.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub urls: Vec<String>,
    pub total_urls: usize,
    pub successful_count: usize,
    pub failed_count: usize,
    pub successful_urls: Vec<String>,
    pub failed_urls: Vec<FailedUrl>,
    pub drive_link: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Task> for TaskDetail {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            urls: task.urls,
            total_urls: task.total_urls,
            successful_count: task.successful_count,
            failed_count: task.failed_count,
            successful_urls: task.successful_urls,
            failed_urls: task.failed_urls,
            drive_link: task.drive_link,
            error_message: task.error_message,
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ApiError {
    pub fn new(error: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            detail: Some(detail.into()),
        }
    }
}
