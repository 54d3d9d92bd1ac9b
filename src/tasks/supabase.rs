use super::{StoreError, Task, TaskId, TaskStatus, TaskStore, Transition};
use crate::http::build_client;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use tracing::debug;
use urlencoding::encode;

const TABLE: &str = "combine_label_tasks";

/// Task rows kept in a Supabase (PostgREST) table.
#[derive(Debug, Clone)]
pub struct SupabaseTaskStore {
    base_url: String,
    service_key: String,
    http: Client,
}

#[derive(Serialize)]
struct NewTaskRow<'a> {
    owner_id: &'a str,
    urls: &'a [String],
    total_urls: usize,
    status: TaskStatus,
}

/// Every column a transition may touch.
#[derive(Serialize)]
struct TaskPatch<'a> {
    status: TaskStatus,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    successful_count: usize,
    failed_count: usize,
    successful_urls: &'a [String],
    failed_urls: &'a [super::FailedUrl],
    drive_link: Option<&'a str>,
    error_message: Option<&'a str>,
    job_ref: Option<&'a str>,
}

impl<'a> From<&'a Task> for TaskPatch<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            status: task.status,
            updated_at: task.updated_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            successful_count: task.successful_count,
            failed_count: task.failed_count,
            successful_urls: &task.successful_urls,
            failed_urls: &task.failed_urls,
            drive_link: task.drive_link.as_deref(),
            error_message: task.error_message.as_deref(),
            job_ref: task.job_ref.as_deref(),
        }
    }
}

impl SupabaseTaskStore {
    pub fn new(base_url: &str, service_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            http: build_client(),
        }
    }

    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        Some(Self::new(&base_url, service_key))
    }

    fn table_url(&self, query: &str) -> String {
        format!("{}/rest/v1/{TABLE}?{query}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn fetch_rows(&self, query: &str) -> Result<Vec<Task>, StoreError> {
        let response = self
            .authorized(self.http.get(self.table_url(query)))
            .send()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        read_rows(response).await
    }
}

async fn read_rows(response: Response) -> Result<Vec<Task>, StoreError> {
    if !response.status().is_success() {
        return Err(StoreError::Backend(format!("HTTP {}", response.status())));
    }
    response
        .json()
        .await
        .map_err(|err| StoreError::Backend(format!("invalid response: {err}")))
}

fn pending_query(exclude: &[TaskId], limit: usize) -> String {
    let mut query = format!("status=eq.PENDING&select=*&order=created_at.asc,id.asc&limit={limit}");
    if !exclude.is_empty() {
        let ids = exclude
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        query.push_str(&format!("&id=not.in.({ids})"));
    }
    query
}

fn owner_query(owner_id: &str) -> String {
    format!(
        "owner_id=eq.{}&select=*&order=created_at.desc,id.desc",
        encode(owner_id)
    )
}

fn stalled_query(started_before: DateTime<Utc>, limit: usize) -> String {
    format!(
        "status=eq.PROCESSING&started_at=lt.{}&select=*&order=started_at.asc&limit={limit}",
        encode(&started_before.to_rfc3339_opts(SecondsFormat::Secs, true))
    )
}

/// Error for a compare-and-set that updated nothing, given the row as it
/// reads afterwards.
fn missed_update(id: TaskId, current: Option<Task>) -> StoreError {
    match current {
        Some(_) => StoreError::Conflict(id),
        None => StoreError::NotFound(id),
    }
}

fn compare_and_set_query(id: TaskId, expected: TaskStatus) -> String {
    format!("id=eq.{id}&status=eq.{}", expected.as_str())
}

#[async_trait]
impl TaskStore for SupabaseTaskStore {
    async fn create(&self, owner_id: &str, urls: Vec<String>) -> Result<Task, StoreError> {
        let row = NewTaskRow {
            owner_id,
            urls: &urls,
            total_urls: urls.len(),
            status: TaskStatus::Pending,
        };
        let response = self
            .authorized(self.http.post(format!("{}/rest/v1/{TABLE}", self.base_url)))
            .header("Prefer", "return=representation")
            .json(&[row])
            .send()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        read_rows(response)
            .await?
            .pop()
            .ok_or_else(|| StoreError::Backend("insert returned no row".into()))
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let mut rows = self
            .fetch_rows(&format!("id=eq.{id}&select=*&limit=1"))
            .await?;
        Ok(rows.pop())
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Task>, StoreError> {
        self.fetch_rows(&owner_query(owner_id)).await
    }

    async fn list_pending(&self, exclude: &[TaskId], limit: usize) -> Result<Vec<Task>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.fetch_rows(&pending_query(exclude, limit)).await
    }

    async fn list_stalled(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Task>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.fetch_rows(&stalled_query(started_before, limit)).await
    }

    async fn transition(&self, id: TaskId, transition: Transition) -> Result<Task, StoreError> {
        let mut task = self.get(id).await?.ok_or(StoreError::NotFound(id))?;
        let expected = task.status;
        task.apply(transition, Utc::now())?;

        let response = self
            .authorized(
                self.http
                    .patch(self.table_url(&compare_and_set_query(id, expected))),
            )
            .header("Prefer", "return=representation")
            .json(&TaskPatch::from(&task))
            .send()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        let mut rows = read_rows(response).await?;
        match rows.pop() {
            Some(updated) => Ok(updated),
            None => {
                debug!(target = "labelhub.store", task_id = id, expected = %expected, "compare_and_set_missed");
                Err(missed_update(id, self.get(id).await?))
            }
        }
    }
}
