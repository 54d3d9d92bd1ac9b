use super::{StoreError, Task, TaskId, TaskStatus, TaskStore, Transition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::Mutex;

/// Process-local task store. Used when no Supabase project is configured and
/// throughout the tests.
#[derive(Clone, Default)]
pub struct MemoryTaskStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    next_id: TaskId,
    tasks: BTreeMap<TaskId, Task>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, owner_id: &str, urls: Vec<String>) -> Result<Task, StoreError> {
        let mut guard = self.inner.lock().await;
        guard.next_id += 1;
        let task = Task::new(guard.next_id, owner_id, urls, Utc::now());
        guard.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.inner.lock().await.tasks.get(&id).cloned())
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Task>, StoreError> {
        let guard = self.inner.lock().await;
        // ids grow with creation time, so reverse id order is newest first
        Ok(guard
            .tasks
            .values()
            .rev()
            .filter(|task| task.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn list_pending(&self, exclude: &[TaskId], limit: usize) -> Result<Vec<Task>, StoreError> {
        let guard = self.inner.lock().await;
        Ok(guard
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Pending && !exclude.contains(&task.id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_stalled(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Task>, StoreError> {
        let guard = self.inner.lock().await;
        let mut stalled: Vec<Task> = guard
            .tasks
            .values()
            .filter(|task| {
                task.status == TaskStatus::Processing
                    && task.started_at.is_some_and(|at| at < started_before)
            })
            .cloned()
            .collect();
        stalled.sort_by_key(|task| task.started_at);
        stalled.truncate(limit);
        Ok(stalled)
    }

    async fn transition(&self, id: TaskId, transition: Transition) -> Result<Task, StoreError> {
        let mut guard = self.inner.lock().await;
        let task = guard.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        // validate on a copy so a rejected transition leaves the row as it was
        let mut next = task.clone();
        next.apply(transition, Utc::now())?;
        *task = next.clone();
        Ok(next)
    }
}
