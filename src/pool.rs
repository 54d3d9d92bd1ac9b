use std::{future::Future, sync::Arc};
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::warn;

/// Semaphore-bounded spawner. The scheduler uses one for whole tasks and the
/// orchestrator uses one per task for downloads.
#[derive(Clone)]
pub struct WorkerPool {
    name: &'static str,
    size: usize,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(name: &'static str, size: usize) -> Self {
        let size = size.max(1);
        Self {
            name,
            size,
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Free slots right now.
    pub fn idle(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs `work` over every item with at most `size` units in flight and
    /// returns the results in input order, whatever order they finish in.
    /// A unit that panics yields `Err` with the panic text.
    pub async fn map_ordered<I, T, F, Fut>(&self, items: Vec<I>, work: F) -> Vec<Result<T, String>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let work = Arc::new(work);
        let handles: Vec<JoinHandle<T>> = items
            .into_iter()
            .map(|item| {
                let permits = self.permits.clone();
                let work = work.clone();
                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await;
                    work(item).await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(value) => results.push(Ok(value)),
                Err(err) => {
                    let message = describe_join_error(err);
                    warn!(target = "labelhub.pool", pool = self.name, index, error = %message, "worker_unit_aborted");
                    results.push(Err(message));
                }
            }
        }
        results
    }

    /// Starts `fut` only if a slot is free; the slot is held until it ends.
    pub fn try_spawn<F>(&self, fut: F) -> Option<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = self.permits.clone().try_acquire_owned().ok()?;
        Some(tokio::spawn(async move {
            let _permit = permit;
            fut.await
        }))
    }

    /// Waits until every slot is free again.
    pub async fn wait_idle(&self) {
        if let Ok(all) = self.permits.acquire_many(self.size as u32).await {
            drop(all);
        }
    }
}

pub fn describe_join_error(err: tokio::task::JoinError) -> String {
    if err.is_panic() {
        let payload = err.into_panic();
        if let Some(text) = payload.downcast_ref::<&str>() {
            format!("worker panicked: {text}")
        } else if let Some(text) = payload.downcast_ref::<String>() {
            format!("worker panicked: {text}")
        } else {
            "worker panicked".to_string()
        }
    } else {
        "worker cancelled".to_string()
    }
}
