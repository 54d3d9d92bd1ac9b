use crate::config::SchedulerConfig;
use crate::pipeline::{Pipeline, RunOutcome};
use crate::pool::{WorkerPool, describe_join_error};
use crate::tasks::{StoreError, TaskId, TaskStore};
use chrono::Utc;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};
use tokio::{
    sync::{Notify, watch},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Scans between two stall sweeps. The first scan after start-up sweeps too.
const SWEEP_EVERY_SCANS: u64 = 20;
const SWEEP_BATCH: usize = 50;
const STALLED_ERROR: &str = "Task stalled in processing and was abandoned";

/// Task ids currently owned by a worker slot in this process.
#[derive(Clone, Default)]
pub struct ClaimTable {
    ids: Arc<Mutex<HashSet<TaskId>>>,
}

/// Holds one id in a [`ClaimTable`] until dropped.
pub struct Claim {
    table: ClaimTable,
    id: TaskId,
}

impl ClaimTable {
    /// Claims `id`, or returns `None` when it is already claimed.
    pub fn claim(&self, id: TaskId) -> Option<Claim> {
        let mut ids = self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        ids.insert(id).then(|| Claim {
            table: self.clone(),
            id,
        })
    }

    pub fn snapshot(&self) -> Vec<TaskId> {
        let ids = self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut snapshot: Vec<TaskId> = ids.iter().copied().collect();
        snapshot.sort_unstable();
        snapshot
    }

    pub fn len(&self) -> usize {
        self.ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.table
            .ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.id);
    }
}

/// Controls a running scheduler. Dropping every handle stops it too.
#[derive(Clone)]
pub struct SchedulerHandle {
    wake: Arc<Notify>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SchedulerHandle {
    /// Asks for a scan now instead of at the next interval.
    pub fn nudge(&self) {
        self.wake.notify_one();
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// A handle with no scheduler behind it.
    #[cfg(test)]
    pub fn detached() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            wake: Arc::new(Notify::new()),
            shutdown: Arc::new(shutdown),
        }
    }
}

/// Polls the store for pending tasks and runs them on a bounded pool.
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    pipeline: Pipeline,
    pool: WorkerPool,
    claims: ClaimTable,
    config: SchedulerConfig,
    wake: Arc<Notify>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn TaskStore>, pipeline: Pipeline, config: SchedulerConfig) -> Self {
        Self {
            store,
            pipeline,
            pool: WorkerPool::new("scheduler", config.max_workers),
            claims: ClaimTable::default(),
            config,
            wake: Arc::new(Notify::new()),
        }
    }

    #[cfg(test)]
    pub fn claims(&self) -> &ClaimTable {
        &self.claims
    }

    /// One scan. Dispatches at most as many pending tasks as there are free
    /// slots and returns the handles of the runs it started.
    pub async fn tick(&self) -> Result<Vec<JoinHandle<()>>, StoreError> {
        let free = self.pool.idle();
        if free == 0 {
            return Ok(Vec::new());
        }
        let pending = self
            .store
            .list_pending(&self.claims.snapshot(), free)
            .await?;

        let mut started = Vec::with_capacity(pending.len());
        for task in pending {
            let Some(claim) = self.claims.claim(task.id) else {
                continue;
            };
            let dispatch_id = Uuid::new_v4().to_string();
            debug!(target = "labelhub.scheduler", task_id = task.id, dispatch_id = %dispatch_id, "task_dispatched");
            match self.pool.try_spawn(supervise(self.pipeline.clone(), claim, dispatch_id)) {
                Some(handle) => started.push(handle),
                None => break,
            }
        }
        Ok(started)
    }

    /// Fails PROCESSING tasks that started more than `stale_after` ago and
    /// are not running in this process. Returns how many were failed.
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        let stale_after = chrono::Duration::seconds(self.config.stale_after.as_secs() as i64);
        let stalled = self
            .store
            .list_stalled(Utc::now() - stale_after, SWEEP_BATCH)
            .await?;
        let running = self.claims.snapshot();
        let mut failed = 0;
        for task in stalled.into_iter().filter(|task| !running.contains(&task.id)) {
            warn!(target = "labelhub.scheduler", task_id = task.id, started_at = ?task.started_at, job_ref = ?task.job_ref, "stalled_task_failed");
            self.pipeline.fail_abandoned(task.id, STALLED_ERROR).await;
            failed += 1;
        }
        Ok(failed)
    }

    /// Starts the polling loop on its own task.
    pub fn spawn(self) -> (SchedulerHandle, JoinHandle<()>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = SchedulerHandle {
            wake: self.wake.clone(),
            shutdown: Arc::new(shutdown_tx),
        };
        let join = tokio::spawn(self.run(shutdown_rx));
        (handle, join)
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            target = "labelhub.scheduler",
            max_workers = self.pool.size(),
            poll_secs = self.config.poll_interval.as_secs(),
            "scheduler_started"
        );
        let mut scans: u64 = 0;
        loop {
            if scans % SWEEP_EVERY_SCANS == 0
                && let Err(err) = self.sweep().await
            {
                error!(target = "labelhub.scheduler", error = %err, "stall_sweep_failed");
            }
            scans += 1;
            let wait = match self.tick().await {
                Ok(started) => {
                    if !started.is_empty() {
                        info!(target = "labelhub.scheduler", dispatched = started.len(), in_flight = self.claims.len(), "scan_dispatched");
                    }
                    self.config.poll_interval
                }
                Err(err) => {
                    error!(target = "labelhub.scheduler", error = %err, "pending_scan_failed");
                    self.config.error_backoff
                }
            };
            tokio::select! {
                _ = sleep(wait) => {}
                _ = self.wake.notified() => {}
                _ = shutdown.changed() => break,
            }
        }
        info!(target = "labelhub.scheduler", in_flight = self.claims.len(), "scheduler_draining");
        self.pool.wait_idle().await;
        info!(target = "labelhub.scheduler", "scheduler_stopped");
    }
}

/// Runs one task and makes sure a panic inside the run still ends in FAILED.
async fn supervise(pipeline: Pipeline, claim: Claim, dispatch_id: String) {
    let id = claim.id;
    let run = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.process(id, Some(dispatch_id)).await }
    });
    match run.await {
        Ok(report) => match &report.outcome {
            RunOutcome::Failed { error } => {
                warn!(target = "labelhub.scheduler", task_id = report.task_id, elapsed_ms = report.elapsed_ms() as u64, error = %error, "run_failed");
            }
            outcome => {
                info!(target = "labelhub.scheduler", task_id = report.task_id, elapsed_ms = report.elapsed_ms() as u64, outcome = ?outcome, "run_finished");
            }
        },
        Err(err) => {
            let message = describe_join_error(err);
            error!(target = "labelhub.scheduler", task_id = id, error = %message, "run_panicked");
            pipeline.fail_abandoned(id, &message).await;
        }
    }
    drop(claim);
}
