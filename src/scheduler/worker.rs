//! Task scheduler.
//!
//! Polls the backlog on an interval, claims pending tasks with the store's
//! atomic compare-and-swap, and supervises each run:
//!
//! - transient failures are requeued with exponential backoff until the
//!   retry cap, permanent failures go straight to `FAILED`
//! - cancellation requests are relayed cooperatively to the running
//!   pipeline through a shared [`CancelSignal`]
//! - on startup, `RUNNING` tasks abandoned by a dead worker are requeued
//!
//! The claim is the only entry point into execution; a task that loses the
//! claim race is simply skipped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collaborators::CollaboratorError;
use crate::pipeline::{CancelSignal, ExecutionOutcome, PipelineError, PipelineExecutor};
use crate::store::{StoreError, TaskStore};

use super::config::SchedulerConfig;

/// Errors that can occur during scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Snapshot of the scheduler's current state.
#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    /// Whether the poll loop is active.
    pub is_running: bool,
    /// Number of tasks currently supervised.
    pub running_tasks: usize,
    /// Ids of the supervised tasks.
    pub tracked_task_ids: Vec<Uuid>,
    /// Configured concurrency cap.
    pub max_concurrent_tasks: usize,
}

/// Health report over the supervised tasks.
#[derive(Debug, Clone)]
pub struct SchedulerHealth {
    /// `false` when any task looks stuck.
    pub healthy: bool,
    /// Number of tasks currently supervised.
    pub running_tasks: usize,
    /// Tasks running longer than twice the expected run time.
    pub stuck_tasks: Vec<Uuid>,
}

/// One supervised run.
struct TrackedTask {
    cancel: CancelSignal,
    started_at: Instant,
    handle: Option<JoinHandle<()>>,
}

/// Shared state cloned into the poll loop and run supervisors.
#[derive(Clone)]
struct SchedulerCore {
    store: Arc<dyn TaskStore>,
    executor: Arc<PipelineExecutor>,
    config: SchedulerConfig,
    tracked: Arc<Mutex<HashMap<Uuid, TrackedTask>>>,
}

/// Long-lived scheduler over one task store and one pipeline executor.
pub struct TaskScheduler {
    core: SchedulerCore,
    shutdown: broadcast::Sender<()>,
    is_running: Arc<AtomicBool>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskScheduler {
    /// Creates a scheduler. The poll loop does not run until [`start`].
    ///
    /// [`start`]: TaskScheduler::start
    pub fn new(
        store: Arc<dyn TaskStore>,
        executor: Arc<PipelineExecutor>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            core: SchedulerCore {
                store,
                executor,
                config,
                tracked: Arc::new(Mutex::new(HashMap::new())),
            },
            shutdown,
            is_running: Arc::new(AtomicBool::new(false)),
            poll_handle: Mutex::new(None),
        }
    }

    /// Starts the poll loop. Idempotent; a second call is a no-op.
    ///
    /// Before the first poll, `RUNNING` tasks whose last write is older than
    /// the stale threshold are requeued; they were abandoned by a worker
    /// that died mid-run.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Store` when the stale-recovery scan fails;
    /// the scheduler is left stopped in that case.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            debug!("Scheduler already running");
            return Ok(());
        }

        if let Err(e) = self.core.requeue_stale().await {
            self.is_running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let core = self.core.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            debug!("Scheduler poll loop started");
            loop {
                core.poll_once().await;
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(core.config.poll_interval) => {}
                }
            }
            debug!("Scheduler poll loop stopped");
        });
        *self.poll_handle.lock().await = Some(handle);

        info!(
            max_concurrent_tasks = self.core.config.max_concurrent_tasks,
            poll_interval_ms = self.core.config.poll_interval.as_millis() as u64,
            "Scheduler started"
        );
        Ok(())
    }

    /// Stops the poll loop and shuts down gracefully.
    ///
    /// Signals cancellation to every in-flight run and waits up to the
    /// shutdown grace period for them to settle, then returns regardless.
    pub async fn stop(&self) {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Scheduler stopping");
        let _ = self.shutdown.send(());

        let handles: Vec<JoinHandle<()>> = {
            let mut tracked = self.core.tracked.lock().await;
            tracked
                .values_mut()
                .filter_map(|entry| {
                    entry.cancel.trigger();
                    entry.handle.take()
                })
                .collect()
        };

        if !handles.is_empty()
            && timeout(self.core.config.shutdown_grace, join_all(handles))
                .await
                .is_err()
        {
            warn!("Shutdown grace elapsed with runs still in flight");
        }

        if let Some(handle) = self.poll_handle.lock().await.take() {
            let _ = handle.await;
        }
        info!("Scheduler stopped");
    }

    /// Signals cancellation to a supervised run.
    ///
    /// Returns `false` when the task is not currently running here; the
    /// caller handles pending or foreign tasks through the store directly.
    pub async fn cancel_task(&self, id: Uuid) -> bool {
        let tracked = self.core.tracked.lock().await;
        match tracked.get(&id) {
            Some(entry) => {
                entry.cancel.trigger();
                info!(task_id = %id, "Cancellation signalled");
                true
            }
            None => false,
        }
    }

    /// Returns a snapshot of the scheduler state.
    pub async fn status(&self) -> SchedulerStatus {
        let tracked = self.core.tracked.lock().await;
        SchedulerStatus {
            is_running: self.is_running.load(Ordering::SeqCst),
            running_tasks: tracked.len(),
            tracked_task_ids: tracked.keys().copied().collect(),
            max_concurrent_tasks: self.core.config.max_concurrent_tasks,
        }
    }

    /// Flags supervised tasks running longer than twice the expected run
    /// time.
    pub async fn health_check(&self) -> SchedulerHealth {
        let threshold = self.core.config.task_timeout * 2;
        let tracked = self.core.tracked.lock().await;

        let stuck_tasks: Vec<Uuid> = tracked
            .iter()
            .filter(|(_, entry)| entry.started_at.elapsed() > threshold)
            .map(|(id, _)| *id)
            .collect();
        for id in &stuck_tasks {
            warn!(task_id = %id, "Task exceeded twice its expected run time");
        }

        SchedulerHealth {
            healthy: stuck_tasks.is_empty(),
            running_tasks: tracked.len(),
            stuck_tasks,
        }
    }
}

impl SchedulerCore {
    /// Requeues `RUNNING` tasks abandoned by a dead worker.
    async fn requeue_stale(&self) -> Result<(), SchedulerError> {
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::days(3650));
        let cutoff = Utc::now() - stale_after;

        for task in self.store.stale_running(cutoff).await? {
            warn!(
                task_id = %task.id,
                stage = %task.current_stage,
                "Requeueing task abandoned by a dead worker"
            );
            if let Err(e) = self
                .store
                .requeue(task.id, task.retry_count, "requeued after stale recovery")
                .await
            {
                warn!(task_id = %task.id, error = %e, "Stale requeue failed");
            }
        }
        Ok(())
    }

    /// One poll: claim pending tasks up to the free capacity.
    async fn poll_once(&self) {
        let free_slots = {
            let tracked = self.tracked.lock().await;
            self.config.max_concurrent_tasks.saturating_sub(tracked.len())
        };
        if free_slots == 0 {
            return;
        }

        let pending = match self.store.oldest_pending(free_slots).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Backlog poll failed");
                return;
            }
        };

        for task in pending {
            match self.store.claim(task.id).await {
                Ok(true) => self.launch(task.id).await,
                Ok(false) => debug!(task_id = %task.id, "Lost claim race, skipping"),
                Err(e) => warn!(task_id = %task.id, error = %e, "Claim failed"),
            }
        }
    }

    /// Spawns and supervises one claimed run.
    async fn launch(&self, id: Uuid) {
        let task = match self.store.get(id).await {
            Ok(task) => task,
            Err(e) => {
                warn!(task_id = %id, error = %e, "Claimed task could not be loaded");
                return;
            }
        };
        let retry_count = task.retry_count;

        let cancel = CancelSignal::new();
        {
            let mut tracked = self.tracked.lock().await;
            tracked.insert(
                id,
                TrackedTask {
                    cancel: cancel.clone(),
                    started_at: Instant::now(),
                    handle: None,
                },
            );
        }

        let core = self.clone();
        let handle = tokio::spawn(async move {
            let run = {
                let executor = Arc::clone(&core.executor);
                let cancel = cancel.clone();
                tokio::spawn(async move { executor.execute(task, cancel).await })
            };

            let result = match run.await {
                Ok(result) => result,
                Err(e) => {
                    // A panicking run must not wedge the slot; classified
                    // transient so the task gets another chance.
                    error!(task_id = %id, error = %e, "Pipeline task aborted");
                    Err(PipelineError::Collaborator {
                        stage: "execute",
                        source: CollaboratorError::Unavailable(format!(
                            "pipeline task aborted: {}",
                            e
                        )),
                    })
                }
            };

            // Free the slot before any backoff sleep.
            core.tracked.lock().await.remove(&id);
            core.settle(id, retry_count, result).await;
        });

        if let Some(entry) = self.tracked.lock().await.get_mut(&id) {
            entry.handle = Some(handle);
        }
        info!(task_id = %id, retry_count, "Task launched");
    }

    /// Applies the retry/fail policy to one finished run.
    async fn settle(
        &self,
        id: Uuid,
        retry_count: u32,
        result: Result<ExecutionOutcome, PipelineError>,
    ) {
        match result {
            Ok(ExecutionOutcome::Completed { leads }) => {
                info!(task_id = %id, leads = leads.len(), "Task completed");
            }
            Ok(ExecutionOutcome::Cancelled) => {
                info!(task_id = %id, "Task cancelled");
            }
            Err(e) if e.is_transient() && retry_count < self.config.max_retries => {
                let delay = self.config.backoff_delay(retry_count);
                warn!(
                    task_id = %id,
                    stage = e.stage(),
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, requeueing after backoff"
                );
                tokio::time::sleep(delay).await;

                match self.store.requeue(id, retry_count + 1, &e.to_string()).await {
                    Ok(()) => {}
                    // Cancellation raced with the backoff window.
                    Err(StoreError::InvalidTransition { .. }) => {
                        debug!(task_id = %id, "Requeue skipped, task already terminal")
                    }
                    Err(store_err) => {
                        warn!(task_id = %id, error = %store_err, "Requeue failed")
                    }
                }
            }
            Err(e) => {
                warn!(
                    task_id = %id,
                    stage = e.stage(),
                    error = %e,
                    transient = e.is_transient(),
                    "Task failed"
                );
                match self.store.fail(id, &e.to_string()).await {
                    Ok(()) => {}
                    Err(StoreError::InvalidTransition { .. }) => {
                        debug!(task_id = %id, "Fail skipped, task already terminal")
                    }
                    Err(store_err) => {
                        warn!(task_id = %id, error = %store_err, "Failure write failed")
                    }
                }
            }
        }
    }
}
