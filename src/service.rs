//! User-facing task service.
//!
//! The thin surface callers go through: create a task, read it back, list
//! active work, cancel, and subscribe to progress. All reads are scoped to
//! the owner; a foreign task is indistinguishable from a missing one.
//!
//! The service never executes tasks. Creation only inserts a `PENDING`
//! record; the scheduler's atomic claim is the sole entry point into
//! execution.

use std::sync::Arc;

use thiserror::Error;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;
use uuid::Uuid;

use crate::pipeline::{ProgressBroadcaster, ProgressEvent};
use crate::scheduler::{SchedulerHealth, SchedulerStatus, TaskScheduler};
use crate::store::{StoreError, TaskStore};
use crate::task::{Task, TaskInput};

/// Errors that can occur during service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The submitted task payload is unusable.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// User-facing handle over the store, scheduler and progress channel.
pub struct TaskService {
    store: Arc<dyn TaskStore>,
    scheduler: Arc<TaskScheduler>,
    events: ProgressBroadcaster,
}

impl TaskService {
    /// Creates a service. `events` must be the same broadcaster the
    /// pipeline executor emits on, or subscribers will see nothing.
    pub fn new(
        store: Arc<dyn TaskStore>,
        scheduler: Arc<TaskScheduler>,
        events: ProgressBroadcaster,
    ) -> Self {
        Self {
            store,
            scheduler,
            events,
        }
    }

    /// Creates a new `PENDING` task and returns its record.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::InvalidInput` when the payload fails
    /// validation, or a store error when the insert fails.
    pub async fn create_task(
        &self,
        owner_id: &str,
        input: TaskInput,
    ) -> Result<Task, ServiceError> {
        validate_input(&input)?;

        let task = Task::new(owner_id, input);
        self.store.insert(task.clone()).await?;
        info!(task_id = %task.id, owner_id = %owner_id, kind = %task.kind, "Task created");
        Ok(task)
    }

    /// Fetches one of the owner's tasks.
    pub async fn get_task(&self, owner_id: &str, id: Uuid) -> Result<Task, ServiceError> {
        let task = self.store.get(id).await?;
        if task.owner_id != owner_id {
            return Err(StoreError::TaskNotFound(id).into());
        }
        Ok(task)
    }

    /// Lists the owner's non-terminal tasks, oldest first.
    pub async fn list_active_tasks(&self, owner_id: &str) -> Result<Vec<Task>, ServiceError> {
        Ok(self.store.list_active(owner_id).await?)
    }

    /// Cancels one of the owner's non-terminal tasks.
    ///
    /// A running task is signalled cooperatively and stops at its next
    /// stage boundary; the terminal status is written here regardless, so
    /// the caller sees `CANCELLED` immediately.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidTransition` when the task is already
    /// terminal.
    pub async fn cancel_task(&self, owner_id: &str, id: Uuid) -> Result<Task, ServiceError> {
        // Ownership check before anything observable happens.
        self.get_task(owner_id, id).await?;

        let signalled = self.scheduler.cancel_task(id).await;
        let cancelled = self.store.cancel(id).await?;
        info!(task_id = %id, owner_id = %owner_id, signalled, "Task cancelled");
        Ok(cancelled)
    }

    /// Subscribes to progress events for all tasks.
    ///
    /// The channel is lossy under lag; consumers needing an authoritative
    /// view read the task record instead.
    pub fn subscribe(&self) -> BroadcastStream<ProgressEvent> {
        self.events.subscribe()
    }

    /// Returns the scheduler's state snapshot.
    pub async fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status().await
    }

    /// Runs the scheduler health check.
    pub async fn health(&self) -> SchedulerHealth {
        self.scheduler.health_check().await
    }
}

fn validate_input(input: &TaskInput) -> Result<(), ServiceError> {
    match input {
        TaskInput::AiSearch {
            query, max_queries, ..
        } => {
            if query.trim().is_empty() {
                return Err(ServiceError::InvalidInput(
                    "query must not be empty".to_string(),
                ));
            }
            if *max_queries == 0 {
                return Err(ServiceError::InvalidInput(
                    "max_queries must be at least 1".to_string(),
                ));
            }
        }
        TaskInput::UrlParse { url } => {
            if url.trim().is_empty() {
                return Err(ServiceError::InvalidInput(
                    "url must not be empty".to_string(),
                ));
            }
        }
    }
    Ok(())
}
