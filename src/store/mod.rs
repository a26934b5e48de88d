//! Durable task store contract.
//!
//! The engine treats persistence as an external collaborator: a durable,
//! queryable record store with atomic conditional updates. `TaskStore`
//! captures exactly the operations the scheduler and pipeline need:
//!
//! - `claim` is the single atomic `PENDING -> RUNNING` compare-and-swap.
//!   It is the only legal way to begin executing a task, which is what
//!   prevents double execution when several actors observe the same
//!   pending backlog.
//! - The targeted mutators (`update_progress`, `complete`, `fail`,
//!   `cancel`, `requeue`) enforce the status state machine; terminal
//!   statuses are final and any write past them is rejected.
//!
//! `MemoryTaskStore` is the bundled in-process implementation, used by the
//! demo binary and the test suite.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::task::{IntermediateData, Lead, Progress, Task, TaskStatus};

pub use memory::MemoryTaskStore;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists for the given task id.
    #[error("Task {0} not found")]
    TaskNotFound(Uuid),

    /// The requested status transition is illegal.
    #[error("Invalid status transition from '{from}' to '{to}'")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    /// A record with this id already exists.
    #[error("Task {0} already exists")]
    DuplicateTask(Uuid),

    /// The backing store is unreachable or failed internally.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns whether the failure is transient (retryable).
    ///
    /// Connectivity failures are retryable; missing records and illegal
    /// transitions are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Durable, queryable record store for tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts a new task record.
    async fn insert(&self, task: Task) -> Result<(), StoreError>;

    /// Fetches one task by id.
    async fn get(&self, id: Uuid) -> Result<Task, StoreError>;

    /// Returns up to `limit` pending tasks, oldest first, across all owners.
    async fn oldest_pending(&self, limit: usize) -> Result<Vec<Task>, StoreError>;

    /// Atomically transitions `PENDING -> RUNNING`.
    ///
    /// Returns `true` if this caller won the claim, `false` if the task was
    /// no longer pending (already claimed, cancelled or missing race-wise
    /// irrelevant here means the caller simply skips it).
    async fn claim(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Writes the current stage and progress of a running task.
    async fn update_progress(
        &self,
        id: Uuid,
        stage: &str,
        progress: Progress,
    ) -> Result<(), StoreError>;

    /// Persists stage outputs needed by later stages.
    async fn save_intermediate(&self, id: Uuid, data: IntermediateData) -> Result<(), StoreError>;

    /// Transitions `RUNNING -> COMPLETED` and sets the final result.
    async fn complete(&self, id: Uuid, result: Vec<Lead>) -> Result<(), StoreError>;

    /// Transitions to `FAILED` with a non-empty error message.
    async fn fail(&self, id: Uuid, error: &str) -> Result<(), StoreError>;

    /// Transitions a non-terminal task to `CANCELLED` and returns the
    /// updated record.
    async fn cancel(&self, id: Uuid) -> Result<Task, StoreError>;

    /// Transitions `RUNNING -> PENDING` for a transient retry, recording
    /// the new retry count and the reason for the requeue.
    async fn requeue(&self, id: Uuid, retry_count: u32, reason: &str) -> Result<(), StoreError>;

    /// Lists a user's non-terminal tasks, oldest first.
    async fn list_active(&self, owner_id: &str) -> Result<Vec<Task>, StoreError>;

    /// Returns tasks left `RUNNING` whose last write is older than `cutoff`,
    /// typically left behind by a crashed worker.
    async fn stale_running(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>, StoreError>;
}
