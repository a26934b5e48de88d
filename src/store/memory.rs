//! In-process task store.
//!
//! Backed by a `tokio::sync::RwLock<HashMap>`. All conditional updates run
//! under the write lock, which makes `claim` a true compare-and-swap: two
//! concurrent claims on the same pending task serialize on the lock and
//! exactly one observes `PENDING`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::task::{IntermediateData, Lead, Progress, Task, TaskStatus};

use super::{StoreError, TaskStore};

/// In-memory implementation of [`TaskStore`].
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl MemoryTaskStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a legal status transition under the write lock.
    ///
    /// Rejects writes to terminal tasks and transitions the state machine
    /// does not allow.
    async fn transition<F>(&self, id: Uuid, to: TaskStatus, apply: F) -> Result<Task, StoreError>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;

        if !task.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                from: task.status,
                to,
            });
        }

        task.status = to;
        task.updated_at = Utc::now();
        if to.is_terminal() {
            task.completed_at = Some(task.updated_at);
        }
        apply(task);

        Ok(task.clone())
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::DuplicateTask(task.id));
        }
        tasks.insert(task.id, task);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Task, StoreError> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::TaskNotFound(id))
    }

    async fn oldest_pending(&self, limit: usize) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        let mut pending: Vec<Task> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn claim(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;

        if task.status != TaskStatus::Pending {
            return Ok(false);
        }

        task.status = TaskStatus::Running;
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_progress(
        &self,
        id: Uuid,
        stage: &str,
        progress: Progress,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;

        // Progress writes race with cancellation; a write landing after the
        // terminal transition is dropped, not an error.
        if task.is_terminal() {
            return Ok(());
        }

        task.current_stage = stage.to_string();
        task.progress = progress;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn save_intermediate(&self, id: Uuid, data: IntermediateData) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;

        if task.is_terminal() {
            return Ok(());
        }

        task.intermediate = Some(data);
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn complete(&self, id: Uuid, result: Vec<Lead>) -> Result<(), StoreError> {
        self.transition(id, TaskStatus::Completed, |task| {
            task.final_result = Some(result);
            task.intermediate = None;
        })
        .await?;
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        let message = if error.is_empty() {
            // Every failed task carries a non-empty failure surface.
            "unknown error".to_string()
        } else {
            error.to_string()
        };

        self.transition(id, TaskStatus::Failed, |task| {
            task.error_message = Some(message);
        })
        .await?;
        Ok(())
    }

    async fn cancel(&self, id: Uuid) -> Result<Task, StoreError> {
        self.transition(id, TaskStatus::Cancelled, |_| {}).await
    }

    async fn requeue(&self, id: Uuid, retry_count: u32, reason: &str) -> Result<(), StoreError> {
        let reason = reason.to_string();
        self.transition(id, TaskStatus::Pending, move |task| {
            task.retry_count = retry_count;
            task.error_message = Some(reason);
            task.intermediate = None;
        })
        .await?;
        Ok(())
    }

    async fn list_active(&self, owner_id: &str) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        let mut active: Vec<Task> = tasks
            .values()
            .filter(|t| t.owner_id == owner_id && !t.is_terminal())
            .cloned()
            .collect();
        active.sort_by_key(|t| t.created_at);
        Ok(active)
    }

    async fn stale_running(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        let mut stale: Vec<Task> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running && t.updated_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|t| t.updated_at);
        Ok(stale)
    }
}
