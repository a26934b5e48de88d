//! Progress reporting and fan-out.
//!
//! Every stage boundary writes `{stage, current, total, message}` onto the
//! task record and emits the same payload on a broadcast channel, so UI
//! subscribers see progress as it is persisted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::TaskStore;
use crate::task::Progress;

/// Default capacity of the progress broadcast channel.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// One progress update, as written to the task record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Task the update belongs to.
    pub task_id: Uuid,
    /// Stage name.
    pub stage: String,
    /// Completed stage count.
    pub current: u32,
    /// Total observable stages.
    pub total: u32,
    /// Human-readable status line.
    pub message: String,
}

/// Fan-out channel for progress events.
///
/// Cloning shares the underlying channel. Sending is lossy by design: with
/// no subscribers, or with a lagging subscriber, events are dropped rather
/// than blocking the pipeline.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    tx: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ProgressBroadcaster {
    /// Creates a broadcaster with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribes to all future progress events.
    pub fn subscribe(&self) -> BroadcastStream<ProgressEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Emits one event. Dropped silently when nobody is listening.
    pub fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            debug!("No progress subscribers, event dropped");
        }
    }
}

/// Per-task progress writer used by every stage.
pub struct ProgressReporter {
    store: Arc<dyn TaskStore>,
    events: ProgressBroadcaster,
    task_id: Uuid,
    total: u32,
}

impl ProgressReporter {
    /// Creates a reporter for one task run.
    pub fn new(
        store: Arc<dyn TaskStore>,
        events: ProgressBroadcaster,
        task_id: Uuid,
        total: u32,
    ) -> Self {
        Self {
            store,
            events,
            task_id,
            total,
        }
    }

    /// Records that a stage has begun, without advancing the counter.
    ///
    /// Keeps `current_stage` pointing at the stage a failure would surface
    /// in, while `current` still counts completed stages only.
    pub async fn stage_started(&self, stage: &str, completed: u32) {
        self.write(stage, completed, format!("{} started", stage))
            .await;
    }

    /// Records a completed stage boundary.
    pub async fn stage_completed(&self, stage: &str, completed: u32, message: impl Into<String>) {
        self.write(stage, completed, message.into()).await;
    }

    async fn write(&self, stage: &str, current: u32, message: String) {
        let progress = Progress::new(current, self.total, message.clone());

        // A failed progress write must not fail the pipeline; the next
        // boundary will overwrite it anyway.
        if let Err(e) = self
            .store
            .update_progress(self.task_id, stage, progress)
            .await
        {
            warn!(task_id = %self.task_id, stage = %stage, error = %e, "Failed to persist progress");
        }

        self.events.emit(ProgressEvent {
            task_id: self.task_id,
            stage: stage.to_string(),
            current: current.min(self.total),
            total: self.total,
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use tokio_stream::StreamExt;

    use crate::store::MemoryTaskStore;
    use crate::task::{Task, TaskInput};

    use super::*;

    #[tokio::test]
    async fn test_reporter_persists_and_broadcasts() {
        let store = Arc::new(MemoryTaskStore::new());
        let events = ProgressBroadcaster::default();
        let task = Task::new("user-1", TaskInput::ai_search("gymnastics clubs UAE"));
        let id = task.id;
        store.insert(task).await.expect("insert should work");

        let mut stream = events.subscribe();
        let reporter = ProgressReporter::new(store.clone() as Arc<dyn TaskStore>, events, id, 7);

        reporter
            .stage_completed("query_generation", 1, "generated 3 queries")
            .await;

        let fetched = store.get(id).await.expect("get should work");
        assert_eq!(fetched.current_stage, "query_generation");
        assert_eq!(fetched.progress.current, 1);
        assert_eq!(fetched.progress.total, 7);

        let event = stream
            .next()
            .await
            .expect("event should arrive")
            .expect("stream should not lag");
        assert_eq!(event.task_id, id);
        assert_eq!(event.stage, "query_generation");
        assert_eq!(event.message, "generated 3 queries");
    }

    #[tokio::test]
    async fn test_stage_started_does_not_advance_counter() {
        let store = Arc::new(MemoryTaskStore::new());
        let events = ProgressBroadcaster::default();
        let task = Task::new("user-1", TaskInput::ai_search("gymnastics clubs UAE"));
        let id = task.id;
        store.insert(task).await.expect("insert should work");

        let reporter = ProgressReporter::new(store.clone() as Arc<dyn TaskStore>, events, id, 7);
        reporter.stage_started("search", 1).await;

        let fetched = store.get(id).await.expect("get should work");
        assert_eq!(fetched.current_stage, "search");
        assert_eq!(fetched.progress.current, 1);
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let events = ProgressBroadcaster::default();
        assert_eq!(events.subscriber_count(), 0);

        // Must not panic or error.
        events.emit(ProgressEvent {
            task_id: Uuid::new_v4(),
            stage: "search".to_string(),
            current: 2,
            total: 7,
            message: "searching".to_string(),
        });
    }
}
