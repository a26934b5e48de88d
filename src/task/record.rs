//! Persisted task record and its lifecycle types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::lead::{Lead, QueryVariant};

/// Number of observable stages in the AI search pipeline.
pub const AI_SEARCH_STAGES: u32 = 7;

/// Number of observable stages in the URL parse pipeline.
pub const URL_PARSE_STAGES: u32 = 3;

/// Default number of query variants requested from the generator.
pub const DEFAULT_MAX_QUERIES: usize = 3;

/// Lifecycle status of a task.
///
/// Exactly one non-terminal status applies at a time; terminal statuses are
/// final and the store rejects any write past them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed by the scheduler.
    Pending,
    /// Claimed and owned by exactly one pipeline executor.
    Running,
    /// Finished successfully; `final_result` is set.
    Completed,
    /// Finished with a classified-permanent error or exhausted retries.
    Failed,
    /// Cancelled before reaching the finalize stage.
    Cancelled,
}

impl TaskStatus {
    /// Returns whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Returns whether a transition to `next` is legal.
    ///
    /// `Running -> Pending` is permitted only as a transient-retry or
    /// stale-recovery requeue.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::Running) => true,
            (TaskStatus::Pending, TaskStatus::Cancelled) => true,
            (TaskStatus::Running, TaskStatus::Completed) => true,
            (TaskStatus::Running, TaskStatus::Failed) => true,
            (TaskStatus::Running, TaskStatus::Cancelled) => true,
            (TaskStatus::Running, TaskStatus::Pending) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Kind of pipeline a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Query generation, batched search, aggregation, enrichment,
    /// filtering, scoring, finalize (7 stages).
    AiSearch,
    /// Validate a single URL, enrich it directly, finalize (3 stages).
    UrlParse,
}

impl TaskKind {
    /// Total observable stage count for progress reporting.
    pub fn stage_total(&self) -> u32 {
        match self {
            TaskKind::AiSearch => AI_SEARCH_STAGES,
            TaskKind::UrlParse => URL_PARSE_STAGES,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::AiSearch => write!(f, "ai_search"),
            TaskKind::UrlParse => write!(f, "url_parse"),
        }
    }
}

/// Kind-specific task payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskInput {
    /// Free-text query with locale hints.
    AiSearch {
        /// The user's free-text search input.
        query: String,
        /// Optional location bias (e.g. "Dubai, UAE").
        #[serde(default)]
        location: Option<String>,
        /// Languages the generator should produce variants for.
        #[serde(default)]
        languages: Vec<String>,
        /// Hard cap on the number of query variants used downstream.
        max_queries: usize,
    },
    /// A single target URL to enrich directly.
    UrlParse {
        /// The URL to parse.
        url: String,
    },
}

impl TaskInput {
    /// Creates an AI search input with default language hints and cap.
    pub fn ai_search(query: impl Into<String>) -> Self {
        TaskInput::AiSearch {
            query: query.into(),
            location: None,
            languages: vec!["en".to_string()],
            max_queries: DEFAULT_MAX_QUERIES,
        }
    }

    /// Creates a URL parse input.
    pub fn url_parse(url: impl Into<String>) -> Self {
        TaskInput::UrlParse { url: url.into() }
    }

    /// Returns the pipeline kind this input selects.
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskInput::AiSearch { .. } => TaskKind::AiSearch,
            TaskInput::UrlParse { .. } => TaskKind::UrlParse,
        }
    }
}

/// Stage progress written after every stage boundary.
///
/// Invariant: `current <= total`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    /// Completed stage count.
    pub current: u32,
    /// Total observable stages for this task kind.
    pub total: u32,
    /// Human-readable status line.
    pub message: String,
}

impl Progress {
    /// Creates a new progress value, clamping `current` to `total`.
    pub fn new(current: u32, total: u32, message: impl Into<String>) -> Self {
        Self {
            current: current.min(total),
            total,
            message: message.into(),
        }
    }

    /// Initial progress for a freshly created task.
    pub fn queued(total: u32) -> Self {
        Self::new(0, total, "queued")
    }
}

/// Stage outputs needed by later stages, owned exclusively by the executor
/// while the task is running.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IntermediateData {
    /// Deduplicated query variants produced by query generation.
    #[serde(default)]
    pub queries: Vec<QueryVariant>,
    /// Raw leads collected by the search stage, pre-aggregation.
    #[serde(default)]
    pub raw_leads: Vec<Lead>,
}

/// One persisted task record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, generated at creation.
    pub id: Uuid,
    /// Identifier of the requesting user; all queries are scoped to it.
    pub owner_id: String,
    /// Which pipeline this task runs.
    pub kind: TaskKind,
    /// Kind-specific payload.
    pub input: TaskInput,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Human-readable stage name, monotonic within a run.
    pub current_stage: String,
    /// Stage progress.
    pub progress: Progress,
    /// Stage outputs for later stages, present only while running.
    #[serde(default)]
    pub intermediate: Option<IntermediateData>,
    /// Terminal output, set once when the task completes.
    #[serde(default)]
    pub final_result: Option<Vec<Lead>>,
    /// Failure surface; every `Failed` task carries a non-empty message.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Number of transient-retry requeues so far.
    pub retry_count: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last write timestamp.
    pub updated_at: DateTime<Utc>,
    /// Timestamp of the terminal transition, if any.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates a new pending task for the given owner.
    pub fn new(owner_id: impl Into<String>, input: TaskInput) -> Self {
        let kind = input.kind();
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            kind,
            input,
            status: TaskStatus::Pending,
            current_stage: "queued".to_string(),
            progress: Progress::queued(kind.stage_total()),
            intermediate: None,
            final_result: None,
            error_message: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Returns whether the task has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
