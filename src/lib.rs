//! leadforge: task scheduling and pipeline execution engine for long-lived
//! lead-collection jobs.
//!
//! Tasks move through a strict lifecycle (`PENDING -> RUNNING -> terminal`)
//! owned by the store's state machine. The scheduler claims pending tasks
//! with an atomic compare-and-swap and supervises each run; the pipeline
//! executor drives the stage sequence against abstract collaborator traits,
//! reporting progress after every boundary.

// Core modules
pub mod cli;
pub mod collaborators;
pub mod pipeline;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod task;

// Re-export the types most callers need
pub use pipeline::{
    CancelSignal, ExecutionOutcome, PipelineConfig, PipelineError, PipelineExecutor,
    ProgressBroadcaster, ProgressEvent,
};
pub use scheduler::{SchedulerConfig, SchedulerError, TaskScheduler};
pub use service::{ServiceError, TaskService};
pub use store::{MemoryTaskStore, StoreError, TaskStore};
pub use task::{Lead, Progress, QueryVariant, Task, TaskInput, TaskKind, TaskStatus};
