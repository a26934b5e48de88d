//! Task data model.
//!
//! This module defines the persisted record types of the engine:
//!
//! - `Task`: one user-submitted, independently schedulable unit of work
//! - `TaskStatus`: lifecycle state machine with terminal-state rules
//! - `TaskInput` / `TaskKind`: kind-specific payloads selecting a pipeline
//! - `Progress`: the `{current, total, message}` structure written after
//!   every stage boundary
//! - `Lead`: one collected result item
//! - `QueryVariant`: one localized query produced by query generation

pub mod lead;
pub mod record;

// Re-export main types for convenience
pub use lead::{Lead, QueryVariant};
pub use record::{IntermediateData, Progress, Task, TaskInput, TaskKind, TaskStatus};
