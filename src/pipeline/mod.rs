//! Pipeline execution.
//!
//! A claimed task runs through a fixed stage sequence:
//!
//! - **AI search** (7 stages): query generation, batched search,
//!   aggregation, enrichment, contact filtering, scoring, finalize
//! - **URL parse** (3 stages): initialize, enrichment, finalize
//!
//! Every stage boundary persists progress and emits it on a broadcast
//! channel. Failures are classified transient or permanent and returned to
//! the scheduler, which owns the retry/fail decision.

pub mod config;
pub mod executor;
pub mod progress;
pub mod stages;
pub mod strategy;

pub use config::{ConfigError, PipelineConfig, DEFAULT_EMAIL_BLOCKLIST};
pub use executor::{CancelSignal, ExecutionOutcome, PipelineError, PipelineExecutor};
pub use progress::{ProgressBroadcaster, ProgressEvent, ProgressReporter};
pub use strategy::{run_search, SearchBatch, SearchStrategy};
