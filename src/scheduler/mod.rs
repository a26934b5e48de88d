//! Task scheduling.
//!
//! The scheduler is the only component that moves tasks from `PENDING` to
//! `RUNNING`, via the store's atomic claim. It owns the retry/fail policy
//! and relays cancellation to running pipelines.

pub mod config;
pub mod worker;

pub use config::{ConfigError, SchedulerConfig};
pub use worker::{SchedulerError, SchedulerHealth, SchedulerStatus, TaskScheduler};
