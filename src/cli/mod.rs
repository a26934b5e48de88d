//! Command-line interface for leadforge.
//!
//! Provides demo commands that run the engine end to end over the bundled
//! offline collaborators.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
