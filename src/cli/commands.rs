//! CLI command definitions for leadforge.
//!
//! Both commands submit one task to an in-process engine wired to the
//! offline fixture collaborators, stream its progress to stdout and print
//! the collected leads as JSON.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_stream::StreamExt;
use tracing::info;

use crate::collaborators::fixture::{
    FixedCapacity, FixtureEnricher, FixtureQueryGenerator, FixtureSearchProvider,
};
use crate::pipeline::{PipelineConfig, PipelineExecutor, ProgressBroadcaster};
use crate::scheduler::{SchedulerConfig, TaskScheduler};
use crate::service::TaskService;
use crate::store::{MemoryTaskStore, TaskStore};
use crate::task::{TaskInput, TaskStatus};

/// Default owner id used by the demo commands.
const DEFAULT_OWNER: &str = "demo-user";

/// Lead-collection task engine.
#[derive(Parser)]
#[command(name = "leadforge")]
#[command(about = "Run lead-collection pipelines over the offline demo collaborators")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run an AI search task: query generation, batched search, aggregation,
    /// enrichment, filtering and scoring.
    Search(SearchArgs),

    /// Run a URL parse task: enrich a single URL directly.
    Parse(ParseArgs),
}

/// Arguments for `leadforge search`.
#[derive(Parser, Debug)]
pub struct SearchArgs {
    /// Free-text search input, e.g. "gymnastics clubs UAE".
    pub query: String,

    /// Location bias, e.g. "Dubai, UAE".
    #[arg(short = 'l', long)]
    pub location: Option<String>,

    /// Comma-separated language codes for query variants.
    #[arg(long, default_value = "en")]
    pub languages: String,

    /// Maximum number of query variants used downstream.
    #[arg(long, default_value = "3")]
    pub max_queries: usize,

    /// Owner id the task is created under.
    #[arg(long, default_value = DEFAULT_OWNER)]
    pub owner: String,
}

/// Arguments for `leadforge parse`.
#[derive(Parser, Debug)]
pub struct ParseArgs {
    /// The URL to parse, e.g. "https://example.ae".
    pub url: String,

    /// Owner id the task is created under.
    #[arg(long, default_value = DEFAULT_OWNER)]
    pub owner: String,
}

/// Parses CLI arguments from the process environment.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the parsed CLI command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Search(args) => {
            let input = TaskInput::AiSearch {
                query: args.query,
                location: args.location,
                languages: args
                    .languages
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                max_queries: args.max_queries,
            };
            run_task(&args.owner, input).await
        }
        Commands::Parse(args) => run_task(&args.owner, TaskInput::url_parse(args.url)).await,
    }
}

/// Submits one task to an in-process engine and waits for it to settle.
async fn run_task(owner: &str, input: TaskInput) -> anyhow::Result<()> {
    let store = Arc::new(MemoryTaskStore::new());
    let events = ProgressBroadcaster::default();

    let executor = Arc::new(PipelineExecutor::new(
        store.clone() as Arc<dyn TaskStore>,
        Arc::new(FixtureQueryGenerator::new()),
        Arc::new(FixtureSearchProvider::default()),
        Arc::new(FixtureEnricher::new()),
        Arc::new(FixedCapacity::new(4, Duration::from_secs(30))),
        events.clone(),
        PipelineConfig::from_env()?,
    ));
    let scheduler = Arc::new(TaskScheduler::new(
        store.clone() as Arc<dyn TaskStore>,
        executor,
        SchedulerConfig::from_env()?.with_poll_interval(Duration::from_millis(100)),
    ));
    let service = TaskService::new(store as Arc<dyn TaskStore>, scheduler.clone(), events);

    let mut progress = service.subscribe();
    let task = service.create_task(owner, input).await?;
    let id = task.id;
    info!(task_id = %id, kind = %task.kind, "Task submitted");

    scheduler.start().await?;

    let printer = tokio::spawn(async move {
        while let Some(event) = progress.next().await {
            if let Ok(event) = event {
                if event.task_id == id {
                    println!(
                        "[{}/{}] {}: {}",
                        event.current, event.total, event.stage, event.message
                    );
                }
            }
        }
    });

    let done = loop {
        let task = service.get_task(owner, id).await?;
        if task.is_terminal() {
            break task;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    scheduler.stop().await;
    printer.abort();

    match done.status {
        TaskStatus::Completed => {
            let leads = done.final_result.unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&leads)?);
            println!("collected {} leads", leads.len());
            Ok(())
        }
        TaskStatus::Cancelled => {
            println!("task cancelled");
            Ok(())
        }
        _ => anyhow::bail!(
            "task failed at stage '{}': {}",
            done.current_stage,
            done.error_message.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}
