//! taskhost CLI - Main entry point

mod cli;
mod demo;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use taskhost_foundation::RuntimeConfig;
use taskhost_task::log_sink::{console_filter, TaskLogLayer};
use taskhost_task::TaskRegistry;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// taskhost - run many small tasks inside one process
#[derive(Parser, Debug)]
#[command(name = "taskhost")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Runtime config file (defaults to <config dir>/taskhost/taskhost.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding one sub-directory per task
    #[arg(long, global = true)]
    tasks_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List loaded tasks
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start tasks and follow their output
    Run {
        /// Task ids; auto-start tasks when omitted
        ids: Vec<String>,

        /// Start every loaded task
        #[arg(short, long, conflicts_with = "ids")]
        all: bool,

        /// Also register the built-in ticker and greeter tasks
        #[arg(long)]
        demo: bool,
    },
    /// Reload a task from its descriptor
    Update {
        id: String,
    },
    /// Stop a task and delete its directory and saved settings
    Uninstall {
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => RuntimeConfig::default_path()?,
    };
    let mut config = RuntimeConfig::load_or_default(&config_path)?;
    if let Some(dir) = &args.tasks_dir {
        config = config.with_tasks_dir(dir);
    }

    // Initialize logging
    let log_level = if args.debug {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_filter(console_filter()),
        )
        .with(TaskLogLayer::from_config(&config.logging))
        .init();
    tracing::debug!("Using config {}", config_path.display());

    let registry = TaskRegistry::from_config(config, demo::catalog())?;
    let report = registry.load().await?;
    cli::report_load(&report);

    match args.command {
        Command::List { json } => cli::list(&registry, json).await,
        Command::Run { ids, all, demo } => cli::run(&registry, ids, all, demo).await,
        Command::Update { id } => cli::update(&registry, &id).await,
        Command::Uninstall { id } => cli::uninstall(&registry, &id).await,
    }
}
