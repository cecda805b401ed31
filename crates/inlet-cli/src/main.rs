mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "inlet",
    version,
    about = "Incremental watermark-driven pull engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan work items for a job and print them without pulling
    Plan {
        /// Path to job YAML file
        job: PathBuf,
        /// Ignore prior watermark state (back-fill preview)
        #[arg(long)]
        ignore_state: bool,
    },
    /// Validate a job configuration file
    Check {
        /// Path to job YAML file
        job: PathBuf,
    },
}

/// Logs go to stderr so `plan` output on stdout stays pipeable. An
/// explicit `RUST_LOG` spec wins over `--log-level`.
fn init_logging(level: &str) {
    let filter = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .and_then(|spec| spec.parse::<EnvFilter>().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Commands::Plan { job, ignore_state } => commands::plan::execute(&job, ignore_state).await,
        Commands::Check { job } => commands::check::execute(&job),
    }
}
