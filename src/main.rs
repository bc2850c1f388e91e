use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use housing_pipeline::config::{PipelineConfig, default_config_path};
use housing_pipeline::logging::{self, LOG_DIR_NAME, LogOptions};

mod cmd;

#[derive(Parser)]
#[command(name = "housing-pipeline")]
#[command(version, about = "Train a house price regression model through a staged pipeline")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Project root holding config/, artifacts and saved models
    #[arg(long, global = true, env = "HOUSING_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,

    /// Path to pipeline.toml (defaults to <project-dir>/config/pipeline.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP API for triggering and observing runs
    Serve {
        /// Port to serve on
        #[arg(short, long, default_value = "3141")]
        port: u16,

        /// Enable dev mode (permissive CORS, bind all interfaces)
        #[arg(long)]
        dev: bool,
    },
    /// Run the pipeline once in the foreground
    Train,
    /// Show recent experiments
    Status {
        /// Number of experiments to show
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// Only show finished runs
        #[arg(long)]
        completed: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// View or initialise configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the resolved configuration
    Show,
    /// Write a default pipeline.toml and schema.json
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
}

/// Log file prefix for long-running commands, e.g. `housing.log`.
fn log_file_prefix(config_path: &std::path::Path) -> String {
    let name = PipelineConfig::load_or_default(config_path)
        .map(|c| c.training_pipeline.pipeline_name)
        .unwrap_or_else(|_| PipelineConfig::default().training_pipeline.pipeline_name);
    format!("{name}.log")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| default_config_path(&project_dir));

    let writes_log_file = matches!(cli.command, Commands::Serve { .. } | Commands::Train);
    let _log_guard = logging::init(&LogOptions {
        verbose: cli.verbose,
        json: cli.json_logs,
        log_dir: writes_log_file.then(|| project_dir.join(LOG_DIR_NAME)),
        file_prefix: log_file_prefix(&config_path),
    })?;

    match &cli.command {
        Commands::Serve { port, dev } => {
            cmd::cmd_serve(&project_dir, &config_path, *port, *dev).await?;
        }
        Commands::Train => cmd::cmd_train(&project_dir, &config_path).await?,
        Commands::Status {
            limit,
            completed,
            json,
        } => cmd::cmd_status(&project_dir, &config_path, *limit, *completed, *json)?,
        Commands::Config { command } => {
            cmd::cmd_config(&project_dir, &config_path, command.clone())?
        }
    }

    Ok(())
}
