//! Configuration view and initialisation: `housing-pipeline config`.

use std::path::Path;

use anyhow::{Context, Result, bail};

use housing_pipeline::config::{PipelineConfig, RunConfig, current_time_stamp};
use housing_pipeline::stages::Schema;

use super::super::ConfigCommands;

pub fn cmd_config(
    project_dir: &Path,
    config_path: &Path,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => show(project_dir, config_path),
        Some(ConfigCommands::Init { force }) => init(project_dir, config_path, force),
    }
}

fn show(project_dir: &Path, config_path: &Path) -> Result<()> {
    println!();
    println!("Pipeline Configuration");
    println!("======================");
    println!();

    if config_path.exists() {
        println!("Config file: {}", config_path.display());
    } else {
        println!("No pipeline.toml found at {}", config_path.display());
        println!("Using default configuration.");
    }
    println!();

    let config = PipelineConfig::load_or_default(config_path)?;
    let toml = toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
    println!("{}", toml);

    match config.validate() {
        Ok(()) => {
            let run = RunConfig::resolve(project_dir, &config, &current_time_stamp())?;
            println!("Resolved paths (for a run starting now):");
            println!("  artifact dir    = {}", run.artifact_dir.display());
            println!("  experiment log  = {}", run.experiment_file_path.display());
            println!("  dataset source  = {}", run.ingestion.dataset_download_url);
            println!("  schema file     = {}", run.validation.schema_file_path.display());
            println!("  export dir      = {}", run.pusher.export_dir_path.display());
            println!();
            println!(
                "Note: a running `serve` keeps the experiment log it opened at startup. \
                 Restart it after changing pipeline_name or artifact_dir, or it and \
                 `status` will read different files."
            );
        }
        Err(e) => println!("Configuration is invalid: {}", e),
    }
    println!();
    Ok(())
}

fn init(project_dir: &Path, config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    let config = PipelineConfig::default();
    config.save(config_path)?;
    println!("Created {}", config_path.display());

    let schema_path = project_dir
        .join(&config.data_validation.schema_dir)
        .join(&config.data_validation.schema_file_name);
    if schema_path.exists() && !force {
        println!("Kept existing {}", schema_path.display());
    } else {
        Schema::housing().save(&schema_path)?;
        println!("Created {}", schema_path.display());
    }
    Ok(())
}
