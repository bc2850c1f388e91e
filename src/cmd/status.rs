//! Experiment history: `housing-pipeline status`.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;

use housing_pipeline::config::PipelineConfig;
use housing_pipeline::experiment::{COMPLETED_MESSAGE, ExperimentStore, ExperimentView};

pub fn cmd_status(
    project_dir: &Path,
    config_path: &Path,
    limit: usize,
    completed: bool,
    json: bool,
) -> Result<()> {
    let config = PipelineConfig::load_or_default(config_path)?;
    let store = ExperimentStore::new(config.experiment_file_path(project_dir));

    let rows = if completed {
        store.read_recent_completed(limit)?
    } else {
        store.read_recent(limit)?
    };
    let views: Vec<ExperimentView> = rows.into_iter().map(ExperimentView::from).collect();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&views).context("Failed to serialize experiments")?
        );
        return Ok(());
    }

    if views.is_empty() {
        println!("No experiments recorded yet.");
        return Ok(());
    }

    println!("Experiment log: {}", store.path().display());
    println!();
    println!(
        "{:<36}  {:<19}  {:<9}  {:>9}  {:>8}  {:<8}  MESSAGE",
        "EXPERIMENT", "STARTED", "STATE", "TIME (s)", "ACCURACY", "ACCEPTED"
    );
    for view in &views {
        let state = if view.running {
            style(format!("{:<9}", "running")).cyan()
        } else if view.message == COMPLETED_MESSAGE {
            style(format!("{:<9}", "completed")).green()
        } else {
            style(format!("{:<9}", "failed")).red()
        };
        let elapsed = view
            .execution_time
            .map(|ms| format!("{:.1}", ms as f64 / 1000.0))
            .unwrap_or_else(|| "-".to_string());
        let accuracy = view
            .accuracy
            .map(|a| format!("{a:.4}"))
            .unwrap_or_else(|| "-".to_string());
        let accepted = match view.is_model_accepted {
            Some(true) => "yes",
            Some(false) => "no",
            None => "-",
        };
        println!(
            "{:<36}  {:<19}  {}  {:>9}  {:>8}  {:<8}  {}",
            view.experiment_id,
            view.start_time.format("%Y-%m-%d %H:%M:%S"),
            state,
            elapsed,
            accuracy,
            accepted,
            view.message
        );
    }
    Ok(())
}
