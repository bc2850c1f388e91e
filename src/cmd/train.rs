//! Foreground pipeline run: `housing-pipeline train`.

use std::path::Path;

use anyhow::{Result, bail};
use console::style;

use housing_pipeline::config::ConfigSource;
use housing_pipeline::pipeline::{Orchestrator, RunState, StartOutcome};
use housing_pipeline::stages;

pub async fn cmd_train(project_dir: &Path, config_path: &Path) -> Result<()> {
    let source = ConfigSource::from_file(project_dir.to_path_buf(), config_path.to_path_buf());
    let orchestrator = Orchestrator::new(source, stages::builtin())?;

    let handle = match orchestrator.start()? {
        StartOutcome::Started { handle, .. } => handle,
        StartOutcome::AlreadyRunning { experiment_id } => {
            bail!("Experiment {} is already running", experiment_id)
        }
    };
    println!(
        "{} experiment {}",
        style("Started").cyan().bold(),
        handle.experiment_id()
    );

    let report = handle.wait().await?;
    let record = &report.record;
    let elapsed = record.execution_time.unwrap_or_default() as f64 / 1000.0;

    match report.state {
        RunState::Completed => {
            println!(
                "{} in {:.1}s: {}",
                style("Completed").green().bold(),
                elapsed,
                record.message
            );
            if let Some(accuracy) = record.accuracy {
                println!("  accuracy: {:.4}", accuracy);
            }
            let accepted = record.is_model_accepted.unwrap_or(false);
            println!(
                "  model:    {}",
                if accepted {
                    style("accepted and exported").green()
                } else {
                    style("not accepted").yellow()
                }
            );
            Ok(())
        }
        _ => {
            println!(
                "{} after {:.1}s",
                style("Failed").red().bold(),
                elapsed
            );
            bail!("{}", record.message)
        }
    }
}
