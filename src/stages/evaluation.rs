use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::dataset::Table;
use super::model::{TrainedModel, read_json, write_json};
use crate::config::{EvaluationConfig, RunConfig};
use crate::pipeline::{EvaluationArtifact, EvaluationInput, Stage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub model_path: PathBuf,
    pub accuracy: f64,
    pub time_stamp: String,
}

/// Contents of `model_evaluation.json`: the best accepted model and the ones
/// it replaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationHistory {
    pub best_model: Option<ModelEntry>,
    #[serde(default)]
    pub history: Vec<ModelEntry>,
}

impl EvaluationHistory {
    pub fn load_or_default(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            read_json(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Make `entry` the best model, moving the previous best into history.
    pub fn promote(&mut self, entry: ModelEntry) {
        if let Some(previous) = self.best_model.replace(entry) {
            self.history.push(previous);
        }
    }
}

/// Compares the trained model against the best previously accepted one.
#[derive(Debug, Default)]
pub struct ModelEvaluation;

impl ModelEvaluation {
    pub fn new() -> Self {
        Self
    }
}

/// Score of the current best model on `test`, if there is a usable one.
fn best_model_score(best: &ModelEntry, test: &Table) -> Option<f64> {
    if !best.model_path.is_file() {
        warn!(path = %best.model_path.display(), "Best model file is gone; ignoring it");
        return None;
    }
    let scored = TrainedModel::load(&best.model_path).and_then(|m| m.score_table(test));
    match scored {
        Ok(score) => Some(score),
        Err(e) => {
            warn!(error = %e, "Could not score best model; using its recorded accuracy");
            Some(best.accuracy)
        }
    }
}

pub fn evaluate(
    config: &EvaluationConfig,
    time_stamp: &str,
    input: &EvaluationInput,
) -> Result<EvaluationArtifact> {
    let trained_path = &input.training.trained_model_file_path;
    let trained = TrainedModel::load(trained_path).context("Failed to load trained model")?;
    let test = Table::read_csv(&input.ingestion.test_file_path)?;
    let trained_score = trained.score_table(&test)?;

    let mut history = EvaluationHistory::load_or_default(&config.model_evaluation_file_path)?;
    let best_score = history
        .best_model
        .as_ref()
        .and_then(|best| best_model_score(best, &test));

    let accepted = match best_score {
        None => true,
        Some(best) => trained_score > best + config.min_improvement,
    };
    info!(
        trained_score,
        best_score = best_score.unwrap_or(f64::NAN),
        accepted,
        "Model evaluated"
    );

    let message = if accepted {
        history.promote(ModelEntry {
            model_path: trained_path.clone(),
            accuracy: trained_score,
            time_stamp: time_stamp.to_string(),
        });
        write_json(&config.model_evaluation_file_path, &history)
            .context("Failed to update evaluation history")?;
        "Trained model is accepted.".to_string()
    } else {
        format!(
            "Trained model ({trained_score:.4}) is not better than the best model ({:.4}); not accepted.",
            best_score.unwrap_or_default()
        )
    };

    Ok(EvaluationArtifact {
        evaluated_model_path: trained_path.clone(),
        is_model_accepted: accepted,
        message,
    })
}

#[async_trait]
impl Stage for ModelEvaluation {
    type Input = EvaluationInput;
    type Output = EvaluationArtifact;

    async fn initiate(&self, config: &RunConfig, input: EvaluationInput) -> Result<EvaluationArtifact> {
        let evaluation = config.evaluation.clone();
        let time_stamp = config.time_stamp.clone();
        tokio::task::spawn_blocking(move || evaluate(&evaluation, &time_stamp, &input))
            .await
            .context("Evaluation task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TrainerConfig, TransformationConfig};
    use crate::pipeline::TransformationInput;
    use crate::stages::dataset::fixtures;
    use crate::stages::trainer::train;
    use crate::stages::transformation::transform;
    use std::path::Path;
    use tempfile::tempdir;

    fn trained_run(dir: &Path, name: &str, input: &TransformationInput) -> EvaluationInput {
        let run_dir = dir.join(name);
        let transformed = transform(
            &TransformationConfig {
                transformed_train_dir: run_dir.join("train"),
                transformed_test_dir: run_dir.join("test"),
                preprocessed_object_file_path: run_dir.join("pre.json"),
            },
            input,
        )
        .unwrap();
        let training = train(
            &TrainerConfig {
                trained_model_file_path: run_dir.join("model.json"),
                base_accuracy: 0.0,
            },
            &transformed,
        )
        .unwrap();
        EvaluationInput {
            ingestion: input.ingestion.clone(),
            validation: input.validation.clone(),
            training,
        }
    }

    fn config_in(dir: &Path, min_improvement: f64) -> EvaluationConfig {
        EvaluationConfig {
            model_evaluation_file_path: dir.join("model_evaluation").join("model_evaluation.json"),
            min_improvement,
        }
    }

    #[test]
    fn test_first_model_is_accepted_and_recorded() {
        let dir = tempdir().unwrap();
        let input = fixtures::transformation_input(dir.path(), 60, 20);
        let eval_input = trained_run(dir.path(), "run1", &input);
        let config = config_in(dir.path(), 0.0);

        let artifact = evaluate(&config, "ts1", &eval_input).unwrap();
        assert!(artifact.is_model_accepted);
        assert_eq!(artifact.evaluated_model_path, eval_input.training.trained_model_file_path);

        let history = EvaluationHistory::load_or_default(&config.model_evaluation_file_path).unwrap();
        let best = history.best_model.unwrap();
        assert_eq!(best.time_stamp, "ts1");
        assert!(history.history.is_empty());
    }

    #[test]
    fn test_equal_model_is_rejected() {
        let dir = tempdir().unwrap();
        let input = fixtures::transformation_input(dir.path(), 60, 20);
        let config = config_in(dir.path(), 0.0);

        let first = trained_run(dir.path(), "run1", &input);
        assert!(evaluate(&config, "ts1", &first).unwrap().is_model_accepted);

        // same data, same fit: not strictly better
        let second = trained_run(dir.path(), "run2", &input);
        let artifact = evaluate(&config, "ts2", &second).unwrap();
        assert!(!artifact.is_model_accepted);
        assert!(artifact.message.contains("not accepted"));

        let history = EvaluationHistory::load_or_default(&config.model_evaluation_file_path).unwrap();
        assert_eq!(history.best_model.unwrap().time_stamp, "ts1");
    }

    #[test]
    fn test_better_model_replaces_best() {
        let dir = tempdir().unwrap();
        let input = fixtures::transformation_input(dir.path(), 60, 20);
        let config = config_in(dir.path(), 0.0);

        let stale = dir.path().join("old_model.json");
        let mut history = EvaluationHistory::default();
        history.promote(ModelEntry {
            model_path: stale.clone(),
            accuracy: 0.1,
            time_stamp: "old".into(),
        });
        write_json(&config.model_evaluation_file_path, &history).unwrap();

        // the recorded best model file no longer exists
        let run = trained_run(dir.path(), "run1", &input);
        let artifact = evaluate(&config, "new", &run).unwrap();
        assert!(artifact.is_model_accepted);

        let history = EvaluationHistory::load_or_default(&config.model_evaluation_file_path).unwrap();
        assert_eq!(history.best_model.unwrap().time_stamp, "new");
        assert_eq!(history.history.len(), 1);
        assert_eq!(history.history[0].model_path, stale);
    }

    #[test]
    fn test_min_improvement_blocks_marginal_gain() {
        let dir = tempdir().unwrap();
        let input = fixtures::transformation_input(dir.path(), 60, 20);
        let config = config_in(dir.path(), 0.5);

        let first = trained_run(dir.path(), "run1", &input);
        let mut history = EvaluationHistory::default();
        history.promote(ModelEntry {
            model_path: first.training.trained_model_file_path.clone(),
            accuracy: 0.9,
            time_stamp: "ts1".into(),
        });
        write_json(&config.model_evaluation_file_path, &history).unwrap();

        let second = trained_run(dir.path(), "run2", &input);
        assert!(!evaluate(&config, "ts2", &second).unwrap().is_model_accepted);
    }
}
