use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::info;

use super::dataset::Table;
use super::model::{
    LinearModel, Preprocessor, TrainedModel, r2_score, rmse, split_transformed,
};
use crate::config::{RunConfig, TrainerConfig, current_time_stamp};
use crate::pipeline::{Stage, TrainingArtifact, TransformationArtifact};

/// Fits a linear regression on the transformed training split.
#[derive(Debug, Default)]
pub struct ModelTrainer;

impl ModelTrainer {
    pub fn new() -> Self {
        Self
    }
}

pub fn train(config: &TrainerConfig, input: &TransformationArtifact) -> Result<TrainingArtifact> {
    let preprocessor = Preprocessor::load(&input.preprocessed_object_file_path)?;
    let (train_x, train_y) = split_transformed(&Table::read_csv(&input.transformed_train_file_path)?)
        .context("Invalid transformed training data")?;
    let (test_x, test_y) = split_transformed(&Table::read_csv(&input.transformed_test_file_path)?)
        .context("Invalid transformed test data")?;

    let model = LinearModel::fit(&train_x, &train_y)?;
    let train_pred = model.predict(&train_x);
    let test_pred = model.predict(&test_x);
    let train_accuracy = r2_score(&train_y, &train_pred);
    let test_accuracy = r2_score(&test_y, &test_pred);
    let train_rmse = rmse(&train_y, &train_pred);
    let test_rmse = rmse(&test_y, &test_pred);
    let model_accuracy = test_accuracy;

    info!(
        train_accuracy,
        test_accuracy, train_rmse, test_rmse, "Linear regression fitted"
    );
    if model_accuracy < config.base_accuracy {
        bail!(
            "Model accuracy {model_accuracy:.4} is below the base accuracy {:.4}",
            config.base_accuracy
        );
    }

    let trained = TrainedModel {
        feature_names: preprocessor.feature_names(),
        preprocessor,
        model,
        trained_at: current_time_stamp(),
    };
    trained.save(&config.trained_model_file_path)?;

    Ok(TrainingArtifact {
        trained_model_file_path: config.trained_model_file_path.clone(),
        train_accuracy,
        test_accuracy,
        train_rmse,
        test_rmse,
        model_accuracy,
        is_trained: true,
        message: "Model trained successfully.".to_string(),
    })
}

#[async_trait]
impl Stage for ModelTrainer {
    type Input = TransformationArtifact;
    type Output = TrainingArtifact;

    async fn initiate(
        &self,
        config: &RunConfig,
        input: TransformationArtifact,
    ) -> Result<TrainingArtifact> {
        let trainer = config.trainer.clone();
        tokio::task::spawn_blocking(move || train(&trainer, &input))
            .await
            .context("Training task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformationConfig;
    use crate::stages::dataset::fixtures;
    use crate::stages::transformation::transform;
    use std::path::Path;
    use tempfile::tempdir;

    fn transformed_in(dir: &Path) -> TransformationArtifact {
        let input = fixtures::transformation_input(dir, 60, 20);
        let config = TransformationConfig {
            transformed_train_dir: dir.join("t").join("train"),
            transformed_test_dir: dir.join("t").join("test"),
            preprocessed_object_file_path: dir.join("pre.json"),
        };
        transform(&config, &input).unwrap()
    }

    #[test]
    fn test_train_fits_linear_data() {
        let dir = tempdir().unwrap();
        let transformed = transformed_in(dir.path());
        let config = TrainerConfig {
            trained_model_file_path: dir.path().join("model").join("model.json"),
            base_accuracy: 0.6,
        };

        let artifact = train(&config, &transformed).unwrap();
        assert!(artifact.is_trained);
        assert!(artifact.train_accuracy > 0.95, "{}", artifact.train_accuracy);
        assert!(artifact.test_accuracy > 0.95, "{}", artifact.test_accuracy);
        assert_eq!(artifact.model_accuracy, artifact.test_accuracy);

        let model = TrainedModel::load(&artifact.trained_model_file_path).unwrap();
        assert_eq!(model.feature_names, vec!["x1", "x2", "zone_a", "zone_b"]);
    }

    #[test]
    fn test_train_below_base_accuracy_fails() {
        let dir = tempdir().unwrap();
        let transformed = transformed_in(dir.path());

        // overwrite the test split with an unrelated target
        let mut test = Table::read_csv(&transformed.transformed_test_file_path).unwrap();
        for (i, row) in test.rows.iter_mut().enumerate() {
            *row.last_mut().unwrap() = (((i * 37) % 13) as f64 * 100.0).to_string();
        }
        test.write_csv(&transformed.transformed_test_file_path).unwrap();

        let config = TrainerConfig {
            trained_model_file_path: dir.path().join("model.json"),
            base_accuracy: 0.6,
        };
        let err = train(&config, &transformed).unwrap_err();
        assert!(err.to_string().contains("below the base accuracy"), "{err}");
        assert!(!config.trained_model_file_path.exists());
    }
}
