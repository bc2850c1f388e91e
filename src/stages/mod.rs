//! Built-in stage implementations.
//!
//! | Stage | Does |
//! |---|---|
//! | [`DataIngestion`] | fetch (HTTP or local path), unpack `.tgz`, seeded stratified split |
//! | [`DataValidation`] | file presence and schema checks, JSON report |
//! | [`DataTransformation`] | median imputation, standardisation, one-hot encoding |
//! | [`ModelTrainer`] | least squares linear regression, R² against `base_accuracy` |
//! | [`ModelEvaluation`] | compare against the best accepted model |
//! | [`ModelPusher`] | copy the accepted model to `saved_models/<ts>/` |
//!
//! File work runs on the blocking pool.

pub mod dataset;
pub mod evaluation;
pub mod ingestion;
pub mod model;
pub mod pusher;
pub mod trainer;
pub mod transformation;
pub mod validation;

use std::sync::Arc;

pub use dataset::{Schema, Table};
pub use evaluation::{EvaluationHistory, ModelEvaluation};
pub use ingestion::DataIngestion;
pub use model::{Preprocessor, TrainedModel};
pub use pusher::ModelPusher;
pub use trainer::ModelTrainer;
pub use transformation::DataTransformation;
pub use validation::DataValidation;

use crate::pipeline::Stages;

/// The production stage bundle.
pub fn builtin() -> Stages {
    Stages {
        ingestion: Arc::new(DataIngestion::new()),
        validation: Arc::new(DataValidation::new()),
        transformation: Arc::new(DataTransformation::new()),
        training: Arc::new(ModelTrainer::new()),
        evaluation: Arc::new(ModelEvaluation::new()),
        pusher: Arc::new(ModelPusher::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigSource, PipelineConfig, RunConfig};
    use crate::pipeline::{Orchestrator, RunState, StartOutcome, run_stage_sequence};
    use super::dataset::fixtures;
    use tempfile::tempdir;

    fn project_with_dataset(rows: usize) -> (tempfile::TempDir, PipelineConfig) {
        let dir = tempdir().unwrap();
        let source = dir.path().join("data").join("prices.csv");
        fixtures::linear_table(rows).write_csv(&source).unwrap();
        fixtures::schema()
            .save(&dir.path().join("config").join("schema.json"))
            .unwrap();

        let mut config = PipelineConfig::default();
        config.data_ingestion.dataset_download_url = source.display().to_string();
        (dir, config)
    }

    #[tokio::test]
    async fn test_builtin_sequence_end_to_end() {
        let (dir, config) = project_with_dataset(80);
        let run = Arc::new(RunConfig::resolve(dir.path(), &config, "2024-02-03-04-05-06").unwrap());

        let outcome = run_stage_sequence(&builtin(), &run).await.unwrap();
        assert!(outcome.training.model_accuracy > 0.9);
        assert!(outcome.evaluation.is_model_accepted);
        let pushed = outcome.pusher.unwrap();
        assert_eq!(
            pushed.export_model_file_path,
            dir.path()
                .join("saved_models")
                .join("2024-02-03-04-05-06")
                .join("model.json")
        );
        assert!(pushed.export_model_file_path.is_file());
        assert!(run.validation.report_file_path.is_file());
    }

    #[tokio::test]
    async fn test_orchestrated_builtin_run_records_accuracy() {
        let (dir, config) = project_with_dataset(60);
        let source = ConfigSource::fixed(dir.path().to_path_buf(), config);
        let orchestrator = Orchestrator::new(source, builtin()).unwrap();

        let handle = match orchestrator.start().unwrap() {
            StartOutcome::Started { handle, .. } => handle,
            other => panic!("Expected Started, got {:?}", other),
        };
        let report = handle.wait().await.unwrap();
        assert_eq!(report.state, RunState::Completed, "{}", report.record.message);
        assert!(report.record.accuracy.unwrap() > 0.9);
        assert_eq!(report.record.is_model_accepted, Some(true));
    }

    #[tokio::test]
    async fn test_schema_mismatch_fails_run_at_validation() {
        let (dir, config) = project_with_dataset(40);
        let mut schema = fixtures::schema();
        schema.columns.insert("extra".into(), "float".into());
        schema
            .save(&dir.path().join("config").join("schema.json"))
            .unwrap();

        let source = ConfigSource::fixed(dir.path().to_path_buf(), config);
        let orchestrator = Orchestrator::new(source, builtin()).unwrap();
        let handle = match orchestrator.start().unwrap() {
            StartOutcome::Started { handle, .. } => handle,
            other => panic!("Expected Started, got {:?}", other),
        };
        let report = handle.wait().await.unwrap();
        assert_eq!(report.state, RunState::Failed);
        assert!(report.record.message.starts_with("validation stage failed"), "{}", report.record.message);
    }
}
