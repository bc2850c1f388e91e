//! Immutable records passed between stages.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionArtifact {
    pub train_file_path: PathBuf,
    pub test_file_path: PathBuf,
    pub is_ingested: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationArtifact {
    pub schema_file_path: PathBuf,
    pub report_file_path: PathBuf,
    pub is_validated: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationArtifact {
    pub transformed_train_file_path: PathBuf,
    pub transformed_test_file_path: PathBuf,
    pub preprocessed_object_file_path: PathBuf,
    pub is_transformed: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingArtifact {
    pub trained_model_file_path: PathBuf,
    pub train_accuracy: f64,
    pub test_accuracy: f64,
    pub train_rmse: f64,
    pub test_rmse: f64,
    /// The accuracy recorded on the experiment.
    pub model_accuracy: f64,
    pub is_trained: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationArtifact {
    pub evaluated_model_path: PathBuf,
    pub is_model_accepted: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PusherArtifact {
    pub export_model_file_path: PathBuf,
    pub is_model_pushed: bool,
    pub message: String,
}

/// Upstream artifacts the transformation stage consumes.
#[derive(Debug, Clone)]
pub struct TransformationInput {
    pub ingestion: IngestionArtifact,
    pub validation: ValidationArtifact,
}

/// Upstream artifacts the evaluation stage consumes.
#[derive(Debug, Clone)]
pub struct EvaluationInput {
    pub ingestion: IngestionArtifact,
    pub validation: ValidationArtifact,
    pub training: TrainingArtifact,
}
