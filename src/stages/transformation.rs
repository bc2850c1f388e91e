use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use super::dataset::{Schema, Table};
use super::model::Preprocessor;
use crate::config::{RunConfig, TransformationConfig};
use crate::pipeline::{Stage, TransformationArtifact, TransformationInput};

/// Fits the preprocessor on the training split and applies it to both splits.
#[derive(Debug, Default)]
pub struct DataTransformation;

impl DataTransformation {
    pub fn new() -> Self {
        Self
    }
}

pub fn transform(
    config: &TransformationConfig,
    input: &TransformationInput,
) -> Result<TransformationArtifact> {
    let schema = Schema::load(&input.validation.schema_file_path)?;
    let train = Table::read_csv(&input.ingestion.train_file_path)?;
    let test = Table::read_csv(&input.ingestion.test_file_path)?;

    let preprocessor = Preprocessor::fit(&train, &schema).context("Failed to fit preprocessor")?;
    let transformed_train = preprocessor.transform(&train)?;
    let transformed_test = preprocessor.transform(&test)?;

    let file_name = |path: &std::path::Path| {
        path.file_name()
            .map(|n| n.to_owned())
            .context("Ingested file has no name")
    };
    let transformed_train_file_path = config
        .transformed_train_dir
        .join(file_name(&input.ingestion.train_file_path)?);
    let transformed_test_file_path = config
        .transformed_test_dir
        .join(file_name(&input.ingestion.test_file_path)?);

    transformed_train.write_csv(&transformed_train_file_path)?;
    transformed_test.write_csv(&transformed_test_file_path)?;
    preprocessor.save(&config.preprocessed_object_file_path)?;

    info!(
        features = preprocessor.feature_names().len(),
        preprocessor = %config.preprocessed_object_file_path.display(),
        "Data transformation completed"
    );
    Ok(TransformationArtifact {
        transformed_train_file_path,
        transformed_test_file_path,
        preprocessed_object_file_path: config.preprocessed_object_file_path.clone(),
        is_transformed: true,
        message: "Data transformation successful.".to_string(),
    })
}

#[async_trait]
impl Stage for DataTransformation {
    type Input = TransformationInput;
    type Output = TransformationArtifact;

    async fn initiate(
        &self,
        config: &RunConfig,
        input: TransformationInput,
    ) -> Result<TransformationArtifact> {
        let transformation = config.transformation.clone();
        tokio::task::spawn_blocking(move || transform(&transformation, &input))
            .await
            .context("Transformation task panicked")?
    }
}
