//! Pipeline configuration.
//!
//! The base configuration lives in `config/pipeline.toml` under the project
//! root. Every run resolves it once, together with the run's timestamp, into a
//! read-only [`RunConfig`] that carries each stage's concrete paths.
//!
//! # Configuration File Format
//!
//! ```toml
//! [training_pipeline]
//! pipeline_name = "housing"
//! artifact_dir = "artifact"
//!
//! [data_ingestion]
//! dataset_download_url = "https://example.com/housing.tgz"
//! tgz_download_dir = "tgz_data"
//! raw_data_dir = "raw_data"
//! ingested_dir = "ingested_data"
//! ingested_train_dir = "train"
//! ingested_test_dir = "test"
//! test_ratio = 0.2
//! split_seed = 42
//!
//! [data_validation]
//! schema_dir = "config"
//! schema_file_name = "schema.json"
//! report_file_name = "report.json"
//!
//! [data_transformation]
//! transformed_dir = "transformed_data"
//! transformed_train_dir = "train"
//! transformed_test_dir = "test"
//! preprocessing_dir = "preprocessed"
//! preprocessed_object_file_name = "preprocessed.json"
//!
//! [model_trainer]
//! trained_model_dir = "trained_model"
//! model_file_name = "model.json"
//! base_accuracy = 0.6
//!
//! [model_evaluation]
//! model_evaluation_file_name = "model_evaluation.json"
//! min_improvement = 0.0
//!
//! [model_pusher]
//! model_export_dir = "saved_models"
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub const CONFIG_DIR: &str = "config";
pub const CONFIG_FILE_NAME: &str = "pipeline.toml";

pub const DATA_INGESTION_ARTIFACT_DIR: &str = "data_ingestion";
pub const DATA_VALIDATION_ARTIFACT_DIR: &str = "data_validation";
pub const DATA_TRANSFORMATION_ARTIFACT_DIR: &str = "data_transformation";
pub const MODEL_TRAINER_ARTIFACT_DIR: &str = "model_trainer";
pub const MODEL_EVALUATION_ARTIFACT_DIR: &str = "model_evaluation";
pub const EXPERIMENT_DIR_NAME: &str = "experiment";
pub const EXPERIMENT_FILE_NAME: &str = "experiment.csv";

/// Format of the per-run artifact namespace.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Overrides `data_ingestion.dataset_download_url` when set.
pub const DATASET_URL_ENV: &str = "HOUSING_DATASET_URL";

/// Current local time formatted as an artifact timestamp.
pub fn current_time_stamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Default config file location for a project root.
pub fn default_config_path(root_dir: &Path) -> PathBuf {
    root_dir.join(CONFIG_DIR).join(CONFIG_FILE_NAME)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPipelineSection {
    #[serde(default = "default_pipeline_name")]
    pub pipeline_name: String,
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,
}

fn default_pipeline_name() -> String {
    "housing".to_string()
}

fn default_artifact_dir() -> String {
    "artifact".to_string()
}

impl Default for TrainingPipelineSection {
    fn default() -> Self {
        Self {
            pipeline_name: default_pipeline_name(),
            artifact_dir: default_artifact_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataIngestionSection {
    #[serde(default = "default_dataset_download_url")]
    pub dataset_download_url: String,
    #[serde(default = "default_tgz_download_dir")]
    pub tgz_download_dir: String,
    #[serde(default = "default_raw_data_dir")]
    pub raw_data_dir: String,
    #[serde(default = "default_ingested_dir")]
    pub ingested_dir: String,
    #[serde(default = "default_train_dir")]
    pub ingested_train_dir: String,
    #[serde(default = "default_test_dir")]
    pub ingested_test_dir: String,
    /// Fraction of rows held out for the test split.
    #[serde(default = "default_test_ratio")]
    pub test_ratio: f64,
    #[serde(default = "default_split_seed")]
    pub split_seed: u64,
}

fn default_dataset_download_url() -> String {
    "https://raw.githubusercontent.com/ageron/handson-ml/master/datasets/housing/housing.tgz"
        .to_string()
}

fn default_tgz_download_dir() -> String {
    "tgz_data".to_string()
}

fn default_raw_data_dir() -> String {
    "raw_data".to_string()
}

fn default_ingested_dir() -> String {
    "ingested_data".to_string()
}

fn default_train_dir() -> String {
    "train".to_string()
}

fn default_test_dir() -> String {
    "test".to_string()
}

fn default_test_ratio() -> f64 {
    0.2
}

fn default_split_seed() -> u64 {
    42
}

impl Default for DataIngestionSection {
    fn default() -> Self {
        Self {
            dataset_download_url: default_dataset_download_url(),
            tgz_download_dir: default_tgz_download_dir(),
            raw_data_dir: default_raw_data_dir(),
            ingested_dir: default_ingested_dir(),
            ingested_train_dir: default_train_dir(),
            ingested_test_dir: default_test_dir(),
            test_ratio: default_test_ratio(),
            split_seed: default_split_seed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataValidationSection {
    /// Relative to the project root, not to the artifact namespace.
    #[serde(default = "default_schema_dir")]
    pub schema_dir: String,
    #[serde(default = "default_schema_file_name")]
    pub schema_file_name: String,
    #[serde(default = "default_report_file_name")]
    pub report_file_name: String,
}

fn default_schema_dir() -> String {
    CONFIG_DIR.to_string()
}

fn default_schema_file_name() -> String {
    "schema.json".to_string()
}

fn default_report_file_name() -> String {
    "report.json".to_string()
}

impl Default for DataValidationSection {
    fn default() -> Self {
        Self {
            schema_dir: default_schema_dir(),
            schema_file_name: default_schema_file_name(),
            report_file_name: default_report_file_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTransformationSection {
    #[serde(default = "default_transformed_dir")]
    pub transformed_dir: String,
    #[serde(default = "default_train_dir")]
    pub transformed_train_dir: String,
    #[serde(default = "default_test_dir")]
    pub transformed_test_dir: String,
    #[serde(default = "default_preprocessing_dir")]
    pub preprocessing_dir: String,
    #[serde(default = "default_preprocessed_object_file_name")]
    pub preprocessed_object_file_name: String,
}

fn default_transformed_dir() -> String {
    "transformed_data".to_string()
}

fn default_preprocessing_dir() -> String {
    "preprocessed".to_string()
}

fn default_preprocessed_object_file_name() -> String {
    "preprocessed.json".to_string()
}

impl Default for DataTransformationSection {
    fn default() -> Self {
        Self {
            transformed_dir: default_transformed_dir(),
            transformed_train_dir: default_train_dir(),
            transformed_test_dir: default_test_dir(),
            preprocessing_dir: default_preprocessing_dir(),
            preprocessed_object_file_name: default_preprocessed_object_file_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTrainerSection {
    #[serde(default = "default_trained_model_dir")]
    pub trained_model_dir: String,
    #[serde(default = "default_model_file_name")]
    pub model_file_name: String,
    /// Minimum test R² a trained model must reach.
    #[serde(default = "default_base_accuracy")]
    pub base_accuracy: f64,
}

fn default_trained_model_dir() -> String {
    "trained_model".to_string()
}

fn default_model_file_name() -> String {
    "model.json".to_string()
}

fn default_base_accuracy() -> f64 {
    0.6
}

impl Default for ModelTrainerSection {
    fn default() -> Self {
        Self {
            trained_model_dir: default_trained_model_dir(),
            model_file_name: default_model_file_name(),
            base_accuracy: default_base_accuracy(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEvaluationSection {
    #[serde(default = "default_model_evaluation_file_name")]
    pub model_evaluation_file_name: String,
    /// Model-acceptance threshold: how much a new model must beat the best
    /// accepted model by.
    #[serde(default)]
    pub min_improvement: f64,
}

fn default_model_evaluation_file_name() -> String {
    "model_evaluation.json".to_string()
}

impl Default for ModelEvaluationSection {
    fn default() -> Self {
        Self {
            model_evaluation_file_name: default_model_evaluation_file_name(),
            min_improvement: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPusherSection {
    /// Relative to the project root.
    #[serde(default = "default_model_export_dir")]
    pub model_export_dir: String,
}

fn default_model_export_dir() -> String {
    "saved_models".to_string()
}

impl Default for ModelPusherSection {
    fn default() -> Self {
        Self {
            model_export_dir: default_model_export_dir(),
        }
    }
}

/// Root configuration structure for `pipeline.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub training_pipeline: TrainingPipelineSection,
    #[serde(default)]
    pub data_ingestion: DataIngestionSection,
    #[serde(default)]
    pub data_validation: DataValidationSection,
    #[serde(default)]
    pub data_transformation: DataTransformationSection,
    #[serde(default)]
    pub model_trainer: ModelTrainerSection,
    #[serde(default)]
    pub model_evaluation: ModelEvaluationSection,
    #[serde(default)]
    pub model_pusher: ModelPusherSection,
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Parse configuration from a TOML string; `path` is only used in errors.
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize pipeline.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("training_pipeline.pipeline_name", &self.training_pipeline.pipeline_name),
            ("training_pipeline.artifact_dir", &self.training_pipeline.artifact_dir),
            ("data_validation.schema_file_name", &self.data_validation.schema_file_name),
            ("model_trainer.model_file_name", &self.model_trainer.model_file_name),
            ("model_pusher.model_export_dir", &self.model_pusher.model_export_dir),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{key} must not be empty")));
            }
        }

        let ratio = self.data_ingestion.test_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "data_ingestion.test_ratio must be between 0 and 1 (exclusive), got {ratio}"
            )));
        }
        let base = self.model_trainer.base_accuracy;
        if !(0.0..=1.0).contains(&base) {
            return Err(ConfigError::Invalid(format!(
                "model_trainer.base_accuracy must be between 0 and 1, got {base}"
            )));
        }
        if !self.model_evaluation.min_improvement.is_finite()
            || self.model_evaluation.min_improvement < 0.0
        {
            return Err(ConfigError::Invalid(
                "model_evaluation.min_improvement must be >= 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Dataset URL, with the environment override applied.
    pub fn dataset_download_url(&self) -> String {
        std::env::var(DATASET_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.data_ingestion.dataset_download_url.clone())
    }

    /// `<root>/<pipeline_name>/<artifact_dir>`
    pub fn artifact_dir(&self, root_dir: &Path) -> PathBuf {
        root_dir
            .join(&self.training_pipeline.pipeline_name)
            .join(&self.training_pipeline.artifact_dir)
    }

    /// Fixed location of the experiment log under the artifact root.
    pub fn experiment_file_path(&self, root_dir: &Path) -> PathBuf {
        self.artifact_dir(root_dir)
            .join(EXPERIMENT_DIR_NAME)
            .join(EXPERIMENT_FILE_NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionConfig {
    pub dataset_download_url: String,
    pub tgz_download_dir: PathBuf,
    pub raw_data_dir: PathBuf,
    pub ingested_train_dir: PathBuf,
    pub ingested_test_dir: PathBuf,
    pub test_ratio: f64,
    pub split_seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationConfig {
    pub schema_file_path: PathBuf,
    pub report_file_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformationConfig {
    pub transformed_train_dir: PathBuf,
    pub transformed_test_dir: PathBuf,
    pub preprocessed_object_file_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainerConfig {
    pub trained_model_file_path: PathBuf,
    pub base_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationConfig {
    pub model_evaluation_file_path: PathBuf,
    pub min_improvement: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PusherConfig {
    pub export_dir_path: PathBuf,
}

/// Read-only snapshot of every path and parameter one run uses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunConfig {
    pub time_stamp: String,
    pub root_dir: PathBuf,
    pub artifact_dir: PathBuf,
    pub experiment_file_path: PathBuf,
    pub ingestion: IngestionConfig,
    pub validation: ValidationConfig,
    pub transformation: TransformationConfig,
    pub trainer: TrainerConfig,
    pub evaluation: EvaluationConfig,
    pub pusher: PusherConfig,
}

impl RunConfig {
    /// Resolve the per-stage layout for a run namespaced by `time_stamp`.
    pub fn resolve(
        root_dir: &Path,
        config: &PipelineConfig,
        time_stamp: &str,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if time_stamp.trim().is_empty() {
            return Err(ConfigError::Invalid("run timestamp must not be empty".into()));
        }

        let artifact_dir = config.artifact_dir(root_dir);

        let ingestion_cfg = &config.data_ingestion;
        let ingestion_dir = artifact_dir.join(DATA_INGESTION_ARTIFACT_DIR).join(time_stamp);
        let ingested_dir = ingestion_dir.join(&ingestion_cfg.ingested_dir);
        let ingestion = IngestionConfig {
            dataset_download_url: config.dataset_download_url(),
            tgz_download_dir: ingestion_dir.join(&ingestion_cfg.tgz_download_dir),
            raw_data_dir: ingestion_dir.join(&ingestion_cfg.raw_data_dir),
            ingested_train_dir: ingested_dir.join(&ingestion_cfg.ingested_train_dir),
            ingested_test_dir: ingested_dir.join(&ingestion_cfg.ingested_test_dir),
            test_ratio: ingestion_cfg.test_ratio,
            split_seed: ingestion_cfg.split_seed,
        };

        let validation_cfg = &config.data_validation;
        let validation_dir = artifact_dir.join(DATA_VALIDATION_ARTIFACT_DIR).join(time_stamp);
        let validation = ValidationConfig {
            schema_file_path: root_dir
                .join(&validation_cfg.schema_dir)
                .join(&validation_cfg.schema_file_name),
            report_file_path: validation_dir.join(&validation_cfg.report_file_name),
        };

        let transformation_cfg = &config.data_transformation;
        let transformation_dir = artifact_dir
            .join(DATA_TRANSFORMATION_ARTIFACT_DIR)
            .join(time_stamp);
        let transformed_dir = transformation_dir.join(&transformation_cfg.transformed_dir);
        let transformation = TransformationConfig {
            transformed_train_dir: transformed_dir.join(&transformation_cfg.transformed_train_dir),
            transformed_test_dir: transformed_dir.join(&transformation_cfg.transformed_test_dir),
            preprocessed_object_file_path: transformation_dir
                .join(&transformation_cfg.preprocessing_dir)
                .join(&transformation_cfg.preprocessed_object_file_name),
        };

        let trainer = TrainerConfig {
            trained_model_file_path: artifact_dir
                .join(MODEL_TRAINER_ARTIFACT_DIR)
                .join(time_stamp)
                .join(&config.model_trainer.trained_model_dir)
                .join(&config.model_trainer.model_file_name),
            base_accuracy: config.model_trainer.base_accuracy,
        };

        // Evaluation history is shared across runs, so it is not namespaced.
        let evaluation = EvaluationConfig {
            model_evaluation_file_path: artifact_dir
                .join(MODEL_EVALUATION_ARTIFACT_DIR)
                .join(&config.model_evaluation.model_evaluation_file_name),
            min_improvement: config.model_evaluation.min_improvement,
        };

        let pusher = PusherConfig {
            export_dir_path: root_dir
                .join(&config.model_pusher.model_export_dir)
                .join(time_stamp),
        };

        Ok(Self {
            time_stamp: time_stamp.to_string(),
            root_dir: root_dir.to_path_buf(),
            experiment_file_path: config.experiment_file_path(root_dir),
            artifact_dir,
            ingestion,
            validation,
            transformation,
            trainer,
            evaluation,
            pusher,
        })
    }
}

impl RunConfig {
    /// Directories that belong to this run alone.
    pub fn namespace_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = [
            DATA_INGESTION_ARTIFACT_DIR,
            DATA_VALIDATION_ARTIFACT_DIR,
            DATA_TRANSFORMATION_ARTIFACT_DIR,
            MODEL_TRAINER_ARTIFACT_DIR,
        ]
        .iter()
        .map(|stage| self.artifact_dir.join(stage).join(&self.time_stamp))
        .collect();
        dirs.push(self.pusher.export_dir_path.clone());
        dirs
    }

    /// Whether an earlier run already wrote into this run's namespace.
    pub fn namespace_in_use(&self) -> bool {
        self.namespace_dirs().iter().any(|dir| dir.exists())
    }
}

/// Where the orchestrator gets its base configuration from.
///
/// A file-backed source is re-read on every run so edits take effect without
/// a restart.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    root_dir: PathBuf,
    config_path: Option<PathBuf>,
    fixed: PipelineConfig,
}

impl ConfigSource {
    pub fn from_file(root_dir: PathBuf, config_path: PathBuf) -> Self {
        Self {
            root_dir,
            config_path: Some(config_path),
            fixed: PipelineConfig::default(),
        }
    }

    pub fn fixed(root_dir: PathBuf, config: PipelineConfig) -> Self {
        Self {
            root_dir,
            config_path: None,
            fixed: config,
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn load(&self) -> Result<PipelineConfig, ConfigError> {
        match &self.config_path {
            Some(path) => PipelineConfig::load_or_default(path),
            None => Ok(self.fixed.clone()),
        }
    }

    pub fn resolve(&self, time_stamp: &str) -> Result<RunConfig, ConfigError> {
        let config = self.load()?;
        RunConfig::resolve(&self.root_dir, &config, time_stamp)
    }

    pub fn experiment_file_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.load()?.experiment_file_path(&self.root_dir))
    }
}
