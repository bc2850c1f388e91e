//! Typed error hierarchy for the training pipeline.
//!
//! Four enums cover the subsystems:
//! - `ConfigError`: loading and validating `pipeline.toml`
//! - `StageError`: a single stage failing inside a run
//! - `StoreError`: experiment log reads and appends
//! - `PipelineError`: everything the orchestrator surfaces to callers
//!
//! A `start` request rejected because a run is in progress is not an error;
//! see `pipeline::StartOutcome::AlreadyRunning`.

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::StageKind;

/// Errors from loading or validating the pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A stage failed to produce its artifact.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source:#}")]
pub struct StageError {
    pub stage: StageKind,
    #[source]
    pub source: anyhow::Error,
}

impl StageError {
    pub fn new(stage: StageKind, source: impl Into<anyhow::Error>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

/// Errors from the append-only experiment log.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Experiment log I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Experiment log at {path} is malformed: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Experiment store task panicked")]
    TaskPanicked,
}

/// Errors surfaced by the orchestrator.
///
/// A failed stage is not one of these: it becomes the run's terminal record
/// and `RunState::Failed` on its report.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Persistence(#[from] StoreError),

    #[error("Pipeline worker is not running")]
    WorkerUnavailable,

    #[error("Orchestrator state lock poisoned")]
    LockPoisoned,
}
