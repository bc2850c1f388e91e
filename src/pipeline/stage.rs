use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use super::artifact::{
    EvaluationArtifact, EvaluationInput, IngestionArtifact, PusherArtifact, TrainingArtifact,
    TransformationArtifact, TransformationInput, ValidationArtifact,
};
use crate::config::RunConfig;

/// The six pipeline steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Ingestion,
    Validation,
    Transformation,
    Training,
    Evaluation,
    Pusher,
}

impl StageKind {
    pub const ALL: [StageKind; 6] = [
        StageKind::Ingestion,
        StageKind::Validation,
        StageKind::Transformation,
        StageKind::Training,
        StageKind::Evaluation,
        StageKind::Pusher,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Ingestion => "ingestion",
            StageKind::Validation => "validation",
            StageKind::Transformation => "transformation",
            StageKind::Training => "training",
            StageKind::Evaluation => "evaluation",
            StageKind::Pusher => "pusher",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("Unknown stage: {s}"))
    }
}

/// One pipeline step: consume upstream artifacts, produce one artifact or fail.
///
/// A stage never partially succeeds. Any error it returns aborts the run.
#[async_trait]
pub trait Stage: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    async fn initiate(&self, config: &RunConfig, input: Self::Input)
    -> anyhow::Result<Self::Output>;
}

pub type DynStage<I, O> = Arc<dyn Stage<Input = I, Output = O>>;

/// The stage implementations a run uses.
///
/// Held as trait objects so tests can swap in deterministic fakes.
#[derive(Clone)]
pub struct Stages {
    pub ingestion: DynStage<(), IngestionArtifact>,
    pub validation: DynStage<IngestionArtifact, ValidationArtifact>,
    pub transformation: DynStage<TransformationInput, TransformationArtifact>,
    pub training: DynStage<TransformationArtifact, TrainingArtifact>,
    pub evaluation: DynStage<EvaluationInput, EvaluationArtifact>,
    pub pusher: DynStage<EvaluationArtifact, PusherArtifact>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_kind_roundtrip() {
        for kind in StageKind::ALL {
            assert_eq!(kind.as_str().parse::<StageKind>().unwrap(), kind);
        }
        assert!("deploy".parse::<StageKind>().is_err());
    }

    #[test]
    fn test_stage_kind_display_is_lowercase() {
        assert_eq!(StageKind::Transformation.to_string(), "transformation");
        assert_eq!(format!("{}", StageKind::Pusher), "pusher");
    }
}
