//! Stage sequencing and run orchestration.
//!
//! - [`artifact`]: typed outputs passed from one stage to the next
//! - [`stage`]: the [`Stage`] trait and the [`Stages`] bundle a run uses
//! - [`orchestrator`]: the single-run state machine and its worker

pub mod artifact;
pub mod orchestrator;
pub mod stage;

pub use artifact::{
    EvaluationArtifact, EvaluationInput, IngestionArtifact, PusherArtifact, TrainingArtifact,
    TransformationArtifact, TransformationInput, ValidationArtifact,
};
pub use orchestrator::{
    CurrentRun, DEFAULT_STATUS_LIMIT, Orchestrator, RunHandle, RunReport, RunState,
    SequenceOutcome, StartOutcome, run_stage_sequence,
};
pub use stage::{DynStage, Stage, StageKind, Stages};
