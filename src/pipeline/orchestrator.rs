//! Single-run pipeline orchestration.
//!
//! One [`Orchestrator`] exists per process. `start` is serialised by a mutex:
//! it checks the running flag, resolves the run configuration, persists the
//! started record and hands the run to a dedicated worker task, all before
//! releasing the lock. The worker runs jobs one at a time and finalises the
//! record when the stage sequence ends.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::anyhow;
use chrono::Local;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use super::artifact::{
    EvaluationArtifact, EvaluationInput, PusherArtifact, TrainingArtifact, TransformationInput,
};
use super::stage::{DynStage, StageKind, Stages};
use crate::config::{ConfigSource, RunConfig, current_time_stamp};
use crate::errors::{PipelineError, StageError};
use crate::experiment::{
    COMPLETED_MESSAGE, ExperimentRecord, ExperimentStore, ExperimentView, RunMetrics,
};

/// Number of experiments a status query returns when no limit is given.
pub const DEFAULT_STATUS_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a `start` request.
#[derive(Debug)]
pub enum StartOutcome {
    Started {
        experiment_id: Uuid,
        handle: RunHandle,
    },
    /// A run is in progress; nothing was changed.
    AlreadyRunning { experiment_id: Uuid },
}

/// Terminal state of a run, delivered through its [`RunHandle`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: RunState,
    pub record: ExperimentRecord,
}

/// Resolves once the worker has finalised the run.
///
/// Dropping the handle does not affect the run.
#[derive(Debug)]
pub struct RunHandle {
    experiment_id: Uuid,
    rx: oneshot::Receiver<Result<RunReport, PipelineError>>,
}

impl RunHandle {
    pub fn experiment_id(&self) -> Uuid {
        self.experiment_id
    }

    /// Wait for the run to finish.
    ///
    /// A failed stage is not an error here; it shows up as
    /// `RunState::Failed` on the report. Errors are reserved for a finished
    /// record that could not be persisted, or a worker that went away.
    pub async fn wait(self) -> Result<RunReport, PipelineError> {
        self.rx.await.map_err(|_| PipelineError::WorkerUnavailable)?
    }
}

/// Snapshot of the current run for observers.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentRun {
    pub state: RunState,
    pub experiment: Option<ExperimentView>,
}

/// Artifacts of a run that went through every stage.
#[derive(Debug, Clone)]
pub struct SequenceOutcome {
    pub training: TrainingArtifact,
    pub evaluation: EvaluationArtifact,
    pub pusher: Option<PusherArtifact>,
}

struct Current {
    state: RunState,
    record: Option<ExperimentRecord>,
}

struct Shared {
    source: ConfigSource,
    store: ExperimentStore,
    initialization_timestamp: String,
    current: Mutex<Current>,
}

struct Job {
    record: ExperimentRecord,
    config: Arc<RunConfig>,
    reply: oneshot::Sender<Result<RunReport, PipelineError>>,
}

/// Sequences stages and tracks the at-most-one running experiment.
///
/// Cheap to clone; every clone talks to the same worker.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl Orchestrator {
    /// Create the orchestrator and spawn its worker on the current runtime.
    pub fn new(source: ConfigSource, stages: Stages) -> Result<Self, PipelineError> {
        let store = ExperimentStore::new(source.experiment_file_path()?);
        warn_on_stale_run(&store);

        let shared = Arc::new(Shared {
            source,
            store,
            initialization_timestamp: current_time_stamp(),
            current: Mutex::new(Current {
                state: RunState::Idle,
                record: None,
            }),
        });

        let (jobs, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker_loop(rx, stages, Arc::clone(&shared)));

        Ok(Self { shared, jobs })
    }

    pub fn store(&self) -> &ExperimentStore {
        &self.shared.store
    }

    /// Start a run unless one is already in progress. Does not wait for it.
    ///
    /// Performs file I/O while holding the state lock; call it from a
    /// blocking context when on an async runtime.
    pub fn start(&self) -> Result<StartOutcome, PipelineError> {
        let mut current = self
            .shared
            .current
            .lock()
            .map_err(|_| PipelineError::LockPoisoned)?;

        if let Some(record) = current.record.as_ref().filter(|r| r.running) {
            info!(experiment_id = %record.experiment_id, "Pipeline already running");
            return Ok(StartOutcome::AlreadyRunning {
                experiment_id: record.experiment_id,
            });
        }

        let experiment_id = Uuid::new_v4();
        let previous = current.record.as_ref().map(|r| r.artifact_time_stamp.as_str());
        let (time_stamp, config) = self.claim_namespace(experiment_id, previous)?;

        let record = ExperimentRecord::started(
            experiment_id,
            &self.shared.initialization_timestamp,
            &time_stamp,
            &self.shared.store.path().display().to_string(),
            Local::now(),
        );
        self.shared.store.append(&record)?;

        let (reply, rx) = oneshot::channel();
        self.jobs
            .send(Job {
                record: record.clone(),
                config: Arc::new(config),
                reply,
            })
            .map_err(|_| PipelineError::WorkerUnavailable)?;

        info!(
            experiment_id = %experiment_id,
            artifact_time_stamp = %record.artifact_time_stamp,
            "Pipeline run started"
        );
        current.state = RunState::Running;
        current.record = Some(record);

        Ok(StartOutcome::Started {
            experiment_id,
            handle: RunHandle { experiment_id, rx },
        })
    }

    /// Pick an output namespace no earlier run has used.
    ///
    /// The timestamp only has second resolution, so a run started in the
    /// same second as the previous one (or over leftover directories) gets
    /// the short experiment id appended.
    fn claim_namespace(
        &self,
        experiment_id: Uuid,
        previous: Option<&str>,
    ) -> Result<(String, RunConfig), PipelineError> {
        let time_stamp = current_time_stamp();
        let config = self.shared.source.resolve(&time_stamp)?;
        let reused = previous.is_some_and(|p| p.starts_with(&time_stamp));
        if !reused && !config.namespace_in_use() {
            return Ok((time_stamp, config));
        }

        let id = experiment_id.simple().to_string();
        let unique = format!("{time_stamp}-{}", &id[..8]);
        warn!(
            artifact_time_stamp = %time_stamp,
            replacement = %unique,
            "Run namespace already taken"
        );
        let config = self.shared.source.resolve(&unique)?;
        Ok((unique, config))
    }

    /// The last `limit` experiment rows, oldest first.
    pub async fn status(&self, limit: usize) -> Result<Vec<ExperimentView>, PipelineError> {
        let rows = self.shared.store.call(move |s| s.read_recent(limit)).await?;
        Ok(rows.into_iter().map(ExperimentView::from).collect())
    }

    /// The last `limit` finished runs, oldest first.
    pub async fn completed_history(
        &self,
        limit: usize,
    ) -> Result<Vec<ExperimentView>, PipelineError> {
        let rows = self
            .shared
            .store
            .call(move |s| s.read_recent_completed(limit))
            .await?;
        Ok(rows.into_iter().map(ExperimentView::from).collect())
    }

    pub fn current(&self) -> Result<CurrentRun, PipelineError> {
        let current = self
            .shared
            .current
            .lock()
            .map_err(|_| PipelineError::LockPoisoned)?;
        Ok(CurrentRun {
            state: current.state,
            experiment: current.record.as_ref().map(ExperimentRecord::view),
        })
    }
}

fn warn_on_stale_run(store: &ExperimentStore) {
    match store.last_row() {
        Ok(Some(row)) if row.running => warn!(
            experiment_id = %row.experiment_id,
            path = %store.path().display(),
            "Last experiment never finished; the previous process likely exited mid-run"
        ),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Could not read experiment log"),
    }
}

async fn worker_loop(mut jobs: mpsc::UnboundedReceiver<Job>, stages: Stages, shared: Arc<Shared>) {
    while let Some(job) = jobs.recv().await {
        let Job {
            record,
            config,
            reply,
        } = job;
        let span = info_span!("run", experiment_id = %record.experiment_id);

        let report = async {
            let started = Instant::now();
            let outcome = run_stage_sequence(&stages, &config).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &outcome {
                Ok(_) => info!(elapsed_ms, "Pipeline run completed"),
                Err(e) => error!(stage = %e.stage, error = %e, elapsed_ms, "Pipeline run failed"),
            }
            finalize(&shared, &record, outcome).await
        }
        .instrument(span)
        .await;

        // The caller may have dropped its handle.
        let _ = reply.send(report);
    }
}

/// Run every stage in order, feeding artifacts forward.
///
/// Pusher runs only for an accepted model. The first failure aborts the
/// rest of the sequence.
pub async fn run_stage_sequence(
    stages: &Stages,
    config: &Arc<RunConfig>,
) -> Result<SequenceOutcome, StageError> {
    let ingestion = invoke(StageKind::Ingestion, &stages.ingestion, config, ()).await?;
    let validation = invoke(
        StageKind::Validation,
        &stages.validation,
        config,
        ingestion.clone(),
    )
    .await?;
    let transformation = invoke(
        StageKind::Transformation,
        &stages.transformation,
        config,
        TransformationInput {
            ingestion: ingestion.clone(),
            validation: validation.clone(),
        },
    )
    .await?;
    let training = invoke(StageKind::Training, &stages.training, config, transformation).await?;
    let evaluation = invoke(
        StageKind::Evaluation,
        &stages.evaluation,
        config,
        EvaluationInput {
            ingestion,
            validation,
            training: training.clone(),
        },
    )
    .await?;

    let pusher = if evaluation.is_model_accepted {
        Some(invoke(StageKind::Pusher, &stages.pusher, config, evaluation.clone()).await?)
    } else {
        info!(message = %evaluation.message, "Trained model rejected; skipping pusher");
        None
    };

    Ok(SequenceOutcome {
        training,
        evaluation,
        pusher,
    })
}

/// Run one stage on its own task so a panic fails the run instead of the worker.
async fn invoke<I, O>(
    kind: StageKind,
    stage: &DynStage<I, O>,
    config: &Arc<RunConfig>,
    input: I,
) -> Result<O, StageError>
where
    I: Send + 'static,
    O: Send + 'static,
{
    let stage = Arc::clone(stage);
    let config = Arc::clone(config);
    let started = Instant::now();
    info!(stage = %kind, "Stage started");

    let joined = tokio::spawn(
        async move { stage.initiate(&config, input).await }.instrument(tracing::Span::current()),
    )
    .await;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match joined {
        Ok(Ok(output)) => {
            info!(stage = %kind, elapsed_ms, "Stage completed");
            Ok(output)
        }
        Ok(Err(e)) => Err(StageError::new(kind, e)),
        Err(join_err) => Err(StageError::new(
            kind,
            anyhow!("stage panicked: {}", panic_message(join_err)),
        )),
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Persist the terminal record and clear the running flag.
async fn finalize(
    shared: &Arc<Shared>,
    started: &ExperimentRecord,
    outcome: Result<SequenceOutcome, StageError>,
) -> Result<RunReport, PipelineError> {
    let (state, finished) = match &outcome {
        Ok(done) => (
            RunState::Completed,
            started.finish(
                Local::now(),
                COMPLETED_MESSAGE,
                Some(RunMetrics {
                    accuracy: done.training.model_accuracy,
                    is_model_accepted: done.evaluation.is_model_accepted,
                }),
            ),
        ),
        Err(e) => (RunState::Failed, started.finish(Local::now(), e.to_string(), None)),
    };

    let row = finished.clone();
    let persisted = shared.store.call(move |s| s.append(&row)).await;
    if let Err(e) = &persisted {
        error!(error = %e, "Failed to persist finished experiment");
    }

    {
        let mut current = shared
            .current
            .lock()
            .map_err(|_| PipelineError::LockPoisoned)?;
        current.state = state;
        current.record = Some(finished.clone());
    }

    persisted?;
    Ok(RunReport {
        state,
        record: finished,
    })
}
