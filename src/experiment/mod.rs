//! Experiment tracking: one record per run, persisted to an append-only log.

pub mod record;
pub mod store;

pub use record::{
    COMPLETED_MESSAGE, ExperimentRecord, ExperimentRow, ExperimentView, RunMetrics,
};
pub use store::ExperimentStore;
