use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message stored on a run that went through every stage.
pub const COMPLETED_MESSAGE: &str = "Pipeline has been completed.";
/// Message stored on a freshly started run.
pub const STARTED_MESSAGE: &str = "Pipeline started.";

/// One run's identity, timing, outcome and final metrics.
///
/// A record is created when a run starts and replaced exactly once when it
/// finishes, through [`ExperimentRecord::finish`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub experiment_id: Uuid,
    pub initialization_timestamp: String,
    /// Namespace for this run's output directories.
    pub artifact_time_stamp: String,
    pub running: bool,
    pub start_time: DateTime<Local>,
    pub stop_time: Option<DateTime<Local>>,
    /// Milliseconds between `start_time` and `stop_time`.
    pub execution_time: Option<i64>,
    pub message: String,
    pub experiment_file_path: String,
    pub accuracy: Option<f64>,
    pub is_model_accepted: Option<bool>,
}

/// Terminal metrics of a run that went through every stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunMetrics {
    pub accuracy: f64,
    pub is_model_accepted: bool,
}

impl ExperimentRecord {
    pub fn started(
        experiment_id: Uuid,
        initialization_timestamp: &str,
        artifact_time_stamp: &str,
        experiment_file_path: &str,
        start_time: DateTime<Local>,
    ) -> Self {
        Self {
            experiment_id,
            initialization_timestamp: initialization_timestamp.to_string(),
            artifact_time_stamp: artifact_time_stamp.to_string(),
            running: true,
            start_time,
            stop_time: None,
            execution_time: None,
            message: STARTED_MESSAGE.to_string(),
            experiment_file_path: experiment_file_path.to_string(),
            accuracy: None,
            is_model_accepted: None,
        }
    }

    /// The terminal snapshot of this record.
    ///
    /// `metrics` is `Some` only for a run that completed every stage.
    pub fn finish(
        &self,
        stop_time: DateTime<Local>,
        message: impl Into<String>,
        metrics: Option<RunMetrics>,
    ) -> Self {
        let elapsed = (stop_time - self.start_time).num_milliseconds();
        Self {
            running: false,
            stop_time: Some(stop_time),
            execution_time: Some(elapsed),
            message: message.into(),
            accuracy: metrics.map(|m| m.accuracy),
            is_model_accepted: metrics.map(|m| m.is_model_accepted),
            ..self.clone()
        }
    }

    pub fn view(&self) -> ExperimentView {
        ExperimentView {
            experiment_id: self.experiment_id,
            artifact_time_stamp: self.artifact_time_stamp.clone(),
            running: self.running,
            start_time: self.start_time,
            stop_time: self.stop_time,
            execution_time: self.execution_time,
            message: self.message.clone(),
            accuracy: self.accuracy,
            is_model_accepted: self.is_model_accepted,
        }
    }
}

/// A persisted snapshot: the record plus the time the row was written.
///
/// Fields are spelled out rather than flattened; the csv crate cannot
/// deserialize typed values through `#[serde(flatten)]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRow {
    pub experiment_id: Uuid,
    pub initialization_timestamp: String,
    pub artifact_time_stamp: String,
    pub running: bool,
    pub start_time: DateTime<Local>,
    pub stop_time: Option<DateTime<Local>>,
    pub execution_time: Option<i64>,
    pub message: String,
    pub experiment_file_path: String,
    pub accuracy: Option<f64>,
    pub is_model_accepted: Option<bool>,
    pub created_time_stamp: DateTime<Local>,
}

impl ExperimentRow {
    pub fn new(record: &ExperimentRecord, created_time_stamp: DateTime<Local>) -> Self {
        let record = record.clone();
        Self {
            experiment_id: record.experiment_id,
            initialization_timestamp: record.initialization_timestamp,
            artifact_time_stamp: record.artifact_time_stamp,
            running: record.running,
            start_time: record.start_time,
            stop_time: record.stop_time,
            execution_time: record.execution_time,
            message: record.message,
            experiment_file_path: record.experiment_file_path,
            accuracy: record.accuracy,
            is_model_accepted: record.is_model_accepted,
            created_time_stamp,
        }
    }

    pub fn into_record(self) -> ExperimentRecord {
        ExperimentRecord {
            experiment_id: self.experiment_id,
            initialization_timestamp: self.initialization_timestamp,
            artifact_time_stamp: self.artifact_time_stamp,
            running: self.running,
            start_time: self.start_time,
            stop_time: self.stop_time,
            execution_time: self.execution_time,
            message: self.message,
            experiment_file_path: self.experiment_file_path,
            accuracy: self.accuracy,
            is_model_accepted: self.is_model_accepted,
        }
    }
}

/// What observers get back from a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentView {
    pub experiment_id: Uuid,
    pub artifact_time_stamp: String,
    pub running: bool,
    pub start_time: DateTime<Local>,
    pub stop_time: Option<DateTime<Local>>,
    pub execution_time: Option<i64>,
    pub message: String,
    pub accuracy: Option<f64>,
    pub is_model_accepted: Option<bool>,
}

impl From<ExperimentRow> for ExperimentView {
    fn from(row: ExperimentRow) -> Self {
        row.into_record().view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample() -> ExperimentRecord {
        ExperimentRecord::started(
            Uuid::new_v4(),
            "2024-05-01-10-00-00",
            "2024-05-01-10-05-00",
            "/tmp/experiment.csv",
            Local::now(),
        )
    }

    #[test]
    fn test_started_record_has_no_terminal_fields() {
        let record = sample();
        assert!(record.running);
        assert!(record.stop_time.is_none());
        assert!(record.execution_time.is_none());
        assert!(record.accuracy.is_none());
        assert!(record.is_model_accepted.is_none());
        assert_eq!(record.experiment_id.get_version_num(), 4);
    }

    #[test]
    fn test_started_record_keeps_given_id() {
        let id = Uuid::new_v4();
        let record = ExperimentRecord::started(id, "init", "ts", "experiment.csv", Local::now());
        assert_eq!(record.experiment_id, id);
    }

    #[test]
    fn test_finish_keeps_exact_difference_when_clock_steps_back() {
        let record = sample();
        let stop = record.start_time - Duration::milliseconds(250);
        let done = record.finish(stop, "pusher stage failed: disk full", None);
        assert_eq!(
            done.execution_time,
            Some((stop - record.start_time).num_milliseconds())
        );
        assert_eq!(done.execution_time, Some(-250));
    }

    #[test]
    fn test_finish_success_sets_metrics() {
        let record = sample();
        let stop = record.start_time + Duration::milliseconds(1500);
        let done = record.finish(
            stop,
            COMPLETED_MESSAGE,
            Some(RunMetrics {
                accuracy: 0.81,
                is_model_accepted: true,
            }),
        );

        assert!(!done.running);
        assert_eq!(done.stop_time, Some(stop));
        assert_eq!(done.execution_time, Some(1500));
        assert_eq!(done.accuracy, Some(0.81));
        assert_eq!(done.is_model_accepted, Some(true));
        assert_eq!(done.experiment_id, record.experiment_id);
        assert_eq!(done.start_time, record.start_time);
        // the started record is untouched
        assert!(record.running);
    }

    #[test]
    fn test_finish_failure_leaves_metrics_null() {
        let record = sample();
        let done = record.finish(
            record.start_time + Duration::seconds(2),
            "training stage failed: accuracy too low",
            None,
        );
        assert!(!done.running);
        assert_eq!(done.execution_time, Some(2000));
        assert!(done.accuracy.is_none());
        assert!(done.is_model_accepted.is_none());
        assert!(done.message.contains("training"));
    }

    #[test]
    fn test_row_roundtrip_preserves_record() {
        let record = sample();
        let row = ExperimentRow::new(&record, Local::now());
        assert_eq!(row.into_record(), record);
    }

    #[test]
    fn test_view_omits_internal_columns() {
        let view = serde_json::to_value(sample().view()).unwrap();
        let obj = view.as_object().unwrap();
        assert!(obj.contains_key("experiment_id"));
        assert!(obj.contains_key("running"));
        assert!(!obj.contains_key("experiment_file_path"));
        assert!(!obj.contains_key("initialization_timestamp"));
        assert!(!obj.contains_key("created_time_stamp"));
    }
}
