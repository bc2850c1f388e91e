use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use super::record::{ExperimentRecord, ExperimentRow};
use crate::errors::StoreError;

/// Append-only CSV log of experiment snapshots.
///
/// The file only grows. Every append takes an advisory exclusive lock on the
/// file, every read a shared one, so a CLI `status` never sees a half-written
/// row from a server in the same project directory.
#[derive(Debug, Clone)]
pub struct ExperimentStore {
    path: PathBuf,
}

impl ExperimentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_err(&self, source: csv::Error) -> StoreError {
        StoreError::Csv {
            path: self.path.clone(),
            source,
        }
    }

    /// Append one snapshot of `record`, stamped with the current time.
    pub fn append(&self, record: &ExperimentRecord) -> Result<(), StoreError> {
        self.append_row(&ExperimentRow::new(record, chrono::Local::now()))
    }

    pub fn append_row(&self, row: &ExperimentRow) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        file.lock_exclusive().map_err(|e| self.io_err(e))?;

        let result = self.write_locked(&file, row);
        let unlocked = FileExt::unlock(&file).map_err(|e| self.io_err(e));
        result.and(unlocked)
    }

    fn write_locked(&self, file: &File, row: &ExperimentRow) -> Result<(), StoreError> {
        // Checked under the lock so two writers never both emit a header.
        let is_empty = file.metadata().map_err(|e| self.io_err(e))?.len() == 0;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_empty)
            .from_writer(file);
        writer.serialize(row).map_err(|e| self.csv_err(e))?;
        writer.flush().map_err(|e| self.io_err(e))?;
        Ok(())
    }

    /// Every row in write order; empty when the log does not exist yet.
    pub fn read_all(&self) -> Result<Vec<ExperimentRow>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(e)),
        };
        file.lock_shared().map_err(|e| self.io_err(e))?;

        let mut reader = csv::Reader::from_reader(&file);
        let rows: Result<Vec<ExperimentRow>, _> = reader.deserialize().collect();
        let unlocked = FileExt::unlock(&file).map_err(|e| self.io_err(e));
        let rows = rows.map_err(|e| self.csv_err(e))?;
        unlocked?;
        Ok(rows)
    }

    /// The last `n` rows, oldest first.
    pub fn read_recent(&self, n: usize) -> Result<Vec<ExperimentRow>, StoreError> {
        Ok(tail(self.read_all()?, n))
    }

    /// The last `n` rows with `running = false`, oldest first.
    pub fn read_recent_completed(&self, n: usize) -> Result<Vec<ExperimentRow>, StoreError> {
        let finished = self
            .read_all()?
            .into_iter()
            .filter(|row| !row.running)
            .collect();
        Ok(tail(finished, n))
    }

    pub fn last_row(&self) -> Result<Option<ExperimentRow>, StoreError> {
        Ok(self.read_all()?.pop())
    }

    /// Run a store operation on the blocking pool.
    pub async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&ExperimentStore) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|_| StoreError::TaskPanicked)?
    }
}

fn tail<T>(mut rows: Vec<T>, n: usize) -> Vec<T> {
    let skip = rows.len().saturating_sub(n);
    rows.drain(..skip);
    rows
}
