//! Task-keyed progress memory.

use std::path::PathBuf;
use std::sync::Arc;

use super::backend::{InMemoryBackend, JsonDirBackend, ProgressBackend, ProgressError};
use super::record::{NewIteration, ProgressRecord};
use crate::agent::TaskStatus;

/// Append-only memory of iterations, errors and learnings per task.
///
/// Every write is a read-modify-write of a single task's record. One task id
/// is owned by one running loop, so no cross-writer locking is needed.
#[derive(Clone)]
pub struct ProgressStore {
    backend: Arc<dyn ProgressBackend>,
}

impl ProgressStore {
    pub fn new(backend: Arc<dyn ProgressBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by one JSON file per task under `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(JsonDirBackend::new(dir)))
    }

    /// Non-durable store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()))
    }

    /// Current record, or an empty pending one if the task is unknown.
    pub fn progress(&self, task_id: &str) -> Result<ProgressRecord, ProgressError> {
        Ok(self
            .backend
            .load(task_id)?
            .unwrap_or_else(|| ProgressRecord::new(task_id)))
    }

    fn update<F>(&self, task_id: &str, apply: F) -> Result<ProgressRecord, ProgressError>
    where
        F: FnOnce(&mut ProgressRecord),
    {
        let mut record = self.progress(task_id)?;
        apply(&mut record);
        record.touch();
        self.backend.save(&record)?;
        Ok(record)
    }

    pub fn record_iteration(
        &self,
        task_id: &str,
        iteration: NewIteration,
    ) -> Result<ProgressRecord, ProgressError> {
        self.update(task_id, |record| record.push_iteration(iteration))
    }

    pub fn record_error(
        &self,
        task_id: &str,
        error: &str,
        context: &str,
    ) -> Result<(), ProgressError> {
        self.update(task_id, |record| record.push_error(error, context))
            .map(|_| ())
    }

    pub fn record_learning(&self, task_id: &str, learning: &str) -> Result<(), ProgressError> {
        self.update(task_id, |record| record.push_learning(learning))
            .map(|_| ())
    }

    pub fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<(), ProgressError> {
        self.update(task_id, |record| record.set_status(status))
            .map(|_| ())
    }

    /// Rendered working memory for prompts. See [`ProgressRecord::digest`].
    pub fn memory_digest(&self, task_id: &str) -> Result<String, ProgressError> {
        Ok(self.progress(task_id)?.digest())
    }

    pub fn all_tasks(&self) -> Result<Vec<ProgressRecord>, ProgressError> {
        self.backend.list()
    }

    /// Bulk reset. The only operation that removes records.
    pub fn clear_all(&self) -> Result<(), ProgressError> {
        tracing::warn!("clearing all progress records");
        self.backend.clear()
    }
}
