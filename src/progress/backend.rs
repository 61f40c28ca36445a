//! Storage backends for progress records.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use super::record::ProgressRecord;

/// Progress persistence errors.
#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("IO error on {path}: {message}")]
    Io { path: String, message: String },
    #[error("Parse error in {path}: {message}")]
    Parse { path: String, message: String },
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Progress backend lock poisoned")]
    Poisoned,
}

impl ProgressError {
    fn io(path: &Path, err: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// Key/value persistence keyed by task id.
///
/// `load` never fails for a missing key; it returns `Ok(None)`.
pub trait ProgressBackend: Send + Sync {
    fn load(&self, task_id: &str) -> Result<Option<ProgressRecord>, ProgressError>;
    fn save(&self, record: &ProgressRecord) -> Result<(), ProgressError>;
    fn list(&self) -> Result<Vec<ProgressRecord>, ProgressError>;
    fn clear(&self) -> Result<(), ProgressError>;
}

/// One pretty-printed JSON file per task under a directory.
#[derive(Debug, Clone)]
pub struct JsonDirBackend {
    dir: PathBuf,
}

impl JsonDirBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the record for `task_id`.
    pub fn path_for(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(task_id)))
    }

    fn read_record(path: &Path) -> Result<ProgressRecord, ProgressError> {
        let content = fs::read_to_string(path).map_err(|e| ProgressError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| ProgressError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

impl ProgressBackend for JsonDirBackend {
    fn load(&self, task_id: &str) -> Result<Option<ProgressRecord>, ProgressError> {
        let path = self.path_for(task_id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_record(&path).map(Some)
    }

    fn save(&self, record: &ProgressRecord) -> Result<(), ProgressError> {
        fs::create_dir_all(&self.dir).map_err(|e| ProgressError::io(&self.dir, e))?;

        let content = serde_json::to_string_pretty(record)
            .map_err(|e| ProgressError::Serialize(e.to_string()))?;

        // Write-then-rename so a crash never leaves a half-written record.
        let path = self.path_for(&record.task_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(|e| ProgressError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| ProgressError::io(&path, e))
    }

    fn list(&self) -> Result<Vec<ProgressRecord>, ProgressError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|e| ProgressError::io(&self.dir, e))?;
        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| ProgressError::io(&self.dir, e))?.path();
            if path.extension().map(|ext| ext == "json").unwrap_or(false) {
                records.push(Self::read_record(&path)?);
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    fn clear(&self) -> Result<(), ProgressError> {
        if !self.dir.exists() {
            return Ok(());
        }
        let entries = fs::read_dir(&self.dir).map_err(|e| ProgressError::io(&self.dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| ProgressError::io(&self.dir, e))?.path();
            if path.extension().map(|ext| ext == "json").unwrap_or(false) {
                fs::remove_file(&path).map_err(|e| ProgressError::io(&path, e))?;
            }
        }
        Ok(())
    }
}

/// Map a task id to a file stem. Ids made only of `[A-Za-z0-9._-]` are used
/// verbatim; anything else is hex-encoded behind a `~` so two ids never share
/// a file.
fn file_stem(task_id: &str) -> String {
    let safe = !task_id.is_empty()
        && !task_id.starts_with('.')
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if safe {
        return task_id.to_string();
    }
    let hex: String = task_id.bytes().map(|b| format!("{:02x}", b)).collect();
    format!("~{}", hex)
}

/// Process-local backend, used in tests and for ephemeral runs.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    records: Mutex<HashMap<String, ProgressRecord>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressBackend for InMemoryBackend {
    fn load(&self, task_id: &str) -> Result<Option<ProgressRecord>, ProgressError> {
        let records = self.records.lock().map_err(|_| ProgressError::Poisoned)?;
        Ok(records.get(task_id).cloned())
    }

    fn save(&self, record: &ProgressRecord) -> Result<(), ProgressError> {
        let mut records = self.records.lock().map_err(|_| ProgressError::Poisoned)?;
        records.insert(record.task_id.clone(), record.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<ProgressRecord>, ProgressError> {
        let records = self.records.lock().map_err(|_| ProgressError::Poisoned)?;
        let mut all: Vec<ProgressRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    fn clear(&self) -> Result<(), ProgressError> {
        let mut records = self.records.lock().map_err(|_| ProgressError::Poisoned)?;
        records.clear();
        Ok(())
    }
}
