//! Durable append-only log of QC task state transitions (spec §4.2, §5).
//!
//! One JSON record per line (JSONL), matching the persisted-state layout's
//! `qc_queue.jsonl`. State on startup is rebuilt by replaying the log and
//! folding later transitions over earlier ones, keyed by `task_id`.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::QcError;
use crate::models::QcTask;

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTransition {
    pub task: QcTask,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

/// Single-writer, multi-reader durable log backing the QC task queue.
///
/// Writes are serialised through an internal mutex; reads come from the
/// in-memory projection rebuilt at open time and kept current by
/// `append`, matching the "single-writer, multi-reader" resource model
/// of spec §5.
pub struct QcTaskLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl QcTaskLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Replay the log, folding later transitions over earlier ones for the
    /// same `task_id`, and return the resulting projection in file order
    /// (oldest `task_id` first insertion order preserved via `BTreeMap`
    /// keyed by task_id for deterministic iteration).
    pub fn replay(&self) -> std::io::Result<BTreeMap<String, QcTask>> {
        let mut state = BTreeMap::new();
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(state),
            Err(e) => return Err(e),
        };
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TaskTransition>(line) {
                Ok(transition) => {
                    state.insert(transition.task.task_id.clone(), transition.task);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed qc log line");
                }
            }
        }
        Ok(state)
    }

    /// Append one transition record, fsync'd before returning. Synchronous
    /// by design: the log is the durability boundary and callers (the
    /// in-process `QcTaskQueue`) already serialise through their own state
    /// mutex, so a blocking write here never competes with itself.
    pub fn append(&self, task: &QcTask) -> Result<(), QcError> {
        let _guard = self.write_lock.lock().unwrap();
        let record = TaskTransition {
            task: task.clone(),
            recorded_at: chrono::Utc::now(),
        };
        let line = serde_json::to_string(&record).map_err(|e| QcError::LogAppend(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QcError::LogAppend(e.to_string()))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| QcError::LogAppend(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| QcError::LogAppend(e.to_string()))?;
        file.sync_all().map_err(|e| QcError::LogAppend(e.to_string()))?;
        Ok(())
    }
}

/// Daily-rotating feedback log, `feedback/qc_feedback_YYYY-MM-DD.jsonl`
/// (spec §6 persisted state layout).
pub struct FeedbackLog {
    base_dir: PathBuf,
}

impl FeedbackLog {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, date: chrono::NaiveDate) -> PathBuf {
        self.base_dir.join(format!("qc_feedback_{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// Append a feedback record. Must be called after the task's terminal
    /// transition has already been appended and fsynced (Open Question 3,
    /// `SPEC_FULL.md` §1).
    pub async fn append(&self, record: &crate::models::FeedbackRecord) -> Result<(), QcError> {
        let path = self.path_for(record.timestamp.date_naive());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| QcError::LogAppend(e.to_string()))?;
        }
        let line = serde_json::to_string(record).map_err(|e| QcError::LogAppend(e.to_string()))?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| QcError::LogAppend(e.to_string()))?;
        file.write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| QcError::LogAppend(e.to_string()))?;
        file.sync_all().await.map_err(|e| QcError::LogAppend(e.to_string()))?;
        Ok(())
    }

    /// Read every rotated daily log back in, for the `/api/qc/feedback/stats`
    /// and `/api/qc/operator/{id}/stats` aggregates. Malformed lines are
    /// skipped, matching `QcTaskLog::replay`'s tolerance of a torn write.
    pub async fn read_all(&self) -> std::io::Result<Vec<crate::models::FeedbackRecord>> {
        let mut records = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e),
        };
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                paths.push(path);
            }
        }
        paths.sort();
        for path in paths {
            let contents = tokio::fs::read_to_string(&path).await?;
            for line in contents.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str(line) {
                    Ok(record) => records.push(record),
                    Err(e) => tracing::warn!(error = %e, path = %path.display(), "skipping malformed feedback log line"),
                }
            }
        }
        Ok(records)
    }
}

pub fn default_log_path(data_dir: &Path) -> PathBuf {
    data_dir.join("qc_queue.jsonl")
}

pub fn default_feedback_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("feedback")
}
