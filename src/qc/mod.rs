//! QC task queue (spec §4.2): holds pending tasks, assigns them to
//! operators with exclusive locks, and persists task state across restarts.

pub mod log;

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::error::QcError;
use crate::models::{
    FeedbackRecord, Page, Priority, QcTask, QcTaskStatus, Severity, Verdict, VerdictAction,
};

use self::log::{FeedbackLog, QcTaskLog};

const LOCK_DURATION_MINUTES: i64 = 30;

/// Aggregate counts returned by `stats()`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QcStats {
    pub by_status: HashMap<String, u64>,
    pub by_severity: HashMap<String, u64>,
    pub by_priority: HashMap<String, u64>,
    pub total: u64,
}

/// In-memory projection of QC tasks, backed by a durable append-only log.
///
/// The in-memory map is the single source of truth for reads; every
/// mutation is written through to the log before the in-memory state is
/// updated, and the whole operation is serialised by `state` (spec §5:
/// "QC task log: single-writer, multi-reader; writes serialised").
pub struct QcTaskQueue {
    state: Mutex<HashMap<String, QcTask>>,
    log: QcTaskLog,
    feedback_log: FeedbackLog,
}

impl QcTaskQueue {
    /// Rebuild state by replaying the durable log.
    pub fn open(log: QcTaskLog, feedback_log: FeedbackLog) -> std::io::Result<Self> {
        let state = log.replay()?;
        Ok(Self {
            state: Mutex::new(state),
            log,
            feedback_log,
        })
    }

    fn default_priority(severity: Severity) -> Priority {
        match severity {
            Severity::Manual => Priority::High,
            Severity::Qc => Priority::Medium,
            Severity::Auto => Priority::Low,
        }
    }

    /// Idempotent on `page_id`: re-enqueuing a page that already has a
    /// non-terminal task returns the existing id. An `escalated` task is
    /// terminal for its cycle (spec §4.2), so escalating twice allocates a
    /// fresh CRITICAL-priority task rather than handing back the stale one.
    ///
    /// Snapshots `page`'s doc type, OCR text, field map, and image
    /// reference onto the task at creation time (spec §3 "QCTask"), so
    /// `submit()` can later report the pre-correction state regardless of
    /// what the operator's verdict contains.
    pub fn enqueue(
        &self,
        page: &Page,
        severity: Severity,
        reasons: Vec<String>,
        priority: Option<Priority>,
    ) -> Result<String, QcError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .values()
            .find(|t| t.page_id == page.page_id && !t.status.is_terminal())
        {
            return Ok(existing.task_id.clone());
        }

        let task = QcTask {
            task_id: Uuid::new_v4().to_string(),
            page_id: page.page_id.clone(),
            severity,
            priority: priority.unwrap_or_else(|| Self::default_priority(severity)),
            status: QcTaskStatus::Pending,
            created_at: Utc::now(),
            assigned_to: None,
            lock_holder: None,
            lock_expires_at: None,
            routing_reasons: reasons,
            original_doc_type: page.doc_type,
            image_ref: page.image_key.clone(),
            ocr_snapshot: page.ocr_text.clone(),
            field_snapshot: page.fields.clone(),
        };
        self.log.append(&task)?;
        let task_id = task.task_id.clone();
        state.insert(task_id.clone(), task);
        Ok(task_id)
    }

    /// Select the highest-priority non-completed task whose lock is free
    /// or expired, atomically assign it to `operator_id`.
    pub fn next_task(&self, operator_id: &str) -> Result<Option<QcTask>, QcError> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();

        let candidate_id = state
            .values()
            .filter(|t| !t.status.is_terminal() && t.lock_is_free(now))
            .min_by(|a, b| {
                // Highest priority first (reverse ord), then created_at ascending (FIFO).
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.created_at.cmp(&b.created_at))
            })
            .map(|t| t.task_id.clone());

        let Some(task_id) = candidate_id else {
            return Ok(None);
        };

        let task = state.get_mut(&task_id).unwrap();
        task.assigned_to = Some(operator_id.to_string());
        task.lock_holder = Some(operator_id.to_string());
        task.lock_expires_at = Some(now + ChronoDuration::minutes(LOCK_DURATION_MINUTES));
        task.status = QcTaskStatus::Assigned;
        self.log.append(task)?;
        Ok(Some(task.clone()))
    }

    /// Apply a verdict to a task. `operator_id` must match the current
    /// lock holder (or the lock must be expired) or the call fails with
    /// `QcError::LockConflict`.
    pub async fn submit(&self, task_id: &str, verdict: Verdict) -> Result<QcTask, QcError> {
        let original_doc_type;
        let page_id;
        let updated_task = {
            let mut state = self.state.lock().unwrap();
            let task = state
                .get_mut(task_id)
                .ok_or_else(|| QcError::NotFound(task_id.to_string()))?;

            if task.status.is_terminal() {
                return Err(QcError::AlreadyTerminal);
            }

            let now = Utc::now();
            let holder_matches = task
                .lock_holder
                .as_deref()
                .map(|h| h == verdict.operator_id)
                .unwrap_or(false);
            if !holder_matches && !task.lock_is_free(now) {
                return Err(QcError::LockConflict);
            }

            match verdict.action {
                VerdictAction::Approve => {
                    task.status = QcTaskStatus::Completed;
                    task.lock_holder = None;
                    task.lock_expires_at = None;
                }
                VerdictAction::Reject => {
                    task.status = QcTaskStatus::Rejected;
                    task.lock_holder = None;
                    task.lock_expires_at = None;
                }
                VerdictAction::Escalate => {
                    task.priority = Priority::Critical;
                    task.status = QcTaskStatus::Escalated;
                    task.lock_holder = None;
                    task.lock_expires_at = None;
                }
                VerdictAction::Release => {
                    task.status = QcTaskStatus::Pending;
                    task.assigned_to = None;
                    task.lock_holder = None;
                    task.lock_expires_at = None;
                }
            }

            self.log.append(task)?;
            page_id = task.page_id.clone();
            original_doc_type = task.original_doc_type;
            task.clone()
        };

        // FeedbackRecord is appended only after the terminal transition
        // record above has been appended and fsynced (Open Question 3).
        if matches!(verdict.action, VerdictAction::Approve | VerdictAction::Reject) {
            let record = FeedbackRecord {
                task_id: task_id.to_string(),
                page_id,
                operator_id: verdict.operator_id.clone(),
                original_doc_type,
                corrected_doc_type: verdict.corrected_doc_type.unwrap_or(original_doc_type),
                field_corrections: verdict.field_corrections,
                issue_categories: verdict.issue_categories,
                operator_confidence: verdict.operator_confidence,
                time_spent_seconds: verdict.time_spent_seconds,
                approved: verdict.approved,
                escalated: false,
                timestamp: Utc::now(),
            };
            self.feedback_log
                .append(&record)
                .await
                .map_err(|e| QcError::LogAppend(e.to_string()))?;
        }

        Ok(updated_task)
    }

    /// Aggregate counts by status / severity / priority.
    pub fn stats(&self) -> QcStats {
        let state = self.state.lock().unwrap();
        let mut stats = QcStats {
            total: state.len() as u64,
            ..Default::default()
        };
        for task in state.values() {
            *stats.by_status.entry(format!("{:?}", task.status)).or_insert(0) += 1;
            *stats.by_severity.entry(format!("{:?}", task.severity)).or_insert(0) += 1;
            *stats.by_priority.entry(format!("{:?}", task.priority)).or_insert(0) += 1;
        }
        stats
    }

    pub fn get(&self, task_id: &str) -> Option<QcTask> {
        self.state.lock().unwrap().get(task_id).cloned()
    }

    /// Non-completed tasks, optionally filtered by severity, oldest first.
    pub fn pending(&self, severity: Option<Severity>, limit: usize) -> Vec<QcTask> {
        let state = self.state.lock().unwrap();
        let mut tasks: Vec<QcTask> = state
            .values()
            .filter(|t| !t.status.is_terminal())
            .filter(|t| severity.map(|s| s == t.severity).unwrap_or(true))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        tasks.truncate(limit);
        tasks
    }

    /// Per-operator task counts, for `/api/qc/operator/{id}/stats`.
    pub fn operator_stats(&self, operator_id: &str) -> OperatorStats {
        let state = self.state.lock().unwrap();
        let mut stats = OperatorStats::default();
        for task in state.values() {
            if task.assigned_to.as_deref() != Some(operator_id) {
                continue;
            }
            stats.total_assigned += 1;
            match task.status {
                QcTaskStatus::Completed => stats.completed += 1,
                QcTaskStatus::Rejected => stats.rejected += 1,
                QcTaskStatus::Escalated => stats.escalated += 1,
                QcTaskStatus::Assigned | QcTaskStatus::InProgress => stats.in_progress += 1,
                _ => {}
            }
        }
        stats
    }

    pub async fn feedback_records(&self) -> std::io::Result<Vec<FeedbackRecord>> {
        self.feedback_log.read_all().await
    }
}

/// Aggregate counts for one operator, across all tasks ever assigned to
/// them (the in-memory projection, not the durable log — matches the
/// bound of `stats()`).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct OperatorStats {
    pub total_assigned: u64,
    pub completed: u64,
    pub rejected: u64,
    pub escalated: u64,
    pub in_progress: u64,
}

/// Aggregate counts derived from the feedback record stream, for
/// `/api/qc/feedback/stats`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FeedbackStats {
    pub total: u64,
    pub approved: u64,
    pub escalated: u64,
    pub avg_operator_confidence: f64,
    pub avg_time_spent_seconds: f64,
    pub by_issue_category: HashMap<String, u64>,
}

pub fn summarize_feedback(records: &[FeedbackRecord]) -> FeedbackStats {
    if records.is_empty() {
        return FeedbackStats::default();
    }
    let mut stats = FeedbackStats {
        total: records.len() as u64,
        ..Default::default()
    };
    let mut confidence_sum = 0.0;
    let mut time_sum = 0.0;
    for record in records {
        if record.approved {
            stats.approved += 1;
        }
        if record.escalated {
            stats.escalated += 1;
        }
        confidence_sum += record.operator_confidence as f64;
        time_sum += record.time_spent_seconds as f64;
        for category in &record.issue_categories {
            *stats.by_issue_category.entry(category.clone()).or_default() += 1;
        }
    }
    stats.avg_operator_confidence = confidence_sum / records.len() as f64;
    stats.avg_time_spent_seconds = time_sum / records.len() as f64;
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_queue(dir: &std::path::Path) -> QcTaskQueue {
        let log = QcTaskLog::new(log::default_log_path(dir));
        let feedback = FeedbackLog::new(log::default_feedback_dir(dir));
        QcTaskQueue::open(log, feedback).unwrap()
    }

    fn test_page(page_id: &str) -> Page {
        Page {
            page_id: page_id.to_string(),
            owner: "acme".to_string(),
            year: 2024,
            doc_type: crate::models::DocType::Invoice,
            batch_id: "batch-1".to_string(),
            ocr_text: "total: $42.00".to_string(),
            fields: HashMap::new(),
            classification: crate::models::Classification {
                label: crate::models::DocType::Invoice,
                confidence: 0.6,
            },
            qc_status: crate::models::QcStatus::Pending,
            sensitivity: crate::models::Sensitivity::Internal,
            original_sensitivity: crate::models::Sensitivity::Internal,
            image_key: Some(format!("acme/2024/invoice/batch-1/{page_id}.png")),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn enqueue_is_idempotent_on_page_id() {
        let dir = tempdir().unwrap();
        let queue = new_queue(dir.path());
        let id1 = queue
            .enqueue(&test_page("PAGE_1"), Severity::Qc, vec!["low_conf".into()], None)
            .unwrap();
        let id2 = queue
            .enqueue(&test_page("PAGE_1"), Severity::Qc, vec!["low_conf".into()], None)
            .unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn next_task_locks_exclusively() {
        let dir = tempdir().unwrap();
        let queue = new_queue(dir.path());
        queue.enqueue(&test_page("PAGE_1"), Severity::Qc, vec![], None).unwrap();

        let task = queue.next_task("alice").unwrap().unwrap();
        assert_eq!(task.lock_holder.as_deref(), Some("alice"));
        assert_eq!(task.status, QcTaskStatus::Assigned);

        // bob must not receive the same task while alice holds the lock.
        let next_for_bob = queue.next_task("bob").unwrap();
        assert!(next_for_bob.is_none());
    }

    #[tokio::test]
    async fn submit_from_non_holder_is_lock_conflict() {
        let dir = tempdir().unwrap();
        let queue = new_queue(dir.path());
        queue.enqueue(&test_page("PAGE_1"), Severity::Qc, vec![], None).unwrap();
        let task = queue.next_task("alice").unwrap().unwrap();

        let verdict = Verdict {
            operator_id: "bob".to_string(),
            approved: true,
            corrected_doc_type: None,
            field_corrections: vec![],
            issue_categories: vec![],
            operator_confidence: 0.9,
            time_spent_seconds: 10,
            notes: None,
            action: VerdictAction::Approve,
        };
        let result = queue.submit(&task.task_id, verdict).await;
        assert!(matches!(result, Err(QcError::LockConflict)));
    }

    #[tokio::test]
    async fn approve_transitions_to_completed_and_writes_one_feedback_record() {
        let dir = tempdir().unwrap();
        let queue = new_queue(dir.path());
        queue.enqueue(&test_page("PAGE_1"), Severity::Qc, vec![], None).unwrap();
        let task = queue.next_task("alice").unwrap().unwrap();

        let verdict = Verdict {
            operator_id: "alice".to_string(),
            approved: true,
            corrected_doc_type: Some(crate::models::DocType::Invoice),
            field_corrections: vec![],
            issue_categories: vec![],
            operator_confidence: 0.95,
            time_spent_seconds: 42,
            notes: None,
            action: VerdictAction::Approve,
        };
        let updated = queue.submit(&task.task_id, verdict).await.unwrap();
        assert_eq!(updated.status, QcTaskStatus::Completed);

        let feedback_dir = log::default_feedback_dir(dir.path());
        let entries: Vec<_> = std::fs::read_dir(&feedback_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn reopening_replays_log() {
        let dir = tempdir().unwrap();
        {
            let queue = new_queue(dir.path());
            queue.enqueue(&test_page("PAGE_1"), Severity::Manual, vec![], None).unwrap();
        }
        let queue = new_queue(dir.path());
        assert_eq!(queue.stats().total, 1);
    }

    #[tokio::test]
    async fn operator_stats_counts_only_that_operators_tasks() {
        let dir = tempdir().unwrap();
        let queue = new_queue(dir.path());
        queue.enqueue(&test_page("PAGE_1"), Severity::Qc, vec![], None).unwrap();
        queue.enqueue(&test_page("PAGE_2"), Severity::Qc, vec![], None).unwrap();
        let t1 = queue.next_task("alice").unwrap().unwrap();
        queue.next_task("bob").unwrap().unwrap();

        queue
            .submit(
                &t1.task_id,
                Verdict {
                    operator_id: "alice".to_string(),
                    approved: true,
                    corrected_doc_type: None,
                    field_corrections: vec![],
                    issue_categories: vec![],
                    operator_confidence: 0.9,
                    time_spent_seconds: 10,
                    notes: None,
                    action: VerdictAction::Approve,
                },
            )
            .await
            .unwrap();

        let alice_stats = queue.operator_stats("alice");
        assert_eq!(alice_stats.total_assigned, 1);
        assert_eq!(alice_stats.completed, 1);

        let bob_stats = queue.operator_stats("bob");
        assert_eq!(bob_stats.total_assigned, 1);
        assert_eq!(bob_stats.in_progress, 1);
    }

    #[tokio::test]
    async fn feedback_record_keeps_pre_correction_doc_type_distinct_from_corrected() {
        let dir = tempdir().unwrap();
        let queue = new_queue(dir.path());
        // test_page() defaults to Invoice; the operator corrects it to Receipt.
        queue.enqueue(&test_page("PAGE_1"), Severity::Qc, vec![], None).unwrap();
        let task = queue.next_task("alice").unwrap().unwrap();

        queue
            .submit(
                &task.task_id,
                Verdict {
                    operator_id: "alice".to_string(),
                    approved: true,
                    corrected_doc_type: Some(crate::models::DocType::Receipt),
                    field_corrections: vec![],
                    issue_categories: vec![],
                    operator_confidence: 0.9,
                    time_spent_seconds: 12,
                    notes: None,
                    action: VerdictAction::Approve,
                },
            )
            .await
            .unwrap();

        let records = queue.feedback_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].original_doc_type, crate::models::DocType::Invoice);
        assert_eq!(records[0].corrected_doc_type, crate::models::DocType::Receipt);
    }

    #[test]
    fn summarize_feedback_computes_averages_and_category_counts() {
        let records = vec![
            FeedbackRecord {
                task_id: "t1".into(),
                page_id: "p1".into(),
                operator_id: "alice".into(),
                original_doc_type: crate::models::DocType::Invoice,
                corrected_doc_type: crate::models::DocType::Invoice,
                field_corrections: vec![],
                issue_categories: vec!["low_quality_scan".into()],
                operator_confidence: 0.8,
                time_spent_seconds: 30,
                approved: true,
                escalated: false,
                timestamp: Utc::now(),
            },
            FeedbackRecord {
                task_id: "t2".into(),
                page_id: "p2".into(),
                operator_id: "bob".into(),
                original_doc_type: crate::models::DocType::Receipt,
                corrected_doc_type: crate::models::DocType::Invoice,
                field_corrections: vec![],
                issue_categories: vec!["wrong_doc_type".into()],
                operator_confidence: 0.6,
                time_spent_seconds: 60,
                approved: false,
                escalated: false,
                timestamp: Utc::now(),
            },
        ];
        let stats = summarize_feedback(&records);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.approved, 1);
        assert!((stats.avg_operator_confidence - 0.7).abs() < 1e-9);
        assert_eq!(stats.by_issue_category.get("wrong_doc_type"), Some(&1));
    }
}
