use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// QC task urgency (spec §GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// QC task state machine (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QcTaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Rejected,
    Escalated,
    Released,
}

impl QcTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QcTaskStatus::Completed | QcTaskStatus::Rejected | QcTaskStatus::Escalated
        )
    }
}

/// One-to-one with a page routed to manual/qc (spec §3 "QCTask").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcTask {
    pub task_id: String,
    pub page_id: String,
    pub severity: crate::models::Severity,
    pub priority: Priority,
    pub status: QcTaskStatus,
    pub created_at: DateTime<Utc>,
    pub assigned_to: Option<String>,
    pub lock_holder: Option<String>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub routing_reasons: Vec<String>,
    /// Doc type the page carried at enqueue time, before any operator correction.
    pub original_doc_type: crate::models::DocType,
    /// Reference to the page's archived image, if one was attached at ingest.
    pub image_ref: Option<String>,
    pub ocr_snapshot: String,
    pub field_snapshot: std::collections::HashMap<String, crate::models::FieldValue>,
}

impl QcTask {
    /// A held lock is treated as released once it has expired (spec §3, §5).
    pub fn lock_is_free(&self, now: DateTime<Utc>) -> bool {
        match (&self.lock_holder, &self.lock_expires_at) {
            (None, _) => true,
            (Some(_), Some(expires)) => *expires <= now,
            (Some(_), None) => false,
        }
    }
}

/// A single field correction captured during QC (spec §3 "FeedbackRecord").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldCorrection {
    pub field: String,
    pub before: String,
    pub after: String,
    pub operator_confidence: f32,
    pub note: Option<String>,
}

/// Action taken on a `submit` call (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictAction {
    Approve,
    Reject,
    Escalate,
    Release,
}

/// The verdict payload passed to `QCTaskQueue::submit` (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub operator_id: String,
    pub approved: bool,
    pub corrected_doc_type: Option<crate::models::DocType>,
    pub field_corrections: Vec<FieldCorrection>,
    pub issue_categories: Vec<String>,
    pub operator_confidence: f32,
    pub time_spent_seconds: u64,
    pub notes: Option<String>,
    pub action: VerdictAction,
}

/// Immutable, append-only QC decision record (spec §3 "FeedbackRecord").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub task_id: String,
    pub page_id: String,
    pub operator_id: String,
    pub original_doc_type: crate::models::DocType,
    pub corrected_doc_type: crate::models::DocType,
    pub field_corrections: Vec<FieldCorrection>,
    pub issue_categories: Vec<String>,
    pub operator_confidence: f32,
    pub time_spent_seconds: u64,
    pub approved: bool,
    pub escalated: bool,
    pub timestamp: DateTime<Utc>,
}
