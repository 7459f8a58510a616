use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Batch lifecycle (spec §3 "Batch").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Open,
    Sealed,
    Merged,
}

/// A named grouping `(owner, year, doc_type, batch_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub owner: String,
    pub year: u16,
    pub doc_type: String,
    pub batch_id: String,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub sealed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
}

impl Batch {
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            crate::models::Page::slug(&self.owner),
            self.year,
            self.doc_type,
            crate::models::Page::slug(&self.batch_id)
        )
    }
}
