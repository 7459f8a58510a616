use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of document types (spec §GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Invoice,
    Receipt,
    Contract,
    Form,
    Letter,
    Memo,
    Report,
    Other,
}

impl DocType {
    /// The legal/sensitive subset referenced by routing rule 1 (§4.1).
    pub fn is_legal_sensitive(&self) -> bool {
        matches!(self, DocType::Contract | DocType::Report)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Invoice => "invoice",
            DocType::Receipt => "receipt",
            DocType::Contract => "contract",
            DocType::Form => "form",
            DocType::Letter => "letter",
            DocType::Memo => "memo",
            DocType::Report => "report",
            DocType::Other => "other",
        }
    }

    /// Title-case form used in merged-artefact filenames (`{DocType}_{BatchID}.pdf`).
    pub fn title_case(&self) -> &'static str {
        match self {
            DocType::Invoice => "Invoice",
            DocType::Receipt => "Receipt",
            DocType::Contract => "Contract",
            DocType::Form => "Form",
            DocType::Letter => "Letter",
            DocType::Memo => "Memo",
            DocType::Report => "Report",
            DocType::Other => "Other",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "invoice" => Ok(DocType::Invoice),
            "receipt" => Ok(DocType::Receipt),
            "contract" => Ok(DocType::Contract),
            "form" => Ok(DocType::Form),
            "letter" => Ok(DocType::Letter),
            "memo" => Ok(DocType::Memo),
            "report" => Ok(DocType::Report),
            "other" => Ok(DocType::Other),
            other => Err(format!("unknown doc_type: {other}")),
        }
    }
}

/// Routing verdict (spec §GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Auto,
    Manual,
    Qc,
}

/// QC lifecycle status of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QcStatus {
    Pending,
    Approved,
    Rejected,
    Escalated,
}

/// Document confidentiality / user clearance scale (0..3), spec §GLOSSARY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Sensitivity {
    Public = 0,
    Internal = 1,
    Confidential = 2,
    Restricted = 3,
}

impl Sensitivity {
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Sensitivity::Public,
            1 => Sensitivity::Internal,
            2 => Sensitivity::Confidential,
            _ => Sensitivity::Restricted,
        }
    }

    pub fn level(&self) -> u8 {
        *self as u8
    }
}

/// A single extracted field with its confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: String,
    pub confidence: f32,
}

/// Classifier output: a label and its confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub label: DocType,
    pub confidence: f32,
}

/// The atomic archival unit (spec §3 "Page").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub page_id: String,
    pub owner: String,
    pub year: u16,
    pub doc_type: DocType,
    pub batch_id: String,
    pub ocr_text: String,
    pub fields: HashMap<String, FieldValue>,
    pub classification: Classification,
    pub qc_status: QcStatus,
    pub sensitivity: Sensitivity,
    /// Sensitivity before any PII-driven escalation (§4.6), for audit purposes.
    pub original_sensitivity: Sensitivity,
    pub image_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Page {
    /// Slugified owner/year/doc_type path components used to build the
    /// canonical storage key (§4.3). Lowercase alphanumerics and dashes;
    /// everything else is stripped.
    pub fn slug(input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut last_was_dash = false;
        for ch in input.chars() {
            if ch.is_ascii_alphanumeric() {
                out.push(ch.to_ascii_lowercase());
                last_was_dash = false;
            } else if !last_was_dash && !out.is_empty() {
                out.push('-');
                last_was_dash = true;
            }
        }
        while out.ends_with('-') {
            out.pop();
        }
        out
    }

    /// Canonical directory prefix `{owner}/{year}/{doc_type}/{batch_id}`.
    pub fn canonical_prefix(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            Self::slug(&self.owner),
            self.year,
            self.doc_type.as_str(),
            Self::slug(&self.batch_id)
        )
    }

    /// Canonical key for the given artefact extension, per §4.3.
    pub fn canonical_key(&self, ext: &str) -> String {
        format!("{}/{}.{}", self.canonical_prefix(), self.page_id, ext)
    }
}
