use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of audited actions (spec §3 "AuditEvent").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    View,
    Download,
    Search,
    Edit,
    Delete,
    Upload,
    Share,
    Print,
    Export,
    Create,
}

/// Append-only audit record emitted on every authentication event and every
/// protected resource access (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: String,
    pub allowed: bool,
    pub ip_address: String,
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: HashMap<String, String>,
}
