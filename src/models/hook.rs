use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of hook delivery target (spec §3 "HookRegistration").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookType {
    Webhook,
    Callback,
    FileLog,
}

/// A registered integration hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookRegistration {
    pub name: String,
    pub hook_type: HookType,
    /// Webhook URL, callback registry key, or log file path, depending on `hook_type`.
    pub target: String,
    pub method: Option<String>,
    pub headers: Vec<(String, String)>,
    /// Subset of the lifecycle event set this hook is interested in.
    pub event_filter: Vec<String>,
    pub retry_count: u32,
    pub timeout_secs: u64,
}

/// One execution record, emitted per fire (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookExecution {
    pub hook_name: String,
    pub event: String,
    pub object_key: Option<String>,
    pub success: bool,
    pub execution_time_ms: u64,
    pub response_or_error: Option<String>,
    pub timestamp: DateTime<Utc>,
}
