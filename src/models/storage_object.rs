use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Storage-layer entity (spec §3 "StoredObject").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredObject {
    pub object_key: String,
    pub size: u64,
    pub content_type: String,
    pub etag: String,
    pub version_id: String,
    pub storage_backend: String,
    pub storage_class: Option<String>,
    pub metadata: HashMap<String, String>,
    pub last_modified: DateTime<Utc>,
}

/// Historical snapshot of an object (spec §3 "Version").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub object_key: String,
    pub version_id: String,
    pub size: u64,
    pub etag: String,
    pub is_latest: bool,
    pub created_by: Option<String>,
    pub comment: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}
