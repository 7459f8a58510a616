//! Storage abstraction (spec §4.5): a uniform object interface over a local
//! filesystem backend and an S3-compatible backend, backed by a metadata
//! database holding object, version, audit, and hook records.

pub mod local;
pub mod metadata_db;
#[cfg(feature = "s3")]
pub mod s3;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

pub type StorageResult<T> = Result<T, StorageError>;

/// A stored object's bytes plus its resolved metadata.
pub struct ObjectPayload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
    pub etag: String,
    pub version_id: String,
}

/// Descriptor returned by `list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
}

/// Result of a `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub version_id: String,
    pub etag: String,
    /// False when the etag matched the existing latest version and no new
    /// version was created (idempotent `put`, spec §5).
    pub created_new_version: bool,
}

/// Uniform object interface (spec §4.5). Implemented by the local
/// filesystem backend and, behind the `s3` feature, the S3-compatible
/// backend.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
        storage_class: Option<String>,
    ) -> StorageResult<PutOutcome>;

    async fn get(&self, key: &str, version_id: Option<&str>) -> StorageResult<ObjectPayload>;

    async fn delete(&self, key: &str, version_id: Option<&str>) -> StorageResult<()>;

    async fn list(&self, prefix: &str, limit: usize, offset: usize) -> StorageResult<Vec<ObjectDescriptor>>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    async fn copy(&self, src_key: &str, dst_key: &str) -> StorageResult<()>;

    async fn list_versions(&self, key: &str) -> StorageResult<Vec<crate::models::Version>>;

    /// A presigned URL (S3) or `file://` URL (local).
    async fn url(&self, key: &str, expires_in: Option<std::time::Duration>) -> StorageResult<String>;

    fn backend_name(&self) -> &'static str;
}

/// Strong content hash used as an object's etag (spec §4.5 "Integrity").
pub fn compute_etag(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Monotonically increasing, sortable, collision-free version id:
/// millisecond timestamp plus a random suffix.
pub fn new_version_id() -> String {
    let now = Utc::now();
    let suffix: u32 = rand::random();
    format!("{}-{:08x}", now.timestamp_millis(), suffix)
}

pub const MAX_PRESIGN_TTL: std::time::Duration = std::time::Duration::from_secs(7 * 24 * 60 * 60);
