//! Local filesystem storage backend (spec §4.5).
//!
//! ```text
//! base/
//!   objects/<key>            # current version
//!   .versions/<key>/<vid>    # historical versions
//!   .metadata/<key>.json     # JSON sidecar with etag, content_type, tags
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::StorageError;

use super::{compute_etag, new_version_id, ObjectDescriptor, ObjectPayload, ObjectStorage, PutOutcome, StorageResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct SidecarMetadata {
    etag: String,
    content_type: String,
    version_id: String,
    tags: HashMap<String, String>,
    versions: Vec<VersionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionEntry {
    version_id: String,
    etag: String,
    size: u64,
    created_at: chrono::DateTime<Utc>,
    comment: Option<String>,
    tagged: bool,
}

/// Filesystem-backed object store with per-key version history.
///
/// Writes to the same key are serialised via a per-key entry in `locks`
/// (spec §4.3/§5 "writes serialise per directory"; generalised here to
/// per-key since the storage layer has no directory concept beyond the key
/// itself).
pub struct LocalStorage {
    base: PathBuf,
    max_versions_per_object: usize,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl LocalStorage {
    pub fn new(base: impl Into<PathBuf>, max_versions_per_object: usize) -> Self {
        Self {
            base: base.into(),
            max_versions_per_object,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn objects_path(&self, key: &str) -> PathBuf {
        self.base.join("objects").join(key)
    }

    fn versions_dir(&self, key: &str) -> PathBuf {
        self.base.join(".versions").join(key)
    }

    fn version_path(&self, key: &str, version_id: &str) -> PathBuf {
        self.versions_dir(key).join(version_id)
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.base.join(".metadata").join(format!("{key}.json"))
    }

    async fn read_metadata(&self, key: &str) -> StorageResult<Option<SidecarMetadata>> {
        let path = self.metadata_path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let meta = serde_json::from_slice(&bytes)
                    .map_err(|e| StorageError::Integrity(format!("corrupt metadata for {key}: {e}")))?;
                Ok(Some(meta))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e.to_string())),
        }
    }

    async fn write_metadata(&self, key: &str, meta: &SidecarMetadata) -> StorageResult<()> {
        let path = self.metadata_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }
        let bytes = serde_json::to_vec_pretty(meta).map_err(|e| StorageError::Io(e.to_string()))?;
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
        file.write_all(&bytes).await.map_err(|e| StorageError::Io(e.to_string()))?;
        file.sync_all().await.map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Prune the oldest untagged versions beyond `max_versions_per_object`.
    async fn prune(&self, key: &str, meta: &mut SidecarMetadata) -> StorageResult<()> {
        if self.max_versions_per_object == 0 {
            return Ok(());
        }
        let mut untagged: Vec<usize> = meta
            .versions
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.tagged)
            .map(|(i, _)| i)
            .collect();
        // oldest-first within the untagged subset
        untagged.sort_by_key(|&i| meta.versions[i].created_at);

        let total_untagged = untagged.len();
        if total_untagged <= self.max_versions_per_object {
            return Ok(());
        }
        let to_remove = total_untagged - self.max_versions_per_object;
        let remove_indices: Vec<usize> = untagged.into_iter().take(to_remove).collect();
        let mut removed_version_ids = Vec::new();
        for &idx in &remove_indices {
            removed_version_ids.push(meta.versions[idx].version_id.clone());
        }
        meta.versions.retain(|v| !removed_version_ids.contains(&v.version_id));
        for vid in removed_version_ids {
            let path = self.version_path(key, &vid);
            let _ = tokio::fs::remove_file(path).await;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
        _storage_class: Option<String>,
    ) -> StorageResult<PutOutcome> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let etag = compute_etag(&bytes);
        let existing = self.read_metadata(key).await?;

        if let Some(existing) = &existing {
            if existing.etag == etag {
                // Idempotent put: identical bytes at the same key create no
                // new version (spec §5).
                return Ok(PutOutcome {
                    version_id: existing.version_id.clone(),
                    etag,
                    created_new_version: false,
                });
            }
            // Newest etag wins; the previous content becomes a historical
            // version (resolved Open Question, `SPEC_FULL.md` §1).
            let prev_path = self.version_path(key, &existing.version_id);
            if let Some(parent) = prev_path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| StorageError::Io(e.to_string()))?;
            }
            if self.objects_path(key).exists() {
                tokio::fs::copy(self.objects_path(key), &prev_path)
                    .await
                    .map_err(|e| StorageError::Io(e.to_string()))?;
            }
        }

        let version_id = new_version_id();
        let obj_path = self.objects_path(key);
        if let Some(parent) = obj_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| StorageError::Io(e.to_string()))?;
        }
        let mut file = tokio::fs::File::create(&obj_path)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
        file.write_all(&bytes).await.map_err(|e| StorageError::Io(e.to_string()))?;
        file.sync_all().await.map_err(|e| StorageError::Io(e.to_string()))?;

        let mut meta = existing.unwrap_or_default();
        meta.etag = etag.clone();
        meta.content_type = content_type.to_string();
        meta.version_id = version_id.clone();
        meta.tags = metadata;
        meta.versions.push(VersionEntry {
            version_id: version_id.clone(),
            etag: etag.clone(),
            size: bytes.len() as u64,
            created_at: Utc::now(),
            comment: None,
            tagged: false,
        });
        self.prune(key, &mut meta).await?;
        self.write_metadata(key, &meta).await?;

        Ok(PutOutcome {
            version_id,
            etag,
            created_new_version: true,
        })
    }

    async fn get(&self, key: &str, version_id: Option<&str>) -> StorageResult<ObjectPayload> {
        let meta = self
            .read_metadata(key)
            .await?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        let path = match version_id {
            None | Some("") => self.objects_path(key),
            Some(vid) if vid == meta.version_id => self.objects_path(key),
            Some(vid) => self.version_path(key, vid),
        };

        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e.to_string())
            }
        })?;

        let etag = compute_etag(&bytes);
        Ok(ObjectPayload {
            bytes,
            content_type: meta.content_type,
            metadata: meta.tags,
            etag,
            version_id: version_id.unwrap_or(&meta.version_id).to_string(),
        })
    }

    async fn delete(&self, key: &str, version_id: Option<&str>) -> StorageResult<()> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        match version_id {
            None => {
                let _ = tokio::fs::remove_file(self.objects_path(key)).await;
                let _ = tokio::fs::remove_dir_all(self.versions_dir(key)).await;
                let _ = tokio::fs::remove_file(self.metadata_path(key)).await;
            }
            Some(vid) => {
                let mut meta = self
                    .read_metadata(key)
                    .await?
                    .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
                if vid == meta.version_id {
                    return Err(StorageError::Integrity(
                        "cannot delete the latest version directly".to_string(),
                    ));
                }
                meta.versions.retain(|v| v.version_id != vid);
                let _ = tokio::fs::remove_file(self.version_path(key, vid)).await;
                self.write_metadata(key, &meta).await?;
            }
        }
        Ok(())
    }

    async fn list(&self, prefix: &str, limit: usize, offset: usize) -> StorageResult<Vec<ObjectDescriptor>> {
        let root = self.base.join("objects");
        let mut out = Vec::new();
        if !root.exists() {
            return Ok(out);
        }
        let mut stack = vec![root.clone()];
        let mut all = Vec::new();
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| StorageError::Io(e.to_string()))?;
            while let Some(entry) = entries.next_entry().await.map_err(|e| StorageError::Io(e.to_string()))? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    let rel = path.strip_prefix(&root).unwrap().to_string_lossy().replace('\\', "/");
                    if rel.starts_with(prefix) {
                        all.push(rel);
                    }
                }
            }
        }
        all.sort();
        for key in all.into_iter().skip(offset).take(limit) {
            if let Some(meta) = self.read_metadata(&key).await? {
                let fs_meta = tokio::fs::metadata(self.objects_path(&key))
                    .await
                    .map_err(|e| StorageError::Io(e.to_string()))?;
                out.push(ObjectDescriptor {
                    key,
                    size: fs_meta.len(),
                    etag: meta.etag,
                    content_type: meta.content_type,
                    last_modified: fs_meta.modified().map(chrono::DateTime::from).unwrap_or_else(|_| Utc::now()),
                });
            }
        }
        Ok(out)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects_path(key).exists())
    }

    async fn copy(&self, src_key: &str, dst_key: &str) -> StorageResult<()> {
        let payload = self.get(src_key, None).await?;
        self.put(dst_key, payload.bytes, &payload.content_type, payload.metadata, None)
            .await?;
        Ok(())
    }

    async fn list_versions(&self, key: &str) -> StorageResult<Vec<crate::models::Version>> {
        let meta = self
            .read_metadata(key)
            .await?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        let mut versions: Vec<crate::models::Version> = meta
            .versions
            .iter()
            .map(|v| crate::models::Version {
                object_key: key.to_string(),
                version_id: v.version_id.clone(),
                size: v.size,
                etag: v.etag.clone(),
                is_latest: v.version_id == meta.version_id,
                created_by: None,
                comment: v.comment.clone(),
                tags: if v.tagged { vec!["tagged".to_string()] } else { vec![] },
                created_at: v.created_at,
            })
            .collect();
        // latest first
        versions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(versions)
    }

    async fn url(&self, key: &str, _expires_in: Option<std::time::Duration>) -> StorageResult<String> {
        let path = self.objects_path(key);
        Ok(format!("file://{}", path.to_string_lossy()))
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

/// Path helper shared with the archive organiser for writing artefacts
/// directly under `data/archive/...` without going through the generic
/// `put` versioning machinery (used for merged PDFs/sidecars, spec §6).
pub fn archive_path(archive_root: &Path, relative_key: &str) -> PathBuf {
    archive_root.join(relative_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn storage(dir: &Path) -> LocalStorage {
        LocalStorage::new(dir, 10)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let s = storage(dir.path());
        let outcome = s
            .put("a/b.txt", b"hello".to_vec(), "text/plain", HashMap::new(), None)
            .await
            .unwrap();
        assert!(outcome.created_new_version);
        let payload = s.get("a/b.txt", None).await.unwrap();
        assert_eq!(payload.bytes, b"hello");
    }

    #[tokio::test]
    async fn put_same_bytes_twice_creates_no_new_version() {
        let dir = tempdir().unwrap();
        let s = storage(dir.path());
        s.put("k", b"data".to_vec(), "text/plain", HashMap::new(), None)
            .await
            .unwrap();
        let second = s
            .put("k", b"data".to_vec(), "text/plain", HashMap::new(), None)
            .await
            .unwrap();
        assert!(!second.created_new_version);
        let versions = s.list_versions("k").await.unwrap();
        assert_eq!(versions.len(), 1);
    }

    #[tokio::test]
    async fn changed_bytes_create_new_version_latest_first() {
        let dir = tempdir().unwrap();
        let s = storage(dir.path());
        s.put("k", b"v1".to_vec(), "text/plain", HashMap::new(), None)
            .await
            .unwrap();
        s.put("k", b"v2".to_vec(), "text/plain", HashMap::new(), None)
            .await
            .unwrap();
        let versions = s.list_versions("k").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[0].is_latest);
        let payload = s.get("k", None).await.unwrap();
        assert_eq!(payload.bytes, b"v2");
    }

    #[tokio::test]
    async fn pruning_retains_newest_n_versions() {
        let dir = tempdir().unwrap();
        let s = LocalStorage::new(dir.path(), 2);
        for i in 0..5u8 {
            s.put("k", vec![i], "application/octet-stream", HashMap::new(), None)
                .await
                .unwrap();
        }
        let versions = s.list_versions("k").await.unwrap();
        assert_eq!(versions.len(), 2);
    }
}
