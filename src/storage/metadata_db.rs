//! Ties the object storage backends to the metadata DB (spec §4.5
//! "Consistency"): a successful `put` must be durable before the metadata
//! row is written; a successful `delete` removes both transactionally from
//! the caller's viewpoint.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::error::{RepositoryError, StorageError};
use crate::models::{StoredObject, Version};
use crate::repository::{DieselDbContext, ObjectRepository, VersionRepository};

use super::{ObjectStorage, PutOutcome, StorageResult};

/// Combines a backend (`ObjectStorage`) with the metadata DB so callers get
/// one `put`/`get`/`delete` surface with object+version bookkeeping for
/// free.
pub struct MetadataBackedStorage {
    backend: Arc<dyn ObjectStorage>,
    db: Arc<DieselDbContext>,
}

impl MetadataBackedStorage {
    pub fn new(backend: Arc<dyn ObjectStorage>, db: Arc<DieselDbContext>) -> Self {
        Self { backend, db }
    }

    pub fn backend(&self) -> &Arc<dyn ObjectStorage> {
        &self.backend
    }

    /// Store bytes, then record the object + version rows. If the metadata
    /// write fails after the object is durably stored, the error is logged
    /// and the bytes remain retrievable; the next `list` call reconciles
    /// from the backend (spec §4.5).
    pub async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
        storage_class: Option<String>,
        created_by: Option<String>,
    ) -> StorageResult<PutOutcome> {
        let outcome = self
            .backend
            .put(key, bytes.clone(), content_type, metadata.clone(), storage_class.clone())
            .await?;

        let now = Utc::now();
        let stored = StoredObject {
            object_key: key.to_string(),
            size: bytes.len() as u64,
            content_type: content_type.to_string(),
            etag: outcome.etag.clone(),
            version_id: outcome.version_id.clone(),
            storage_backend: self.backend.backend_name().to_string(),
            storage_class,
            metadata,
            last_modified: now,
        };

        if let Err(e) = self.db_object_repo().upsert(&stored).await {
            tracing::warn!(error = %e, key, "metadata row write failed after durable put; will reconcile on next list");
            return Ok(outcome);
        }

        if outcome.created_new_version {
            let version = Version {
                object_key: key.to_string(),
                version_id: outcome.version_id.clone(),
                size: stored.size,
                etag: outcome.etag.clone(),
                is_latest: true,
                created_by,
                comment: None,
                tags: vec![],
                created_at: now,
            };
            if let Err(e) = self.db_version_repo().insert(&version).await {
                tracing::warn!(error = %e, key, "version row write failed after durable put");
            }
        }

        Ok(outcome)
    }

    pub async fn delete(&self, key: &str, version_id: Option<&str>) -> StorageResult<()> {
        self.backend.delete(key, version_id).await?;
        if version_id.is_none() {
            if let Err(e) = self.db_object_repo().delete(key).await {
                tracing::warn!(error = %e, key, "metadata row delete failed; will reconcile on next list");
            }
        }
        Ok(())
    }

    /// Reconcile the metadata DB's `objects` table against the backend for
    /// everything under `prefix`: any key the backend has but the DB is
    /// missing is re-upserted.
    pub async fn reconcile(&self, prefix: &str) -> StorageResult<usize> {
        let descriptors = self.backend.list(prefix, usize::MAX, 0).await?;
        let mut repaired = 0;
        for descriptor in descriptors {
            let exists = self
                .db_object_repo()
                .find(&descriptor.key)
                .await
                .map_err(storage_err)?
                .is_some();
            if !exists {
                let stored = StoredObject {
                    object_key: descriptor.key.clone(),
                    size: descriptor.size,
                    content_type: descriptor.content_type,
                    etag: descriptor.etag,
                    version_id: String::new(),
                    storage_backend: self.backend.backend_name().to_string(),
                    storage_class: None,
                    metadata: HashMap::new(),
                    last_modified: descriptor.last_modified,
                };
                self.db_object_repo().upsert(&stored).await.map_err(storage_err)?;
                repaired += 1;
            }
        }
        Ok(repaired)
    }

    fn db_object_repo(&self) -> ObjectRepository<'_> {
        ObjectRepository(&self.db)
    }

    fn db_version_repo(&self) -> VersionRepository<'_> {
        VersionRepository(&self.db)
    }
}

fn storage_err(e: RepositoryError) -> StorageError {
    StorageError::BackendUnavailable(e.to_string())
}
