//! Batch lifecycle registry (spec §3 "Batch"): tracks the `open -> sealed
//! -> merged` state each batch moves through, persisted as a JSON sidecar
//! alongside the batch's pages so it survives restarts the same way page
//! metadata does.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{ArchiveError, StorageError};
use crate::models::{Batch, BatchStatus, DocType, Page};
use crate::storage::ObjectStorage;

const BATCH_RECORD_NAME: &str = "_batch.json";

fn batch_key(owner: &str, year: u16, doc_type: DocType, batch_id: &str) -> String {
    format!(
        "{}/{}/{}/{}/{}",
        Page::slug(owner),
        year,
        doc_type.as_str(),
        Page::slug(batch_id),
        BATCH_RECORD_NAME
    )
}

/// Owns the batch-sealing state machine. `ArchiveOrganiser` consults it
/// before accepting a new page into a batch; `BatchMerger` consults it
/// before merging one.
pub struct BatchRegistry {
    storage: Arc<dyn ObjectStorage>,
}

impl BatchRegistry {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self { storage }
    }

    async fn read(&self, key: &str) -> Result<Option<Batch>, ArchiveError> {
        match self.storage.get(key, None).await {
            Ok(payload) => {
                let batch = serde_json::from_slice(&payload.bytes).map_err(|e| ArchiveError::Io(e.to_string()))?;
                Ok(Some(batch))
            }
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, batch: &Batch) -> Result<(), ArchiveError> {
        let bytes = serde_json::to_vec_pretty(batch).map_err(|e| ArchiveError::Io(e.to_string()))?;
        self.storage
            .put(key, bytes, "application/json", Default::default(), None)
            .await?;
        Ok(())
    }

    /// The batch's current record, creating it in `open` state on first
    /// reference (spec §3 "Batch": "`open` (accepting pages)").
    pub async fn get_or_open(&self, owner: &str, year: u16, doc_type: DocType, batch_id: &str) -> Result<Batch, ArchiveError> {
        let key = batch_key(owner, year, doc_type, batch_id);
        if let Some(batch) = self.read(&key).await? {
            return Ok(batch);
        }
        let batch = Batch {
            owner: owner.to_string(),
            year,
            doc_type: doc_type.as_str().to_string(),
            batch_id: batch_id.to_string(),
            status: BatchStatus::Open,
            created_at: Utc::now(),
            sealed_at: None,
            merged_at: None,
        };
        self.write(&key, &batch).await?;
        Ok(batch)
    }

    /// The batch's current record, failing if no page has ever been
    /// archived into it.
    pub async fn get(&self, owner: &str, year: u16, doc_type: DocType, batch_id: &str) -> Result<Batch, ArchiveError> {
        let key = batch_key(owner, year, doc_type, batch_id);
        self.read(&key)
            .await?
            .ok_or_else(|| ArchiveError::PageNotFound(format!("batch {batch_id} has no pages yet")))
    }

    /// `open -> sealed`, making the batch merge-eligible and closed to new
    /// pages (spec §3). Idempotent on an already-sealed batch; rejected on
    /// one that has already been merged, since the lifecycle only moves
    /// forward.
    pub async fn seal(&self, owner: &str, year: u16, doc_type: DocType, batch_id: &str) -> Result<Batch, ArchiveError> {
        let key = batch_key(owner, year, doc_type, batch_id);
        let mut batch = self.get_or_open(owner, year, doc_type, batch_id).await?;
        match batch.status {
            BatchStatus::Open => {
                batch.status = BatchStatus::Sealed;
                batch.sealed_at = Some(Utc::now());
                self.write(&key, &batch).await?;
                Ok(batch)
            }
            BatchStatus::Sealed => Ok(batch),
            BatchStatus::Merged => Err(ArchiveError::BatchAlreadyMerged(batch_id.to_string())),
        }
    }

    /// `sealed -> merged`, called once the merger has written its
    /// artefacts. A no-op if the batch is already marked merged, so
    /// re-running merge on an unchanged batch doesn't touch this record's
    /// `merged_at` a second time (spec §4.4 "Idempotence").
    pub async fn mark_merged(&self, owner: &str, year: u16, doc_type: DocType, batch_id: &str) -> Result<Batch, ArchiveError> {
        let key = batch_key(owner, year, doc_type, batch_id);
        let mut batch = self.get(owner, year, doc_type, batch_id).await?;
        if batch.status != BatchStatus::Merged {
            batch.status = BatchStatus::Merged;
            batch.merged_at = Some(Utc::now());
            self.write(&key, &batch).await?;
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::LocalStorage;

    fn registry() -> (BatchRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn ObjectStorage> = Arc::new(LocalStorage::new(dir.path().to_path_buf(), 5));
        (BatchRegistry::new(storage), dir)
    }

    #[tokio::test]
    async fn get_or_open_defaults_to_open() {
        let (registry, _dir) = registry();
        let batch = registry.get_or_open("acme", 2024, DocType::Invoice, "B1").await.unwrap();
        assert_eq!(batch.status, BatchStatus::Open);
        assert!(batch.sealed_at.is_none());
    }

    #[tokio::test]
    async fn seal_is_idempotent_and_blocks_after_merge() {
        let (registry, _dir) = registry();
        registry.get_or_open("acme", 2024, DocType::Invoice, "B1").await.unwrap();

        let sealed_once = registry.seal("acme", 2024, DocType::Invoice, "B1").await.unwrap();
        assert_eq!(sealed_once.status, BatchStatus::Sealed);
        let sealed_again = registry.seal("acme", 2024, DocType::Invoice, "B1").await.unwrap();
        assert_eq!(sealed_again.sealed_at, sealed_once.sealed_at);

        registry.mark_merged("acme", 2024, DocType::Invoice, "B1").await.unwrap();
        let err = registry.seal("acme", 2024, DocType::Invoice, "B1").await.unwrap_err();
        assert!(matches!(err, ArchiveError::BatchAlreadyMerged(_)));
    }

    #[tokio::test]
    async fn mark_merged_does_not_move_merged_at_on_replay() {
        let (registry, _dir) = registry();
        registry.get_or_open("acme", 2024, DocType::Invoice, "B1").await.unwrap();
        registry.seal("acme", 2024, DocType::Invoice, "B1").await.unwrap();

        let first = registry.mark_merged("acme", 2024, DocType::Invoice, "B1").await.unwrap();
        let second = registry.mark_merged("acme", 2024, DocType::Invoice, "B1").await.unwrap();
        assert_eq!(first.merged_at, second.merged_at);
    }
}
