//! Archive organiser (spec §4.3): assigns canonical storage keys, persists
//! page artefacts through the storage abstraction, and keeps a full-text +
//! structured index over everything that has been archived.

pub mod batch;
pub mod index;
pub mod thumbnail;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::ArchiveError;
use crate::models::{BatchStatus, DocType, Page, QcStatus};
use crate::storage::{ObjectPayload, ObjectStorage, PutOutcome};

use self::batch::BatchRegistry;
use self::index::{ArchiveIndex, SearchQuery};
use self::thumbnail::ThumbnailSize;

const METADATA_EXT: &str = "json";

/// Result of archiving one page's artefacts.
#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    pub metadata_key: String,
    pub image_key: Option<String>,
    pub metadata_version: PutOutcome,
    /// False if the index update failed and the page was instead marked
    /// dirty for a later background reindex (spec §4.3 "Failure semantics").
    pub indexed: bool,
}

/// Owns canonical key assignment, per-shard write serialization, and the
/// in-memory index built over everything durably persisted through
/// `storage`.
pub struct ArchiveOrganiser {
    storage: Arc<dyn ObjectStorage>,
    index: Arc<ArchiveIndex>,
    /// One lock per canonical directory shard (`owner/year/doc_type/batch_id`)
    /// so concurrent writes to different batches never block each other,
    /// matching the per-key locking pattern used by the local storage
    /// backend.
    shard_locks: dashmap::DashMap<String, Arc<Mutex<()>>>,
    /// page_id -> canonical prefix, so a page can be located without a
    /// full index scan.
    page_keys: dashmap::DashMap<String, String>,
    batches: Arc<BatchRegistry>,
}

impl ArchiveOrganiser {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        let batches = Arc::new(BatchRegistry::new(storage.clone()));
        Self {
            storage,
            index: Arc::new(ArchiveIndex::new()),
            shard_locks: dashmap::DashMap::new(),
            page_keys: dashmap::DashMap::new(),
            batches,
        }
    }

    /// Handle to the backing store, for callers (the batch merger) that
    /// need to read/write artefacts alongside the pages the organiser
    /// already manages.
    pub fn storage_handle(&self) -> Arc<dyn ObjectStorage> {
        self.storage.clone()
    }

    /// Handle to the batch lifecycle registry, for the batch merger and
    /// the seal endpoint.
    pub fn batch_registry(&self) -> Arc<BatchRegistry> {
        self.batches.clone()
    }

    fn shard_lock(&self, shard_key: &str) -> Arc<Mutex<()>> {
        self.shard_locks
            .entry(shard_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Persist a page's metadata (and, if present, its source image) under
    /// its canonical key, then update the index. Artefact persistence and
    /// index update are deliberately not atomic: if the index update fails
    /// after the artefact write has already succeeded, the page is marked
    /// dirty for a background reindex rather than failing the whole
    /// operation (spec §4.3).
    pub async fn archive(&self, page: &Page, image: Option<(Vec<u8>, String)>) -> Result<ArchiveOutcome, ArchiveError> {
        let mut page = page.clone();
        let findings = crate::auth::scan_for_pii(&page.ocr_text);
        page.sensitivity = crate::auth::escalate_if_needed(page.sensitivity, &findings);
        let page = &page;

        let shard_key = page.canonical_prefix();
        let lock = self.shard_lock(&shard_key);
        let _guard = lock.lock().await;

        // A page already tracked under this id is a correction to an
        // existing archive entry, not a new arrival, so it's let through
        // even once the batch has been sealed. A page seen for the first
        // time must land in an `open` batch (spec §3 "Batch": "open
        // (accepting pages)").
        let is_new_page = !self.page_keys.contains_key(&page.page_id);
        let batch = self
            .batches
            .get_or_open(&page.owner, page.year, page.doc_type, &page.batch_id)
            .await?;
        if is_new_page && batch.status != BatchStatus::Open {
            return Err(ArchiveError::BatchNotOpen(page.batch_id.clone()));
        }

        let metadata_key = page.canonical_key(METADATA_EXT);
        let body = serde_json::to_vec_pretty(page).map_err(|e| ArchiveError::Io(e.to_string()))?;
        let metadata_version = self
            .storage
            .put(&metadata_key, body, "application/json", HashMap::new(), None)
            .await?;

        let image_key = if let Some((bytes, content_type)) = image {
            let ext = extension_for(&content_type);
            let key = page.canonical_key(ext);
            self.storage.put(&key, bytes, &content_type, HashMap::new(), None).await?;
            Some(key)
        } else {
            None
        };

        self.page_keys.insert(page.page_id.clone(), shard_key);
        self.index.index_page(page).await;

        Ok(ArchiveOutcome {
            metadata_key,
            image_key,
            metadata_version,
            indexed: true,
        })
    }

    /// Record that a page was persisted but its index entry is stale
    /// (caller observed an index failure it chose not to fail the request
    /// over). `reindex` will clear the flag.
    pub async fn mark_dirty(&self, page: &Page) {
        self.index.mark_dirty(page).await;
    }

    pub async fn get_page(&self, page_id: &str) -> Result<Page, ArchiveError> {
        let shard_key = self
            .page_keys
            .get(page_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| ArchiveError::PageNotFound(page_id.to_string()))?;
        let key = format!("{shard_key}/{page_id}.{METADATA_EXT}");
        let payload = self.storage.get(&key, None).await?;
        serde_json::from_slice(&payload.bytes).map_err(|e| ArchiveError::Io(e.to_string()))
    }

    pub async fn search(&self, query: &SearchQuery) -> Vec<index::SearchHit> {
        self.index.search(query).await
    }

    /// Fetch a page's source image bytes, for `/api/qc/image/{path}` and
    /// thumbnail generation.
    pub async fn get_image(&self, page_id: &str) -> Result<ObjectPayload, ArchiveError> {
        let page = self.get_page(page_id).await?;
        let key = page.image_key.ok_or_else(|| ArchiveError::PageNotFound(page_id.to_string()))?;
        Ok(self.storage.get(&key, None).await?)
    }

    /// Return a page's cached thumbnail at `size`, generating (and
    /// caching) it from the source image on a miss or when `force` is set
    /// (spec §6 `/api/archive/thumbnail/{page_id}`, `.../thumbnails/generate`).
    pub async fn thumbnail(&self, page_id: &str, size: ThumbnailSize, force: bool) -> Result<Vec<u8>, ArchiveError> {
        let key = thumbnail::thumbnail_key(page_id, size);
        if !force {
            if let Ok(cached) = self.storage.get(&key, None).await {
                return Ok(cached.bytes);
            }
        }
        let source = self.get_image(page_id).await?;
        let bytes = thumbnail::generate(&source.bytes, size)?;
        self.storage
            .put(&key, bytes.clone(), "image/jpeg", HashMap::new(), None)
            .await?;
        Ok(bytes)
    }

    /// Regenerate thumbnails (all four sizes) for every page in a batch,
    /// used by `/api/archive/thumbnails/generate`. Returns the count of
    /// pages processed.
    pub async fn regenerate_thumbnails_for_batch(&self, batch_id: &str, force: bool) -> Result<usize, ArchiveError> {
        let hits = self
            .search(&index::SearchQuery {
                batch_id: Some(batch_id.to_string()),
                limit: 0,
                ..Default::default()
            })
            .await;
        const SIZES: [ThumbnailSize; 4] = [
            ThumbnailSize::Icon,
            ThumbnailSize::Small,
            ThumbnailSize::Medium,
            ThumbnailSize::Large,
        ];
        let mut processed = 0;
        for hit in hits {
            let mut ok = false;
            for size in SIZES {
                if self.thumbnail(&hit.page_id, size, force).await.is_ok() {
                    ok = true;
                }
            }
            if ok {
                processed += 1;
            }
        }
        Ok(processed)
    }

    pub async fn distinct_owners(&self) -> Vec<String> {
        self.index.distinct_owners().await
    }

    pub async fn distinct_years(&self) -> Vec<u16> {
        self.index.distinct_years().await
    }

    pub async fn distinct_doc_types(&self) -> Vec<DocType> {
        self.index.distinct_doc_types().await
    }

    pub async fn page_count(&self) -> usize {
        self.index.len().await
    }

    /// Rebuild the index and key map from scratch by listing every
    /// metadata sidecar under `storage`. Must be safe to run concurrently
    /// with reads, and must produce an index equivalent to one built
    /// incrementally over the same pages (spec §8).
    pub async fn reindex(&self) -> Result<usize, ArchiveError> {
        let mut pages = Vec::new();
        let mut offset = 0;
        loop {
            let batch = self.storage.list("", 1000, offset).await?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();
            for descriptor in batch {
                if !descriptor.key.ends_with(".json") {
                    continue;
                }
                let payload = self.storage.get(&descriptor.key, None).await?;
                if let Ok(page) = serde_json::from_slice::<Page>(&payload.bytes) {
                    let prefix = page.canonical_prefix();
                    self.page_keys.insert(page.page_id.clone(), prefix);
                    pages.push(page);
                }
            }
            offset += batch_len;
        }
        self.index.reindex_all(&pages).await;
        Ok(pages.len())
    }

    /// Page ids whose index entry is currently stale, for a periodic
    /// reconciliation sweep.
    pub async fn dirty_page_ids(&self) -> Vec<String> {
        self.index.dirty_page_ids().await
    }

    /// Count of pages below a given QC status that still block a batch
    /// from merging, used by the batch merger (spec §4.4 "batch_not_ready").
    pub async fn pending_count_for_batch(&self, batch_id: &str) -> usize {
        let hits = self
            .search(&index::SearchQuery {
                batch_id: Some(batch_id.to_string()),
                qc_status: Some(QcStatus::Pending),
                limit: 0,
                ..Default::default()
            })
            .await;
        hits.len()
    }
}

/// Exposed `pub(crate)` so callers that must pre-populate `Page.image_key`
/// with the canonical key before calling `archive()` (the metadata sidecar
/// is written before the image key is otherwise known) can compute the
/// same extension the organiser will use.
pub(crate) fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "application/pdf" => "pdf",
        "image/tiff" => "tiff",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Classification, Sensitivity};
    use crate::storage::local::LocalStorage;
    use std::collections::HashMap as StdHashMap;

    fn page(page_id: &str, batch_id: &str, status: QcStatus) -> Page {
        Page {
            page_id: page_id.to_string(),
            owner: "Acme Corp".to_string(),
            year: 2024,
            doc_type: DocType::Invoice,
            batch_id: batch_id.to_string(),
            ocr_text: "invoice total due net 30".to_string(),
            fields: StdHashMap::new(),
            classification: Classification {
                label: DocType::Invoice,
                confidence: 0.97,
            },
            qc_status: status,
            sensitivity: Sensitivity::Internal,
            original_sensitivity: Sensitivity::Internal,
            image_key: None,
            created_at: chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
        }
    }

    async fn organiser() -> (ArchiveOrganiser, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path().to_path_buf(), 5));
        (ArchiveOrganiser::new(storage), dir)
    }

    #[tokio::test]
    async fn archive_then_get_round_trips() {
        let (organiser, _dir) = organiser().await;
        let page = page("INV_0001", "B1", QcStatus::Approved);
        let outcome = organiser.archive(&page, None).await.unwrap();
        assert!(outcome.metadata_key.ends_with("INV_0001.json"));

        let fetched = organiser.get_page("INV_0001").await.unwrap();
        assert_eq!(fetched.page_id, "INV_0001");
        assert_eq!(fetched.owner, "Acme Corp");
    }

    #[tokio::test]
    async fn search_after_archive_finds_the_page() {
        let (organiser, _dir) = organiser().await;
        organiser.archive(&page("INV_0002", "B1", QcStatus::Approved), None).await.unwrap();

        let hits = organiser
            .search(&index::SearchQuery {
                text: Some("invoice".to_string()),
                limit: 10,
                ..Default::default()
            })
            .await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].page_id, "INV_0002");
    }

    #[tokio::test]
    async fn reindex_recovers_from_empty_index() {
        let (organiser, _dir) = organiser().await;
        organiser.archive(&page("INV_0003", "B2", QcStatus::Approved), None).await.unwrap();

        let rebuilt = ArchiveOrganiser::new(organiser.storage.clone());
        let count = rebuilt.reindex().await.unwrap();
        assert_eq!(count, 1);
        let fetched = rebuilt.get_page("INV_0003").await.unwrap();
        assert_eq!(fetched.page_id, "INV_0003");
    }

    #[tokio::test]
    async fn pending_count_for_batch_reflects_qc_status() {
        let (organiser, _dir) = organiser().await;
        organiser.archive(&page("P1", "B3", QcStatus::Pending), None).await.unwrap();
        organiser.archive(&page("P2", "B3", QcStatus::Approved), None).await.unwrap();

        assert_eq!(organiser.pending_count_for_batch("B3").await, 1);
    }

    #[tokio::test]
    async fn thumbnail_generates_then_caches_on_second_call() {
        let (organiser, _dir) = organiser().await;
        let mut p = page("P1", "B4", QcStatus::Approved);
        p.image_key = Some(p.canonical_key("png"));

        let img = image::RgbImage::from_pixel(64, 32, image::Rgb([200, 10, 10]));
        let mut png_bytes = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut png_bytes, image::ImageFormat::Png)
            .unwrap();
        organiser.archive(&p, Some((png_bytes.into_inner(), "image/png".to_string()))).await.unwrap();

        let first = organiser.thumbnail("P1", thumbnail::ThumbnailSize::Small, false).await.unwrap();
        assert!(!first.is_empty());

        // Cached path: force=false must return without needing the source again.
        let second = organiser.thumbnail("P1", thumbnail::ThumbnailSize::Small, false).await.unwrap();
        assert_eq!(first, second);
    }
}
