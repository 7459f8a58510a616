//! Full-text inverted index plus structured field index (spec §4.3
//! "Index").
//!
//! Sharded by the page's canonical directory prefix so that "a writer
//! blocks new reads for at most the time of one index patch" (spec §4.3)
//! — each shard has its own `RwLock`, so a patch to one `(owner, year,
//! doc_type, batch_id)` never blocks readers of another.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::models::{DocType, Page, QcStatus};

/// A single page's indexed fields.
#[derive(Debug, Clone)]
struct IndexedPage {
    page_id: String,
    owner: String,
    year: u16,
    doc_type: DocType,
    batch_id: String,
    qc_status: QcStatus,
    terms: HashSet<String>,
    indexed_at: DateTime<Utc>,
    /// Set when artefact persistence succeeded but this page's index entry
    /// could not be (re)written; cleared by a successful reindex (spec
    /// §4.3 "Failure semantics").
    dirty: bool,
}

#[derive(Default)]
struct Shard {
    pages: HashMap<String, IndexedPage>,
}

/// Search query: free text AND'd with structured field filters.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub owner: Option<String>,
    pub year: Option<u16>,
    pub doc_type: Option<DocType>,
    pub batch_id: Option<String>,
    pub qc_status: Option<QcStatus>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub page_id: String,
    pub score: f32,
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .collect()
}

/// Sharded, readers-writer full-text + structured index over pages.
pub struct ArchiveIndex {
    shards: DashMap<String, Arc<RwLock<Shard>>>,
}

impl ArchiveIndex {
    pub fn new() -> Self {
        Self { shards: DashMap::new() }
    }

    fn shard_for(&self, page: &Page) -> Arc<RwLock<Shard>> {
        self.shard_key_handle(&page.canonical_prefix())
    }

    fn shard_key_handle(&self, shard_key: &str) -> Arc<RwLock<Shard>> {
        self.shards
            .entry(shard_key.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Shard::default())))
            .clone()
    }

    /// Index (or reindex) a single page. Marking `dirty` lets a caller
    /// distinguish "not yet indexed due to a prior failure" from "indexed
    /// cleanly".
    pub async fn index_page(&self, page: &Page) {
        let shard = self.shard_for(page);
        let mut terms = tokenize(&page.ocr_text);
        terms.extend(tokenize(&page.page_id));
        for field in page.fields.values() {
            terms.extend(tokenize(&field.value));
        }
        let mut guard = shard.write().await;
        guard.pages.insert(
            page.page_id.clone(),
            IndexedPage {
                page_id: page.page_id.clone(),
                owner: page.owner.clone(),
                year: page.year,
                doc_type: page.doc_type,
                batch_id: page.batch_id.clone(),
                qc_status: page.qc_status,
                terms,
                indexed_at: Utc::now(),
                dirty: false,
            },
        );
    }

    /// Mark a page's index entry dirty after an artefact write succeeded
    /// but the index update itself failed (spec §4.3 "Failure semantics").
    pub async fn mark_dirty(&self, page: &Page) {
        let shard = self.shard_for(page);
        let mut guard = shard.write().await;
        guard
            .pages
            .entry(page.page_id.clone())
            .or_insert_with(|| IndexedPage {
                page_id: page.page_id.clone(),
                owner: page.owner.clone(),
                year: page.year,
                doc_type: page.doc_type,
                batch_id: page.batch_id.clone(),
                qc_status: page.qc_status,
                terms: HashSet::new(),
                indexed_at: Utc::now(),
                dirty: true,
            })
            .dirty = true;
    }

    /// Page ids across all shards currently marked dirty, for a background
    /// reindex sweep.
    pub async fn dirty_page_ids(&self) -> Vec<String> {
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            let guard = shard.value().read().await;
            out.extend(guard.pages.values().filter(|p| p.dirty).map(|p| p.page_id.clone()));
        }
        out
    }

    /// Rebuild the entire index from scratch over `pages`. Must produce
    /// the same ranked search output as the incrementally built index for
    /// the same corpus (spec §8 round-trip law).
    pub async fn reindex_all(&self, pages: &[Page]) {
        self.shards.clear();
        for page in pages {
            self.index_page(page).await;
        }
    }

    /// Text relevance score: fraction of query terms present in the page,
    /// weighted slightly by term-frequency coverage.
    fn score(indexed: &IndexedPage, query_terms: &HashSet<String>) -> f32 {
        if query_terms.is_empty() {
            return 1.0;
        }
        let matched = query_terms.intersection(&indexed.terms).count();
        matched as f32 / query_terms.len() as f32
    }

    pub async fn search(&self, query: &SearchQuery) -> Vec<SearchHit> {
        let query_terms = query.text.as_deref().map(tokenize).unwrap_or_default();
        let mut hits = Vec::new();

        for shard in self.shards.iter() {
            let guard = shard.value().read().await;
            for indexed in guard.pages.values() {
                if let Some(owner) = &query.owner {
                    if &indexed.owner != owner {
                        continue;
                    }
                }
                if let Some(year) = query.year {
                    if indexed.year != year {
                        continue;
                    }
                }
                if let Some(doc_type) = query.doc_type {
                    if indexed.doc_type != doc_type {
                        continue;
                    }
                }
                if let Some(batch_id) = &query.batch_id {
                    if &indexed.batch_id != batch_id {
                        continue;
                    }
                }
                if let Some(qc_status) = query.qc_status {
                    if indexed.qc_status != qc_status {
                        continue;
                    }
                }
                if query_terms.is_empty() && query.text.is_some() {
                    // Non-empty query text that tokenized to nothing matches nothing.
                    continue;
                }
                if !query_terms.is_empty() && query_terms.intersection(&indexed.terms).next().is_none() {
                    continue;
                }

                let score = Self::score(indexed, &query_terms);
                hits.push((score, indexed.indexed_at, indexed.page_id.clone()));
            }
        }

        // Rank by text-relevance score, recency tiebreak (spec §4.3).
        hits.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal).then(b.1.cmp(&a.1)));

        hits.into_iter()
            .skip(query.offset)
            .take(if query.limit == 0 { usize::MAX } else { query.limit })
            .map(|(score, _, page_id)| SearchHit { page_id, score })
            .collect()
    }

    /// Distinct facet values across the whole index, for the archive
    /// browse endpoints (spec §6 `/api/archive/owners|doc_types|years`).
    pub async fn distinct_owners(&self) -> Vec<String> {
        let mut out: HashSet<String> = HashSet::new();
        for shard in self.shards.iter() {
            out.extend(shard.value().read().await.pages.values().map(|p| p.owner.clone()));
        }
        let mut out: Vec<String> = out.into_iter().collect();
        out.sort();
        out
    }

    pub async fn distinct_years(&self) -> Vec<u16> {
        let mut out: HashSet<u16> = HashSet::new();
        for shard in self.shards.iter() {
            out.extend(shard.value().read().await.pages.values().map(|p| p.year));
        }
        let mut out: Vec<u16> = out.into_iter().collect();
        out.sort();
        out
    }

    pub async fn distinct_doc_types(&self) -> Vec<DocType> {
        let mut out: HashSet<DocType> = HashSet::new();
        for shard in self.shards.iter() {
            out.extend(shard.value().read().await.pages.values().map(|p| p.doc_type));
        }
        out.into_iter().collect()
    }

    pub async fn len(&self) -> usize {
        let mut total = 0;
        for shard in self.shards.iter() {
            total += shard.value().read().await.pages.len();
        }
        total
    }
}

impl Default for ArchiveIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn page(page_id: &str, ocr: &str) -> Page {
        Page {
            page_id: page_id.to_string(),
            owner: "Acme".to_string(),
            year: 2024,
            doc_type: DocType::Invoice,
            batch_id: "b1".to_string(),
            ocr_text: ocr.to_string(),
            fields: StdHashMap::new(),
            classification: crate::models::Classification {
                label: DocType::Invoice,
                confidence: 0.96,
            },
            qc_status: QcStatus::Approved,
            sensitivity: crate::models::Sensitivity::Internal,
            original_sensitivity: crate::models::Sensitivity::Internal,
            image_key: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn search_finds_indexed_text() {
        let index = ArchiveIndex::new();
        index.index_page(&page("INV_0001", "Invoice 12345 total $1,500")).await;

        let hits = index
            .search(&SearchQuery {
                text: Some("12345".to_string()),
                limit: 10,
                ..Default::default()
            })
            .await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].page_id, "INV_0001");
        assert!(hits[0].score >= 0.5);
    }

    #[tokio::test]
    async fn reindex_from_scratch_matches_incremental_index() {
        let pages = vec![page("A", "alpha bravo"), page("B", "bravo charlie")];

        let incremental = ArchiveIndex::new();
        for p in &pages {
            incremental.index_page(p).await;
        }

        let rebuilt = ArchiveIndex::new();
        rebuilt.reindex_all(&pages).await;

        let query = SearchQuery {
            text: Some("bravo".to_string()),
            limit: 10,
            ..Default::default()
        };
        let mut inc_hits: Vec<String> = incremental.search(&query).await.into_iter().map(|h| h.page_id).collect();
        let mut reb_hits: Vec<String> = rebuilt.search(&query).await.into_iter().map(|h| h.page_id).collect();
        inc_hits.sort();
        reb_hits.sort();
        assert_eq!(inc_hits, reb_hits);
    }
}
