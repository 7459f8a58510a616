//! Batch merger (spec §4.4): assembles a sealed batch's approved/rejected
//! pages into a merged PDF plus JSON and CSV sidecars.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::archive::batch::BatchRegistry;
use crate::archive::index::SearchQuery;
use crate::archive::ArchiveOrganiser;
use crate::error::ArchiveError;
use crate::models::{BatchStatus, DocType, FieldValue, Page, QcStatus};
use crate::storage::ObjectStorage;

/// Assumed scanner resolution used to size PDF pages from raw pixel
/// dimensions; the spec calls for "native resolution" embedding, i.e. no
/// resampling, not DPI-accurate page sizing.
const ASSUMED_DPI: f32 = 300.0;

#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub pdf_key: String,
    pub json_key: String,
    pub csv_key: String,
    pub page_count: usize,
    pub skipped_pages: usize,
}

#[derive(Serialize)]
struct BatchSummary {
    owner: String,
    year: u16,
    doc_type: String,
    batch_id: String,
    created_at: chrono::DateTime<Utc>,
    page_count: usize,
    pdf_file: String,
}

#[derive(Serialize)]
struct PageEntry {
    page_id: String,
    image_file: Option<String>,
    qc_status: QcStatus,
    fields: HashMap<String, FieldValue>,
    ocr_length: usize,
    has_ocr: bool,
}

#[derive(Serialize)]
struct AggregateSummary {
    approved: usize,
    rejected: usize,
    pending: usize,
    skipped_pages: usize,
    /// Per-field extraction counts; a `BTreeMap` so key order is stable
    /// across runs (spec §4.4 "Idempotence").
    field_extraction_counts: std::collections::BTreeMap<String, usize>,
}

#[derive(Serialize)]
struct MergeManifest {
    batch: BatchSummary,
    pages: Vec<PageEntry>,
    summary: AggregateSummary,
}

struct PageEmbed {
    bytes: Vec<u8>,
    ocr_text: String,
    width_mm: f32,
    height_mm: f32,
}

/// Reads approved/rejected pages back from the archive organiser and
/// writes merged artefacts through the same storage abstraction.
pub struct BatchMerger {
    storage: Arc<dyn ObjectStorage>,
    organiser: Arc<ArchiveOrganiser>,
    batches: Arc<BatchRegistry>,
}

impl BatchMerger {
    pub fn new(storage: Arc<dyn ObjectStorage>, organiser: Arc<ArchiveOrganiser>, batches: Arc<BatchRegistry>) -> Self {
        Self {
            storage,
            organiser,
            batches,
        }
    }

    /// Merge `(owner, year, doc_type, batch_id)` into `{DocType}_{BatchID}.pdf`
    /// plus its `_metadata.json` and `_pages.csv` siblings. Fails with
    /// `ArchiveError::BatchNotSealed` unless the batch has been sealed
    /// (spec §3 "Batch": "sealed (merge eligible)"), and with
    /// `ArchiveError::BatchNotReady` if any page is still `pending`.
    pub async fn merge(&self, owner: &str, year: u16, doc_type: DocType, batch_id: &str) -> Result<MergeOutcome, ArchiveError> {
        let batch = self.batches.get(owner, year, doc_type, batch_id).await?;
        if batch.status == BatchStatus::Open {
            return Err(ArchiveError::BatchNotSealed(batch_id.to_string()));
        }

        let hits = self
            .organiser
            .search(&SearchQuery {
                owner: Some(owner.to_string()),
                year: Some(year),
                doc_type: Some(doc_type),
                batch_id: Some(batch_id.to_string()),
                limit: 0,
                ..Default::default()
            })
            .await;

        let mut pages = Vec::with_capacity(hits.len());
        for hit in hits {
            pages.push(self.organiser.get_page(&hit.page_id).await?);
        }
        // Stable, lexicographic page_id order (spec §4.4 "Ordering").
        pages.sort_by(|a, b| a.page_id.cmp(&b.page_id));

        let pending = pages.iter().filter(|p| p.qc_status == QcStatus::Pending).count();
        if pending > 0 {
            return Err(ArchiveError::BatchNotReady(batch_id.to_string(), pending));
        }

        let prefix = format!(
            "{}/{}/{}/{}",
            Page::slug(owner),
            year,
            doc_type.as_str(),
            Page::slug(batch_id)
        );
        let stem = format!("{}_{}", doc_type.title_case(), batch_id);
        let json_key = format!("{prefix}/{stem}_metadata.json");
        let csv_key = format!("{prefix}/{stem}_pages.csv");
        let pdf_key = format!("{prefix}/{stem}.pdf");

        let mut page_entries = Vec::with_capacity(pages.len());
        let mut embeds = Vec::new();
        let mut skipped = 0usize;
        let mut approved = 0usize;
        let mut rejected = 0usize;
        let mut field_counts: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();

        for page in &pages {
            match page.qc_status {
                QcStatus::Approved => approved += 1,
                QcStatus::Rejected => rejected += 1,
                _ => {}
            }
            for name in page.fields.keys() {
                *field_counts.entry(name.clone()).or_insert(0) += 1;
            }

            let readable_image = match &page.image_key {
                Some(key) => match self.storage.get(key, None).await {
                    Ok(payload) => image::load_from_memory(&payload.bytes).ok().map(|img| (img, payload.bytes)),
                    Err(_) => None,
                },
                None => None,
            };

            let has_ocr = readable_image.is_some() && !page.ocr_text.is_empty();
            if let Some((img, bytes)) = readable_image {
                embeds.push(PageEmbed {
                    bytes,
                    ocr_text: page.ocr_text.clone(),
                    width_mm: px_to_mm(img.width()),
                    height_mm: px_to_mm(img.height()),
                });
            } else {
                // Spec §4.4 "Failure semantics": unreadable image is recorded
                // but omitted from the PDF, not a fatal merge error.
                skipped += 1;
            }

            page_entries.push(PageEntry {
                page_id: page.page_id.clone(),
                image_file: page.image_key.clone(),
                qc_status: page.qc_status,
                fields: page.fields.clone(),
                ocr_length: if has_ocr { page.ocr_text.len() } else { 0 },
                has_ocr,
            });
        }

        let manifest = MergeManifest {
            batch: BatchSummary {
                owner: owner.to_string(),
                year,
                doc_type: doc_type.as_str().to_string(),
                batch_id: batch_id.to_string(),
                // The batch's own first-seen timestamp, not the time of
                // this merge call: re-running merge on an unchanged batch
                // must reproduce byte-identical sidecars (spec §4.4, §8).
                created_at: batch.created_at,
                page_count: pages.len(),
                pdf_file: pdf_key.clone(),
            },
            pages: page_entries,
            summary: AggregateSummary {
                approved,
                rejected,
                pending: 0,
                skipped_pages: skipped,
                field_extraction_counts: field_counts,
            },
        };

        let json_bytes = serde_json::to_vec_pretty(&manifest).map_err(|e| ArchiveError::Merge(e.to_string()))?;
        self.storage
            .put(&json_key, json_bytes, "application/json", HashMap::new(), None)
            .await?;

        let csv_bytes = build_csv(&pages)?;
        self.storage.put(&csv_key, csv_bytes, "text/csv", HashMap::new(), None).await?;

        let pdf_bytes = build_pdf(doc_type, batch_id, &embeds)?;
        self.storage
            .put(&pdf_key, pdf_bytes, "application/pdf", HashMap::new(), None)
            .await?;

        self.batches.mark_merged(owner, year, doc_type, batch_id).await?;

        Ok(MergeOutcome {
            pdf_key,
            json_key,
            csv_key,
            page_count: pages.len(),
            skipped_pages: skipped,
        })
    }
}

fn px_to_mm(px: u32) -> f32 {
    px as f32 / ASSUMED_DPI * 25.4
}

fn qc_status_str(status: QcStatus) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Columns are `page_id, image_file, qc_status, has_ocr, ocr_length` plus
/// the union of all field names seen in the batch, sorted for stable
/// output (spec §4.4 "CSV sidecar").
fn build_csv(pages: &[Page]) -> Result<Vec<u8>, ArchiveError> {
    let mut field_names: BTreeSet<String> = BTreeSet::new();
    for page in pages {
        field_names.extend(page.fields.keys().cloned());
    }

    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    let mut header = vec![
        "page_id".to_string(),
        "image_file".to_string(),
        "qc_status".to_string(),
        "has_ocr".to_string(),
        "ocr_length".to_string(),
    ];
    header.extend(field_names.iter().cloned());
    writer.write_record(&header).map_err(|e| ArchiveError::Merge(e.to_string()))?;

    for page in pages {
        let has_ocr = page.image_key.is_some() && !page.ocr_text.is_empty();
        let mut row = vec![
            page.page_id.clone(),
            page.image_key.clone().unwrap_or_default(),
            qc_status_str(page.qc_status),
            has_ocr.to_string(),
            if has_ocr { page.ocr_text.len().to_string() } else { "0".to_string() },
        ];
        for name in &field_names {
            row.push(page.fields.get(name).map(|f| f.value.clone()).unwrap_or_default());
        }
        writer.write_record(&row).map_err(|e| ArchiveError::Merge(e.to_string()))?;
    }

    writer.into_inner().map_err(|e| ArchiveError::Merge(e.to_string()))
}

/// Assembles the merged PDF: one page per embeddable image, at its native
/// size, with an invisible OCR text layer overlaid for copy/search (spec
/// §4.4 "PDF").
fn build_pdf(doc_type: DocType, batch_id: &str, embeds: &[PageEmbed]) -> Result<Vec<u8>, ArchiveError> {
    use printpdf::*;

    let mut doc = PdfDocument::new(&format!("{} {}", doc_type.title_case(), batch_id))
        .with_author("foiacquire")
        .with_subject(doc_type.title_case())
        .with_keywords(vec![doc_type.as_str().to_string(), batch_id.to_string()]);

    let mut warnings = Vec::new();
    let mut pages = Vec::with_capacity(embeds.len());

    for embed in embeds {
        let image = RawImage::decode_from_bytes(&embed.bytes, &mut warnings)
            .map_err(|e| ArchiveError::Merge(format!("embed page image: {e}")))?;
        let image_id = doc.add_image(&image);

        let mut ops = vec![Op::UseXobject {
            id: image_id,
            transform: XObjectTransform::default(),
        }];

        if !embed.ocr_text.is_empty() {
            ops.push(Op::StartTextSection);
            ops.push(Op::SetTextRenderingMode {
                mode: TextRenderingMode::Invisible,
            });
            ops.push(Op::SetFontSizeBuiltinFont {
                size: Pt(9.0),
                font: BuiltinFont::Helvetica,
            });
            ops.push(Op::SetTextCursor {
                pos: Point::new(Mm(5.0), Mm(5.0)),
            });
            ops.push(Op::WriteTextBuiltinFont {
                items: vec![TextItem::Text(embed.ocr_text.clone())],
                font: BuiltinFont::Helvetica,
            });
            ops.push(Op::EndTextSection);
        }

        pages.push(PdfPage::new(Mm(embed.width_mm), Mm(embed.height_mm), ops));
    }

    Ok(doc.with_pages(pages).save(&PdfSaveOptions::default(), &mut warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveOrganiser;
    use crate::models::{Classification, Page, Sensitivity};
    use crate::storage::local::LocalStorage;
    use std::collections::HashMap as StdHashMap;

    fn page(page_id: &str, batch_id: &str, status: QcStatus, fields: &[(&str, &str)]) -> Page {
        let mut field_map = StdHashMap::new();
        for (name, value) in fields {
            field_map.insert(
                name.to_string(),
                FieldValue {
                    value: value.to_string(),
                    confidence: 0.9,
                },
            );
        }
        Page {
            page_id: page_id.to_string(),
            owner: "Acme".to_string(),
            year: 2024,
            doc_type: DocType::Invoice,
            batch_id: batch_id.to_string(),
            ocr_text: "total due".to_string(),
            fields: field_map,
            classification: Classification {
                label: DocType::Invoice,
                confidence: 0.95,
            },
            qc_status: status,
            sensitivity: Sensitivity::Internal,
            original_sensitivity: Sensitivity::Internal,
            image_key: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn merge_fails_with_batch_not_ready_when_a_page_is_pending() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn ObjectStorage> = Arc::new(LocalStorage::new(dir.path().to_path_buf(), 5));
        let organiser = Arc::new(ArchiveOrganiser::new(storage.clone()));
        organiser.archive(&page("P1", "B1", QcStatus::Pending, &[]), None).await.unwrap();
        organiser.batch_registry().seal("Acme", 2024, DocType::Invoice, "B1").await.unwrap();

        let merger = BatchMerger::new(storage, organiser.clone(), organiser.batch_registry());
        let err = merger.merge("Acme", 2024, DocType::Invoice, "B1").await.unwrap_err();
        assert!(matches!(err, ArchiveError::BatchNotReady(_, 1)));
    }

    #[tokio::test]
    async fn merge_fails_with_batch_not_sealed_when_batch_is_still_open() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn ObjectStorage> = Arc::new(LocalStorage::new(dir.path().to_path_buf(), 5));
        let organiser = Arc::new(ArchiveOrganiser::new(storage.clone()));
        organiser
            .archive(&page("P1", "B_OPEN", QcStatus::Approved, &[]), None)
            .await
            .unwrap();

        let merger = BatchMerger::new(storage, organiser.clone(), organiser.batch_registry());
        let err = merger.merge("Acme", 2024, DocType::Invoice, "B_OPEN").await.unwrap_err();
        assert!(matches!(err, ArchiveError::BatchNotSealed(_)));
    }

    #[tokio::test]
    async fn merge_produces_csv_with_union_of_field_columns() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn ObjectStorage> = Arc::new(LocalStorage::new(dir.path().to_path_buf(), 5));
        let organiser = Arc::new(ArchiveOrganiser::new(storage.clone()));
        organiser
            .archive(&page("P1", "B2", QcStatus::Approved, &[("invoice_number", "INV-1")]), None)
            .await
            .unwrap();
        organiser
            .archive(&page("P2", "B2", QcStatus::Approved, &[("total", "100.00")]), None)
            .await
            .unwrap();
        organiser.batch_registry().seal("Acme", 2024, DocType::Invoice, "B2").await.unwrap();

        let merger = BatchMerger::new(storage.clone(), organiser.clone(), organiser.batch_registry());
        let outcome = merger.merge("Acme", 2024, DocType::Invoice, "B2").await.unwrap();
        assert_eq!(outcome.page_count, 2);
        // Both pages lack a readable image, so both are counted skipped for the PDF.
        assert_eq!(outcome.skipped_pages, 2);

        let csv_payload = storage.get(&outcome.csv_key, None).await.unwrap();
        let csv_text = String::from_utf8(csv_payload.bytes).unwrap();
        let header = csv_text.lines().next().unwrap();
        assert!(header.contains("invoice_number"));
        assert!(header.contains("total"));
    }

    #[tokio::test]
    async fn rerunning_merge_on_unchanged_batch_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn ObjectStorage> = Arc::new(LocalStorage::new(dir.path().to_path_buf(), 5));
        let organiser = Arc::new(ArchiveOrganiser::new(storage.clone()));
        organiser
            .archive(&page("P1", "B3", QcStatus::Approved, &[("total", "1.00")]), None)
            .await
            .unwrap();
        organiser.batch_registry().seal("Acme", 2024, DocType::Invoice, "B3").await.unwrap();

        let merger = BatchMerger::new(storage.clone(), organiser.clone(), organiser.batch_registry());
        let first = merger.merge("Acme", 2024, DocType::Invoice, "B3").await.unwrap();
        let first_csv = storage.get(&first.csv_key, None).await.unwrap().bytes;
        let first_json = storage.get(&first.json_key, None).await.unwrap().bytes;

        let second = merger.merge("Acme", 2024, DocType::Invoice, "B3").await.unwrap();
        let second_csv = storage.get(&second.csv_key, None).await.unwrap().bytes;
        let second_json = storage.get(&second.json_key, None).await.unwrap().bytes;

        assert_eq!(first_csv, second_csv);
        assert_eq!(first_json, second_json);
    }
}
