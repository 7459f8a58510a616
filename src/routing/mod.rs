//! Routing engine (spec §4.1): decides a page's severity from classifier
//! and extractor confidences.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::models::{Classification, DocType, FieldValue, Severity};

/// Per-`doc_type` list of fields that must be present for a page to be
/// eligible for `auto` routing. Grounded in the routing table the teacher
/// keeps for per-scraper required selectors, generalised to document fields.
#[derive(Debug, Clone, Default)]
pub struct RequiredFields(HashMap<DocType, Vec<String>>);

impl RequiredFields {
    pub fn new() -> Self {
        let mut map = HashMap::new();
        map.insert(DocType::Invoice, vec!["invoice_number".into(), "amount".into()]);
        map.insert(DocType::Receipt, vec!["amount".into()]);
        map.insert(DocType::Contract, vec!["parties".into()]);
        map.insert(DocType::Form, vec![]);
        map.insert(DocType::Letter, vec![]);
        map.insert(DocType::Memo, vec![]);
        map.insert(DocType::Report, vec![]);
        map.insert(DocType::Other, vec![]);
        Self(map)
    }

    pub fn for_doc_type(&self, doc_type: DocType) -> &[String] {
        self.0.get(&doc_type).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn missing_fields(&self, doc_type: DocType, fields: &HashMap<String, FieldValue>) -> Vec<String> {
        self.for_doc_type(doc_type)
            .iter()
            .filter(|f| !fields.contains_key(f.as_str()))
            .cloned()
            .collect()
    }
}

/// Input to a single routing decision.
#[derive(Debug, Clone)]
pub struct RoutingInput<'a> {
    pub classification: &'a Classification,
    pub fields: &'a HashMap<String, FieldValue>,
}

/// Outcome of a routing decision: a severity plus the reasons that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision {
    pub severity: Severity,
    pub reasons: Vec<String>,
}

const SENSITIVE_CONF_THRESHOLD: f32 = 0.9;
const AUTO_CLASS_THRESHOLD: f32 = 0.9;
const AUTO_FIELD_THRESHOLD: f32 = 0.85;
const MANUAL_CLASS_THRESHOLD: f32 = 0.7;

/// Evaluate the layered rule set from spec §4.1.
///
/// The engine never fails loud: malformed input routes to `qc` with reason
/// `incomplete_routing_input` rather than returning an error.
pub fn route(input: RoutingInput<'_>, required: &RequiredFields) -> RoutingDecision {
    if !(0.0..=1.0).contains(&input.classification.confidence) {
        return RoutingDecision {
            severity: Severity::Qc,
            reasons: vec!["incomplete_routing_input".to_string()],
        };
    }

    let doc_type = input.classification.label;
    let missing = required.missing_fields(doc_type, input.fields);

    // Rule 1: sensitive doc types with low classification confidence.
    if doc_type.is_legal_sensitive() && input.classification.confidence < SENSITIVE_CONF_THRESHOLD {
        return RoutingDecision {
            severity: Severity::Manual,
            reasons: vec!["sensitive_doc_low_conf".to_string()],
        };
    }

    let avg_field_conf = average_field_confidence(input.fields);

    // Rule 2: confident classification, confident fields, nothing missing.
    if input.classification.confidence >= AUTO_CLASS_THRESHOLD
        && avg_field_conf >= AUTO_FIELD_THRESHOLD
        && missing.is_empty()
    {
        return RoutingDecision {
            severity: Severity::Auto,
            reasons: vec!["auto_high_confidence".to_string()],
        };
    }

    // Rule 3: moderate classification confidence -> manual, naming shortfalls.
    if input.classification.confidence >= MANUAL_CLASS_THRESHOLD {
        let mut reasons = Vec::new();
        if input.classification.confidence < AUTO_CLASS_THRESHOLD {
            reasons.push(format!(
                "classification_confidence_{:.2}_below_auto_threshold",
                input.classification.confidence
            ));
        }
        if avg_field_conf < AUTO_FIELD_THRESHOLD {
            reasons.push(format!("average_field_confidence_{avg_field_conf:.2}_below_threshold"));
        }
        for field in &missing {
            reasons.push(format!("missing_required_field_{field}"));
        }
        if reasons.is_empty() {
            reasons.push("manual_review_required".to_string());
        }
        return RoutingDecision {
            severity: Severity::Manual,
            reasons,
        };
    }

    // Rule 4: fallback.
    RoutingDecision {
        severity: Severity::Qc,
        reasons: vec!["low_classification_confidence".to_string()],
    }
}

fn average_field_confidence(fields: &HashMap<String, FieldValue>) -> f32 {
    if fields.is_empty() {
        return 0.0;
    }
    let sum: f32 = fields.values().map(|f| f.confidence).sum();
    sum / fields.len() as f32
}

/// One recorded routing decision, kept for the `/api/routing/*` reporting
/// endpoints. The engine itself is stateless (§4.1); this is the ambient
/// bookkeeping a caller layers on top of it.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingLogEntry {
    pub page_id: String,
    pub owner: String,
    pub doc_type: DocType,
    pub severity: Severity,
    pub reasons: Vec<String>,
    pub operator: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate counts for `/api/routing/summary`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoutingSummary {
    pub total: u64,
    pub by_severity: HashMap<String, u64>,
    pub by_doc_type: HashMap<String, u64>,
}

/// One day's counts for `/api/routing/trends`.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingTrendPoint {
    pub date: NaiveDate,
    pub auto: u64,
    pub manual: u64,
    pub qc: u64,
}

const MAX_ROUTING_LOG_ENTRIES: usize = 100_000;

/// Bounded in-memory ring of recent routing decisions. Unlike the QC task
/// log, routing decisions aren't replayed into authoritative state on
/// restart — they're a reporting trail, not a source of truth, so an
/// in-memory bound is sufficient (see `DESIGN.md`).
pub struct RoutingLog {
    entries: Mutex<Vec<RoutingLogEntry>>,
}

impl Default for RoutingLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn record(
        &self,
        page_id: impl Into<String>,
        owner: impl Into<String>,
        doc_type: DocType,
        decision: &RoutingDecision,
        operator: Option<String>,
    ) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= MAX_ROUTING_LOG_ENTRIES {
            entries.remove(0);
        }
        entries.push(RoutingLogEntry {
            page_id: page_id.into(),
            owner: owner.into(),
            doc_type,
            severity: decision.severity,
            reasons: decision.reasons.clone(),
            operator,
            recorded_at: Utc::now(),
        });
    }

    /// Most recent decisions, newest first, capped at `limit` (≤1000 per
    /// spec §6).
    pub fn recent(&self, limit: usize) -> Vec<RoutingLogEntry> {
        let limit = limit.clamp(1, 1000);
        let entries = self.entries.lock().unwrap();
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn summary(
        &self,
        days: Option<i64>,
        doc_type: Option<DocType>,
        severity: Option<Severity>,
        operator: Option<&str>,
    ) -> RoutingSummary {
        let cutoff = days.map(|d| Utc::now() - chrono::Duration::days(d));
        let entries = self.entries.lock().unwrap();
        let mut summary = RoutingSummary::default();
        for entry in entries.iter() {
            if let Some(cutoff) = cutoff {
                if entry.recorded_at < cutoff {
                    continue;
                }
            }
            if let Some(dt) = doc_type {
                if entry.doc_type != dt {
                    continue;
                }
            }
            if let Some(sev) = severity {
                if entry.severity != sev {
                    continue;
                }
            }
            if let Some(op) = operator {
                if entry.operator.as_deref() != Some(op) {
                    continue;
                }
            }
            summary.total += 1;
            *summary.by_severity.entry(severity_str(entry.severity).to_string()).or_default() += 1;
            *summary.by_doc_type.entry(entry.doc_type.as_str().to_string()).or_default() += 1;
        }
        summary
    }

    pub fn trends(&self, days: i64) -> Vec<RoutingTrendPoint> {
        let days = days.max(1);
        let cutoff = (Utc::now() - chrono::Duration::days(days)).date_naive();
        let entries = self.entries.lock().unwrap();
        let mut by_day: std::collections::BTreeMap<NaiveDate, (u64, u64, u64)> = std::collections::BTreeMap::new();
        for entry in entries.iter() {
            let date = entry.recorded_at.date_naive();
            if date < cutoff {
                continue;
            }
            let counts = by_day.entry(date).or_default();
            match entry.severity {
                Severity::Auto => counts.0 += 1,
                Severity::Manual => counts.1 += 1,
                Severity::Qc => counts.2 += 1,
            }
        }
        by_day
            .into_iter()
            .map(|(date, (auto, manual, qc))| RoutingTrendPoint { date, auto, manual, qc })
            .collect()
    }
}

fn severity_str(severity: Severity) -> &'static str {
    match severity {
        Severity::Auto => "auto",
        Severity::Manual => "manual",
        Severity::Qc => "qc",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(value: &str, confidence: f32) -> FieldValue {
        FieldValue {
            value: value.to_string(),
            confidence,
        }
    }

    #[test]
    fn happy_path_auto() {
        let required = RequiredFields::new();
        let mut fields = HashMap::new();
        fields.insert("invoice_number".to_string(), field("12345", 0.99));
        fields.insert("amount".to_string(), field("1500.00", 0.95));
        let classification = Classification {
            label: DocType::Invoice,
            confidence: 0.96,
        };
        let decision = route(
            RoutingInput {
                classification: &classification,
                fields: &fields,
            },
            &required,
        );
        assert_eq!(decision.severity, Severity::Auto);
    }

    #[test]
    fn low_confidence_routes_to_qc() {
        let required = RequiredFields::new();
        let fields = HashMap::new();
        let classification = Classification {
            label: DocType::Invoice,
            confidence: 0.62,
        };
        let decision = route(
            RoutingInput {
                classification: &classification,
                fields: &fields,
            },
            &required,
        );
        assert_eq!(decision.severity, Severity::Qc);
    }

    #[test]
    fn sensitive_doc_type_low_confidence_is_manual() {
        let required = RequiredFields::new();
        let fields = HashMap::new();
        let classification = Classification {
            label: DocType::Contract,
            confidence: 0.85,
        };
        let decision = route(
            RoutingInput {
                classification: &classification,
                fields: &fields,
            },
            &required,
        );
        assert_eq!(decision.severity, Severity::Manual);
        assert!(decision.reasons.contains(&"sensitive_doc_low_conf".to_string()));
    }

    #[test]
    fn missing_required_field_forces_manual_not_auto() {
        let required = RequiredFields::new();
        let mut fields = HashMap::new();
        fields.insert("amount".to_string(), field("1500.00", 0.95));
        let classification = Classification {
            label: DocType::Invoice,
            confidence: 0.95,
        };
        let decision = route(
            RoutingInput {
                classification: &classification,
                fields: &fields,
            },
            &required,
        );
        assert_eq!(decision.severity, Severity::Manual);
    }

    #[test]
    fn nan_confidence_is_incomplete_input() {
        let required = RequiredFields::new();
        let fields = HashMap::new();
        let classification = Classification {
            label: DocType::Invoice,
            confidence: f32::NAN,
        };
        let decision = route(
            RoutingInput {
                classification: &classification,
                fields: &fields,
            },
            &required,
        );
        assert_eq!(decision.severity, Severity::Qc);
        assert_eq!(decision.reasons, vec!["incomplete_routing_input".to_string()]);
    }

    #[test]
    fn routing_log_summary_filters_by_doc_type_and_severity() {
        let log = RoutingLog::new();
        log.record(
            "p1",
            "alice",
            DocType::Invoice,
            &RoutingDecision {
                severity: Severity::Auto,
                reasons: vec!["auto_high_confidence".into()],
            },
            None,
        );
        log.record(
            "p2",
            "alice",
            DocType::Contract,
            &RoutingDecision {
                severity: Severity::Manual,
                reasons: vec!["sensitive_doc_low_conf".into()],
            },
            None,
        );
        let summary = log.summary(None, Some(DocType::Invoice), None, None);
        assert_eq!(summary.total, 1);
        assert_eq!(summary.by_severity.get("auto"), Some(&1));

        let severity_only = log.summary(None, None, Some(Severity::Manual), None);
        assert_eq!(severity_only.total, 1);
        assert_eq!(severity_only.by_doc_type.get("contract"), Some(&1));
    }

    #[test]
    fn routing_log_recent_caps_at_1000_and_returns_newest_first() {
        let log = RoutingLog::new();
        for i in 0..5 {
            log.record(
                format!("p{i}"),
                "alice",
                DocType::Invoice,
                &RoutingDecision {
                    severity: Severity::Auto,
                    reasons: vec![],
                },
                None,
            );
        }
        let recent = log.recent(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].page_id, "p4");
    }
}
