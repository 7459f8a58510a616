//! PII detection driving confidentiality escalation (spec §4.6
//! "Confidentiality escalation from PII").
//!
//! Detectors cover SSN-like patterns, payment cards (checksum-validated),
//! phone numbers, emails, IP addresses, dates of birth, passport numbers,
//! and driver's licence numbers. Any high-confidence (>= 0.8) match raises
//! a page's confidentiality to at least level 2.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::models::Sensitivity;

/// PII escalation threshold (spec §4.6).
pub const ESCALATION_CONFIDENCE: f32 = 0.8;
/// Confidentiality floor applied when high-confidence PII is found.
pub const ESCALATED_LEVEL: Sensitivity = Sensitivity::Confidential;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    Ssn,
    PaymentCard,
    Phone,
    Email,
    IpAddress,
    DateOfBirth,
    Passport,
    DriversLicense,
}

#[derive(Debug, Clone, Serialize)]
pub struct PiiFinding {
    pub kind: PiiKind,
    pub matched_text: String,
    pub confidence: f32,
}

static SSN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static CARD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){13,19}\b").unwrap());
static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:\+?1[-. ]?)?\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}\b").unwrap());
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap());
static IP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b").unwrap());
static DOB_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:0[1-9]|1[0-2])/(?:0[1-9]|[12]\d|3[01])/(?:19|20)\d{2}\b").unwrap());
static PASSPORT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]{1,2}\d{6,9}\b").unwrap());
static DRIVERS_LICENSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]\d{7,12}\b").unwrap());

/// Luhn checksum, used to filter payment-card false positives out of the
/// 13-19 digit numeric-run regex match.
fn passes_luhn(digits: &str) -> bool {
    let digits: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 {
        return false;
    }
    let mut sum = 0u32;
    let mut double = false;
    for &d in digits.iter().rev() {
        let mut value = d;
        if double {
            value *= 2;
            if value > 9 {
                value -= 9;
            }
        }
        sum += value;
        double = !double;
    }
    sum % 10 == 0
}

/// Scan `text` for PII, returning every finding with its detector-assigned
/// confidence.
pub fn scan_for_pii(text: &str) -> Vec<PiiFinding> {
    let mut findings = Vec::new();

    for m in SSN_RE.find_iter(text) {
        findings.push(PiiFinding {
            kind: PiiKind::Ssn,
            matched_text: m.as_str().to_string(),
            confidence: 0.9,
        });
    }

    for m in CARD_RE.find_iter(text) {
        let digits_only: String = m.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
        if passes_luhn(&digits_only) {
            findings.push(PiiFinding {
                kind: PiiKind::PaymentCard,
                matched_text: m.as_str().to_string(),
                confidence: 0.95,
            });
        }
    }

    for m in PHONE_RE.find_iter(text) {
        findings.push(PiiFinding {
            kind: PiiKind::Phone,
            matched_text: m.as_str().to_string(),
            confidence: 0.75,
        });
    }

    for m in EMAIL_RE.find_iter(text) {
        findings.push(PiiFinding {
            kind: PiiKind::Email,
            matched_text: m.as_str().to_string(),
            confidence: 0.85,
        });
    }

    for m in IP_RE.find_iter(text) {
        findings.push(PiiFinding {
            kind: PiiKind::IpAddress,
            matched_text: m.as_str().to_string(),
            confidence: 0.7,
        });
    }

    for m in DOB_RE.find_iter(text) {
        findings.push(PiiFinding {
            kind: PiiKind::DateOfBirth,
            matched_text: m.as_str().to_string(),
            confidence: 0.6,
        });
    }

    for m in PASSPORT_RE.find_iter(text) {
        findings.push(PiiFinding {
            kind: PiiKind::Passport,
            matched_text: m.as_str().to_string(),
            confidence: 0.55,
        });
    }

    for m in DRIVERS_LICENSE_RE.find_iter(text) {
        findings.push(PiiFinding {
            kind: PiiKind::DriversLicense,
            matched_text: m.as_str().to_string(),
            confidence: 0.5,
        });
    }

    findings
}

/// Apply PII-driven escalation to `current`, returning the (possibly
/// raised) sensitivity. Never lowers sensitivity.
pub fn escalate_if_needed(current: Sensitivity, findings: &[PiiFinding]) -> Sensitivity {
    let has_high_confidence = findings.iter().any(|f| f.confidence >= ESCALATION_CONFIDENCE);
    if has_high_confidence && current < ESCALATED_LEVEL {
        ESCALATED_LEVEL
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_ssn() {
        let findings = scan_for_pii("Subject SSN 123-45-6789 on file.");
        assert!(findings.iter().any(|f| f.kind == PiiKind::Ssn));
    }

    #[test]
    fn detects_valid_card_number_but_not_random_digit_run() {
        // 4111111111111111 is a well-known Luhn-valid test Visa number.
        let findings = scan_for_pii("Card on file: 4111111111111111");
        assert!(findings.iter().any(|f| f.kind == PiiKind::PaymentCard));

        let no_card = scan_for_pii("Invoice total 1234567890123 units shipped");
        assert!(!no_card.iter().any(|f| f.kind == PiiKind::PaymentCard));
    }

    #[test]
    fn ssn_escalates_internal_to_confidential() {
        let findings = scan_for_pii("SSN 123-45-6789");
        let escalated = escalate_if_needed(Sensitivity::Internal, &findings);
        assert_eq!(escalated, Sensitivity::Confidential);
    }

    #[test]
    fn escalation_never_lowers_sensitivity() {
        let findings = scan_for_pii("nothing sensitive here");
        let escalated = escalate_if_needed(Sensitivity::Restricted, &findings);
        assert_eq!(escalated, Sensitivity::Restricted);
    }
}
