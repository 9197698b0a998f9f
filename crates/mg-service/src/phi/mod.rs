//! PHI detection and redaction.
//!
//! The scrubber is pure: given a string it returns a redacted copy plus a
//! categorical report; given a JSON value it returns a scrubbed copy. It runs
//! at request intake, immediately before response emission, and on every
//! field handed to the audit sink.
//!
//! The name-bigram category (`TitleCase TitleCase`) is best-effort and
//! advisory only; every other category is normative for what may never
//! appear in an audit record.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Default replacement token.
pub const REDACTED: &str = "[REDACTED]";

/// Categories of identifier the text rule detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PhiCategory {
    Ssn,
    CreditCard,
    Mrn,
    Phone,
    Email,
    Date,
    Address,
    Zip,
    /// Advisory `TitleCase TitleCase` bigram.
    Name,
}

impl PhiCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhiCategory::Ssn => "ssn",
            PhiCategory::CreditCard => "credit-card",
            PhiCategory::Mrn => "mrn",
            PhiCategory::Phone => "phone",
            PhiCategory::Email => "email",
            PhiCategory::Date => "date",
            PhiCategory::Address => "address",
            PhiCategory::Zip => "zip",
            PhiCategory::Name => "name",
        }
    }
}

/// What a scrub pass found, per category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrubReport {
    pub counts: BTreeMap<PhiCategory, usize>,
}

impl ScrubReport {
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Total excluding the advisory name category.
    pub fn normative_total(&self) -> usize {
        self.counts
            .iter()
            .filter(|(category, _)| **category != PhiCategory::Name)
            .map(|(_, count)| count)
            .sum()
    }

    fn add(&mut self, category: PhiCategory, count: usize) {
        if count > 0 {
            *self.counts.entry(category).or_insert(0) += count;
        }
    }
}

// Patterns are applied in this order. More specific patterns run before the
// broader ones they overlap with (SSN and credit card before phone, address
// before bare ZIP).
#[allow(clippy::unwrap_used)] // patterns are compile-time constants
static SSN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap()
});

#[allow(clippy::unwrap_used)]
static CREDIT_CARD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\d{4}[ -]?){3}\d{4}\b").unwrap()
});

#[allow(clippy::unwrap_used)]
static MRN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:mrn|medical record number)[:#\s-]*\d{6,12}\b").unwrap()
});

#[allow(clippy::unwrap_used)]
static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap()
});

#[allow(clippy::unwrap_used)]
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap()
});

#[allow(clippy::unwrap_used)]
static DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b").unwrap()
});

#[allow(clippy::unwrap_used)]
static ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b\d+\s+[A-Za-z][A-Za-z0-9\s]{0,40}?\s(?:street|st|avenue|ave|road|rd|boulevard|blvd|lane|ln|drive|dr|court|ct|way|place|pl)\b\.?",
    )
    .unwrap()
});

#[allow(clippy::unwrap_used)]
static ZIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{5}(?:-\d{4})?\b").unwrap()
});

#[allow(clippy::unwrap_used)]
static NAME_BIGRAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][a-z]+\s[A-Z][a-z]+\b").unwrap()
});

const ORDERED_PATTERNS: [(PhiCategory, &LazyLock<Regex>); 9] = [
    (PhiCategory::Ssn, &SSN),
    (PhiCategory::CreditCard, &CREDIT_CARD),
    (PhiCategory::Mrn, &MRN),
    (PhiCategory::Phone, &PHONE),
    (PhiCategory::Email, &EMAIL),
    (PhiCategory::Date, &DATE),
    (PhiCategory::Address, &ADDRESS),
    (PhiCategory::Zip, &ZIP),
    (PhiCategory::Name, &NAME_BIGRAM),
];

/// Field keys whose values are always replaced wholesale during the
/// structured walk. Matching is case-insensitive after stripping `_` and `-`,
/// so `firstName`, `first_name`, and `FIRST-NAME` all hit the same entry.
const KEY_DENYLIST: [&str; 14] = [
    "email",
    "phone",
    "ssn",
    "mrn",
    "firstname",
    "lastname",
    "fullname",
    "address",
    "zipcode",
    "patientid",
    "userid",
    "ip",
    "useragent",
    "dateofbirth",
];

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .collect::<String>()
        .to_ascii_lowercase()
}

/// The PHI scrubber. Cheap to clone; construction compiles nothing (the
/// regexes are process-wide statics).
#[derive(Debug, Clone)]
pub struct PhiScrubber {
    replacement: String,
    /// Configured key aliases, pre-normalized.
    extra_keys: Vec<String>,
}

impl Default for PhiScrubber {
    fn default() -> Self {
        Self::new(REDACTED, &[])
    }
}

impl PhiScrubber {
    pub fn new(replacement: &str, extra_key_aliases: &[String]) -> Self {
        Self {
            replacement: replacement.to_string(),
            extra_keys: extra_key_aliases.iter().map(|k| normalize_key(k)).collect(),
        }
    }

    /// Redact every PHI category from `input`.
    ///
    /// Idempotent: scrubbing already-scrubbed text changes nothing, because
    /// the replacement token matches none of the patterns.
    pub fn scrub_text(&self, input: &str) -> (String, ScrubReport) {
        let mut report = ScrubReport::default();
        let mut text = input.to_string();

        for (category, pattern) in ORDERED_PATTERNS {
            let count = pattern.find_iter(&text).count();
            if count > 0 {
                report.add(category, count);
                text = pattern.replace_all(&text, self.replacement.as_str()).into_owned();
            }
        }

        (text, report)
    }

    /// Recursively scrub a JSON value.
    ///
    /// Values of denylisted keys are replaced wholesale regardless of type;
    /// all other string leaves go through the text rule.
    pub fn scrub_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, inner) in map {
                    if self.key_is_denied(key) {
                        out.insert(key.clone(), Value::String(self.replacement.clone()));
                    } else {
                        out.insert(key.clone(), self.scrub_value(inner));
                    }
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.scrub_value(item)).collect())
            }
            Value::String(s) => Value::String(self.scrub_text(s).0),
            other => other.clone(),
        }
    }

    fn key_is_denied(&self, key: &str) -> bool {
        let normalized = normalize_key(key);
        KEY_DENYLIST.contains(&normalized.as_str())
            || self.extra_keys.iter().any(|alias| *alias == normalized)
    }

    pub fn replacement(&self) -> &str {
        &self.replacement
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scrub_ssn() {
        let scrubber = PhiScrubber::default();
        let (text, report) = scrubber.scrub_text("patient ssn is 123-45-6789 on file");
        assert!(!text.contains("123-45-6789"));
        assert!(text.contains(REDACTED));
        assert_eq!(report.counts[&PhiCategory::Ssn], 1);
    }

    #[test]
    fn test_scrub_phone_variants() {
        let scrubber = PhiScrubber::default();
        for phone in ["(555) 123-4567", "555-123-4567", "+1 555 123 4567"] {
            let (text, report) = scrubber.scrub_text(&format!("call {phone} today"));
            assert!(!text.contains("4567"), "left phone digits in: {text}");
            assert!(report.counts.contains_key(&PhiCategory::Phone));
        }
    }

    #[test]
    fn test_scrub_email() {
        let scrubber = PhiScrubber::default();
        let (text, report) = scrubber.scrub_text("contact jane.doe@example.org please");
        assert!(!text.contains("example.org"));
        assert_eq!(report.counts[&PhiCategory::Email], 1);
    }

    #[test]
    fn test_scrub_mrn_phrase() {
        let scrubber = PhiScrubber::default();
        let (text, report) = scrubber.scrub_text("See MRN: 00123456 for history");
        assert!(!text.contains("00123456"));
        assert_eq!(report.counts[&PhiCategory::Mrn], 1);
    }

    #[test]
    fn test_scrub_address_and_zip() {
        let scrubber = PhiScrubber::default();
        let (text, _) = scrubber.scrub_text("lives at 42 Maple Street, 90210");
        assert!(!text.contains("Maple"));
        assert!(!text.contains("90210"));
    }

    #[test]
    fn test_scrub_credit_card() {
        let scrubber = PhiScrubber::default();
        let (text, report) = scrubber.scrub_text("card 4111 1111 1111 1111 given");
        assert!(!text.contains("4111"));
        assert_eq!(report.counts[&PhiCategory::CreditCard], 1);
    }

    #[test]
    fn test_name_bigram_is_advisory() {
        let scrubber = PhiScrubber::default();
        let (text, report) = scrubber.scrub_text("seen by John Smith yesterday");
        assert!(!text.contains("John Smith"));
        assert_eq!(report.counts[&PhiCategory::Name], 1);
        assert_eq!(report.normative_total(), 0);
    }

    #[test]
    fn test_scrub_is_idempotent() {
        let scrubber = PhiScrubber::default();
        let input = "John Smith, 123-45-6789, jane@x.org, MRN 1234567, 12/03/1980, 90210";
        let (once, _) = scrubber.scrub_text(input);
        let (twice, report) = scrubber.scrub_text(&once);
        assert_eq!(once, twice);
        assert_eq!(report.total(), 0);
    }

    #[test]
    fn test_clinical_text_survives() {
        let scrubber = PhiScrubber::default();
        let input = "45-year-old female with chest pain and shortness of breath";
        let (text, report) = scrubber.scrub_text(input);
        assert_eq!(text, input);
        assert_eq!(report.total(), 0);
    }

    #[test]
    fn test_structured_denylist_replaces_wholesale() {
        let scrubber = PhiScrubber::default();
        let value = json!({
            "firstName": "Jane",
            "last_name": "Doe",
            "age": 45,
            "symptoms": ["chest pain"],
            "contact": { "email": "jane@example.org", "phone": 5551234567u64 }
        });
        let scrubbed = scrubber.scrub_value(&value);
        assert_eq!(scrubbed["firstName"], REDACTED);
        assert_eq!(scrubbed["last_name"], REDACTED);
        assert_eq!(scrubbed["age"], 45);
        assert_eq!(scrubbed["symptoms"][0], "chest pain");
        assert_eq!(scrubbed["contact"]["email"], REDACTED);
        // Non-string denylisted value is still replaced wholesale
        assert_eq!(scrubbed["contact"]["phone"], REDACTED);
    }

    #[test]
    fn test_structured_string_leaves_scrubbed() {
        let scrubber = PhiScrubber::default();
        let value = json!({ "note": "reach me at 555-123-4567" });
        let scrubbed = scrubber.scrub_value(&value);
        let note = scrubbed["note"].as_str().unwrap();
        assert!(!note.contains("555-123-4567"));
    }

    #[test]
    fn test_configured_key_alias() {
        let scrubber = PhiScrubber::new(REDACTED, &["insuranceNumber".to_string()]);
        let value = json!({ "insurance_number": "POL-99812" });
        let scrubbed = scrubber.scrub_value(&value);
        assert_eq!(scrubbed["insurance_number"], REDACTED);
    }

    #[test]
    fn test_custom_replacement_token() {
        let scrubber = PhiScrubber::new("<phi>", &[]);
        let (text, _) = scrubber.scrub_text("ssn 123-45-6789");
        assert!(text.contains("<phi>"));
        assert!(!text.contains(REDACTED));
    }

    #[test]
    fn test_report_totals() {
        let scrubber = PhiScrubber::default();
        let (_, report) =
            scrubber.scrub_text("123-45-6789 and 987-65-4321 plus bob@example.com");
        assert_eq!(report.counts[&PhiCategory::Ssn], 2);
        assert_eq!(report.counts[&PhiCategory::Email], 1);
        assert_eq!(report.total(), 3);
    }
}
