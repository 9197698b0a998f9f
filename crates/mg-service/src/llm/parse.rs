//! Model-output parsing and confidence scoring.
//!
//! The adapter first tries to lift a structured JSON object out of the raw
//! completion (models wrap JSON in prose more often than not); when that
//! fails, a sentence scan derives summary / recommendations / safety /
//! evidence sections from marker words. Structured output scores higher than
//! derived text.

use crate::models::ResponseHint;
use serde_json::Value;

/// Fields a well-formed structured reply carries, per response hint. Used
/// for confidence scoring only; missing fields degrade, never fail.
pub fn expected_fields(hint: ResponseHint) -> &'static [&'static str] {
    match hint {
        ResponseHint::General => &["summary", "findings", "recommendations"],
        ResponseHint::DifferentialDiagnosis => {
            &["summary", "differentials", "recommendations", "redFlags"]
        }
        ResponseHint::TreatmentPlanning => {
            &["summary", "treatmentOptions", "recommendations", "monitoring"]
        }
        ResponseHint::ImageAnalysis => &["summary", "findings", "impression", "recommendations"],
        ResponseHint::EmergencyAssessment => {
            &["summary", "triageLevel", "immediateActions", "recommendations"]
        }
        ResponseHint::DrugTherapy => {
            &["summary", "interactions", "contraindications", "recommendations"]
        }
        ResponseHint::ResearchAnalysis => {
            &["summary", "keyFindings", "evidenceQuality", "recommendations"]
        }
        ResponseHint::PatientEducation => &["summary", "explanation", "selfCare", "recommendations"],
        ResponseHint::SpecialtyConsultation => {
            &["summary", "assessment", "differentials", "recommendations"]
        }
    }
}

/// Locate the longest balanced `{...}` region that parses as a JSON object.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut best: Option<&str> = None;

    let mut search_from = 0;
    while let Some(offset) = text.get(search_from..).and_then(|rest| rest.find('{')) {
        let start = search_from + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (i, &byte) in bytes.iter().enumerate().skip(start) {
            if in_string {
                if escaped {
                    escaped = false;
                } else if byte == b'\\' {
                    escaped = true;
                } else if byte == b'"' {
                    in_string = false;
                }
                continue;
            }
            match byte {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        let candidate = text.get(start..=i).unwrap_or_default();
                        if best.is_none_or(|current| candidate.len() > current.len()) {
                            best = Some(candidate);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
        search_from = start + 1;
    }

    best.and_then(|candidate| serde_json::from_str::<Value>(candidate).ok())
        .filter(Value::is_object)
}

/// Sections derived from free text when no structured payload is present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextSections {
    pub summary: String,
    pub recommendations: Vec<String>,
    pub safety: Vec<String>,
    pub evidence: Vec<String>,
}

const RECOMMENDATION_MARKERS: [&str; 5] = ["recommend", "should", "advise", "consider", "suggest"];
const SAFETY_MARKERS: [&str; 6] = [
    "warning",
    "caution",
    "risk",
    "seek immediate",
    "emergency",
    "urgent",
];
const EVIDENCE_MARKERS: [&str; 5] = ["study", "trial", "evidence", "guideline", "literature"];

/// Derive sections from prose by sentence scan.
pub fn extract_sections(text: &str) -> TextSections {
    let sentences: Vec<&str> = text
        .split_terminator(['.', '\n'])
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
        .collect();

    let mut sections = TextSections {
        summary: sentences
            .iter()
            .take(2)
            .copied()
            .collect::<Vec<_>>()
            .join(". "),
        ..TextSections::default()
    };

    for sentence in &sentences {
        let lowered = sentence.to_ascii_lowercase();
        if RECOMMENDATION_MARKERS.iter().any(|m| lowered.contains(m)) {
            sections.recommendations.push((*sentence).to_string());
        }
        if SAFETY_MARKERS.iter().any(|m| lowered.contains(m)) {
            sections.safety.push((*sentence).to_string());
        }
        if EVIDENCE_MARKERS.iter().any(|m| lowered.contains(m)) {
            sections.evidence.push((*sentence).to_string());
        }
    }

    sections
}

const SCORING_KEYWORDS: [&str; 12] = [
    "diagnosis",
    "treatment",
    "symptom",
    "clinical",
    "patient",
    "medication",
    "evidence",
    "differential",
    "risk",
    "recommend",
    "follow up",
    "monitor",
];

/// Structured responses: base 0.5 plus 0.1 per expected field present,
/// capped at 1.0.
pub fn score_structured(payload: &Value, hint: ResponseHint) -> f64 {
    let present = expected_fields(hint)
        .iter()
        .filter(|field| payload.get(**field).is_some())
        .count();
    (0.5 + 0.1 * present as f64).min(1.0)
}

/// Text responses: base 0.3 plus fractional keyword coverage, capped at 0.8.
pub fn score_text(text: &str) -> f64 {
    let lowered = text.to_ascii_lowercase();
    let matched = SCORING_KEYWORDS
        .iter()
        .filter(|keyword| lowered.contains(**keyword))
        .count();
    let coverage = matched as f64 / SCORING_KEYWORDS.len() as f64;
    (0.3 + coverage * 0.5).min(0.8)
}

/// Fully parsed model output.
#[derive(Debug, Clone)]
pub struct ParsedOutput {
    /// `true` when a structured object was recovered.
    pub structured: bool,
    /// The structured payload, or a synthesized object from text sections.
    pub payload: Value,
    pub summary: String,
    pub recommendations: Vec<String>,
    pub safety: Vec<String>,
    pub evidence: Vec<String>,
    pub confidence: f64,
    /// Raw completion retained when only text parsing succeeded.
    pub raw_text: Option<String>,
}

/// Parse one completion against the response hint.
pub fn parse_output(text: &str, hint: ResponseHint) -> ParsedOutput {
    if let Some(payload) = extract_json_object(text) {
        let confidence = score_structured(&payload, hint);
        let summary = payload
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let recommendations = string_list(payload.get("recommendations"));
        let safety = string_list(payload.get("safety").or_else(|| payload.get("redFlags")));
        let evidence = string_list(payload.get("evidence"));
        return ParsedOutput {
            structured: true,
            payload,
            summary,
            recommendations,
            safety,
            evidence,
            confidence,
            raw_text: None,
        };
    }

    let sections = extract_sections(text);
    let confidence = score_text(text);
    let payload = serde_json::json!({
        "summary": sections.summary,
        "recommendations": sections.recommendations,
        "safety": sections.safety,
        "evidence": sections.evidence,
    });
    ParsedOutput {
        structured: false,
        payload,
        summary: sections.summary.clone(),
        recommendations: sections.recommendations,
        safety: sections.safety,
        evidence: sections.evidence,
        confidence,
        raw_text: Some(text.to_string()),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(single)) => vec![single.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_plain_object() {
        let text = r#"{"summary": "stable angina", "recommendations": ["stress test"]}"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["summary"], "stable angina");
    }

    #[test]
    fn test_extract_object_wrapped_in_prose() {
        let text = "Here is my assessment:\n{\"summary\": \"likely viral\"}\nLet me know.";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["summary"], "likely viral");
    }

    #[test]
    fn test_extract_prefers_longest_balanced() {
        let text = r#"{"a": 1} and the full answer {"summary": "x", "findings": ["y"]}"#;
        let value = extract_json_object(text).unwrap();
        assert!(value.get("summary").is_some());
    }

    #[test]
    fn test_extract_handles_braces_in_strings() {
        let text = r#"{"summary": "use {braces} carefully", "n": 1}"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["summary"], "use {braces} carefully");
    }

    #[test]
    fn test_extract_rejects_unbalanced() {
        assert!(extract_json_object("{\"summary\": ").is_none());
        assert!(extract_json_object("no json here").is_none());
    }

    #[test]
    fn test_sections_from_prose() {
        let text = "The presentation suggests gastritis. Symptoms began after meals. \
                    I recommend an H. pylori test. Caution: seek immediate care if \
                    bleeding occurs. A 2019 study supports empiric therapy.";
        let sections = extract_sections(text);
        assert!(sections.summary.contains("gastritis"));
        assert_eq!(sections.recommendations.len(), 1);
        assert_eq!(sections.safety.len(), 1);
        assert_eq!(sections.evidence.len(), 1);
    }

    #[test]
    fn test_structured_scoring() {
        let full = json!({
            "summary": "s", "differentials": [], "recommendations": [], "redFlags": []
        });
        assert!(
            (score_structured(&full, ResponseHint::DifferentialDiagnosis) - 0.9).abs()
                < f64::EPSILON
        );

        let partial = json!({"summary": "s"});
        assert!(
            (score_structured(&partial, ResponseHint::DifferentialDiagnosis) - 0.6).abs()
                < f64::EPSILON
        );
    }

    #[test]
    fn test_text_scoring_bounds() {
        assert!((score_text("hello") - 0.3).abs() < f64::EPSILON);
        let dense = "diagnosis treatment symptom clinical patient medication evidence \
                     differential risk recommend follow up monitor";
        assert!((score_text(dense) - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_output_structured() {
        let text = r#"{"summary": "sinusitis", "findings": ["congestion"], "recommendations": ["saline rinse"]}"#;
        let parsed = parse_output(text, ResponseHint::General);
        assert!(parsed.structured);
        assert_eq!(parsed.summary, "sinusitis");
        assert_eq!(parsed.recommendations, vec!["saline rinse"]);
        assert!(parsed.raw_text.is_none());
        assert!(parsed.confidence >= 0.8);
    }

    #[test]
    fn test_parse_output_text_fallback() {
        let text = "Likely tension headache. I recommend hydration and rest.";
        let parsed = parse_output(text, ResponseHint::General);
        assert!(!parsed.structured);
        assert!(parsed.summary.contains("tension headache"));
        assert_eq!(parsed.recommendations.len(), 1);
        assert_eq!(parsed.raw_text.as_deref(), Some(text));
        assert!(parsed.confidence <= 0.8);
    }

    #[test]
    fn test_expected_fields_all_hints_have_summary() {
        for hint in [
            ResponseHint::General,
            ResponseHint::DifferentialDiagnosis,
            ResponseHint::TreatmentPlanning,
            ResponseHint::ImageAnalysis,
            ResponseHint::EmergencyAssessment,
            ResponseHint::DrugTherapy,
            ResponseHint::ResearchAnalysis,
            ResponseHint::PatientEducation,
            ResponseHint::SpecialtyConsultation,
        ] {
            assert!(expected_fields(hint).contains(&"summary"));
        }
    }
}
