//! Deterministic result merging and safety-alert derivation.
//!
//! The merged payload is a pure function of the intent, the evidence bundle,
//! and the LLM outputs: identical inputs yield identical structured output,
//! timestamps aside. Alerts derive only from the intent analysis and the
//! merged response, never from raw upstream text.

use crate::llm::{LlmOutcome, LlmResult};
use crate::models::{
    AlertKind, AlertLevel, EvidenceBundle, EvidenceEntry, Finding, IntentAnalysis,
    Recommendation, SafetyAlert, SynthesizedResponse, Urgency,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;

/// Fixed emergency action text; part of the public contract.
pub const EMERGENCY_ACTION: &str =
    "Call emergency services or go to the nearest emergency room immediately";

/// Findings quoted per evidence source before falling back to a compact
/// payload rendering.
const MAX_FINDINGS_PER_SOURCE: usize = 5;

/// Ceiling on a compact payload rendering inside a finding.
const MAX_PAYLOAD_CHARS: usize = 400;

/// Array keys recognized as itemized evidence.
const ITEM_KEYS: [&str; 7] = [
    "articles",
    "results",
    "trials",
    "citations",
    "guidelines",
    "interactions",
    "findings",
];

/// Everything the merge step consumes.
pub struct MergeInputs {
    pub intent: IntentAnalysis,
    pub evidence: EvidenceBundle,
    pub llm: LlmResult,
    pub vision: Option<LlmOutcome>,
    pub had_image: bool,
    /// Whether the drug-interaction method was part of the plan.
    pub interactions_planned: bool,
    pub disclaimer: Option<String>,
    pub low_confidence_threshold: f64,
}

/// Merge all branches into one response.
pub fn merge(inputs: MergeInputs) -> SynthesizedResponse {
    let MergeInputs {
        intent,
        evidence,
        llm,
        vision,
        had_image,
        interactions_planned,
        disclaimer,
        low_confidence_threshold,
    } = inputs;

    let evidence_succeeded = evidence.values().any(EvidenceEntry::is_success);
    let llm_outcome = match &llm {
        LlmResult::Generated(outcome) => Some(outcome),
        LlmResult::Unavailable { .. } => None,
    };

    // Nothing anywhere: the fixed safety response (alerts still apply).
    if !evidence_succeeded && llm_outcome.is_none() && vision.is_none() {
        let mut response = SynthesizedResponse::safety_fallback(intent, disclaimer);
        response.evidence = evidence;
        response.safety_alerts = derive_alerts(
            &response.intent,
            had_image,
            interactions_planned,
            response.confidence,
            low_confidence_threshold,
        );
        return response;
    }

    let mut findings: Vec<Finding> = Vec::new();
    let mut recommendations: Vec<Recommendation> = Vec::new();
    let mut source_confidences: BTreeMap<String, f64> = BTreeMap::new();

    if let Some(outcome) = llm_outcome {
        source_confidences.insert("llm".to_string(), outcome.output.confidence);
        for content in value_strings(outcome.output.payload.get("findings")) {
            findings.push(Finding {
                source: "llm".to_string(),
                content,
            });
        }
        for text in &outcome.output.recommendations {
            recommendations.push(Recommendation {
                source: "llm".to_string(),
                text: text.clone(),
            });
        }
    }

    // Evidence sources, in bundle (sorted) order
    for (source, entry) in &evidence {
        match entry {
            EvidenceEntry::Result(result) => {
                source_confidences.insert(source.as_str().to_string(), result.confidence);
                for content in evidence_findings(&result.payload) {
                    findings.push(Finding {
                        source: source.as_str().to_string(),
                        content,
                    });
                }
            }
            EvidenceEntry::Error { .. } => {
                // A failed source drags overall confidence down instead of
                // silently vanishing from the mean.
                source_confidences.insert(source.as_str().to_string(), 0.0);
            }
        }
    }

    // Image branch, after the evidence sources
    if let Some(vision_outcome) = &vision {
        source_confidences.insert("vision".to_string(), vision_outcome.output.confidence);
        for content in value_strings(vision_outcome.output.payload.get("findings")) {
            findings.push(Finding {
                source: "vision".to_string(),
                content,
            });
        }
        for text in &vision_outcome.output.recommendations {
            recommendations.push(Recommendation {
                source: "vision".to_string(),
                text: text.clone(),
            });
        }
    }

    if recommendations.is_empty() {
        recommendations.push(Recommendation {
            source: "system".to_string(),
            text: "Correlate these findings with clinical judgment and consult a healthcare \
                   professional"
                .to_string(),
        });
    }

    let confidence = if source_confidences.is_empty() {
        0.0
    } else {
        source_confidences.values().sum::<f64>() / source_confidences.len() as f64
    };

    let summary = llm_outcome
        .map(|outcome| outcome.output.summary.clone())
        .filter(|summary| !summary.is_empty())
        .or_else(|| {
            vision
                .as_ref()
                .map(|outcome| outcome.output.summary.clone())
                .filter(|summary| !summary.is_empty())
        })
        .unwrap_or_else(|| {
            format!(
                "Synthesized {} evidence source(s); language-model synthesis was unavailable",
                evidence.values().filter(|entry| entry.is_success()).count()
            )
        });

    let mut analysis = llm_outcome
        .map(|outcome| outcome.output.payload.clone())
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    if let Some(vision_outcome) = &vision {
        if let Value::Object(map) = &mut analysis {
            map.insert(
                "imageAnalysis".to_string(),
                vision_outcome.output.payload.clone(),
            );
        }
    }

    let unavailable_sources: Vec<String> = evidence
        .iter()
        .filter(|(_, entry)| !entry.is_success())
        .map(|(source, _)| source.as_str().to_string())
        .collect();

    let mcp_tools: Vec<String> = intent
        .required_tools
        .iter()
        .map(|capability| capability.as_str().to_string())
        .collect();

    let safety_alerts = derive_alerts(
        &intent,
        had_image,
        interactions_planned,
        confidence,
        low_confidence_threshold,
    );

    SynthesizedResponse {
        summary,
        analysis,
        findings,
        recommendations,
        safety_alerts,
        confidence,
        source_confidences,
        mcp_tools,
        unavailable_sources,
        evidence,
        timestamp: Utc::now(),
        disclaimer,
        intent,
    }
}

/// Alert derivation rules, in emission order. Emergency always leads.
pub fn derive_alerts(
    intent: &IntentAnalysis,
    had_image: bool,
    interactions_planned: bool,
    confidence: f64,
    low_confidence_threshold: f64,
) -> Vec<SafetyAlert> {
    let mut alerts = Vec::new();

    if intent.urgency == Urgency::Critical {
        alerts.push(SafetyAlert {
            kind: AlertKind::Emergency,
            level: AlertLevel::Critical,
            message: "The query suggests a potentially life-threatening presentation".to_string(),
            action: EMERGENCY_ACTION.to_string(),
        });
    }

    if had_image {
        alerts.push(SafetyAlert {
            kind: AlertKind::ImageAnalysis,
            level: AlertLevel::High,
            message: "Automated image analysis is not a radiological diagnosis".to_string(),
            action: "Have the image reviewed by a qualified clinician".to_string(),
        });
    }

    if interactions_planned {
        alerts.push(SafetyAlert {
            kind: AlertKind::MedicationSafety,
            level: AlertLevel::High,
            message: "Automated drug-interaction screening was performed".to_string(),
            action: "Verify all medication changes with a pharmacist or physician".to_string(),
        });
    }

    if confidence < low_confidence_threshold {
        alerts.push(SafetyAlert {
            kind: AlertKind::LowConfidence,
            level: AlertLevel::Medium,
            message: "Confidence in this synthesis is limited".to_string(),
            action: "Treat this response as preliminary and confirm with a healthcare \
                     professional"
                .to_string(),
        });
    }

    alerts
}

/// Pull quotable findings out of a tool payload: itemized arrays first,
/// compact rendering as the fallback.
fn evidence_findings(payload: &Value) -> Vec<String> {
    for key in ITEM_KEYS {
        if let Some(items) = payload.get(key).and_then(Value::as_array) {
            if !items.is_empty() {
                return items
                    .iter()
                    .take(MAX_FINDINGS_PER_SOURCE)
                    .map(item_text)
                    .collect();
            }
        }
    }
    vec![compact(payload)]
}

fn item_text(item: &Value) -> String {
    for key in ["title", "name", "summary", "description"] {
        if let Some(text) = item.get(key).and_then(Value::as_str) {
            return text.to_string();
        }
    }
    match item {
        Value::String(text) => text.clone(),
        other => compact(other),
    }
}

fn compact(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() > MAX_PAYLOAD_CHARS {
        let truncated: String = rendered.chars().take(MAX_PAYLOAD_CHARS).collect();
        format!("{truncated}…")
    } else {
        rendered
    }
}

fn value_strings(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().map(item_text).collect(),
        Some(Value::String(single)) => vec![single.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::llm::parse::parse_output;
    use crate::models::{
        QueryFlags, ResponseHint, Specialty, ToolCapability, ToolFailure, ToolFailureKind,
        ToolResult,
    };
    use serde_json::json;
    use std::time::Duration;

    fn intent(urgency: Urgency) -> IntentAnalysis {
        IntentAnalysis {
            intents: vec![],
            specialty: Specialty::General,
            urgency,
            required_tools: vec![ToolCapability::Literature, ToolCapability::Guidelines],
            confidence: 0.6,
            flags: QueryFlags::default(),
        }
    }

    fn generated(json: Value) -> LlmResult {
        LlmResult::Generated(LlmOutcome {
            provider: "primary".to_string(),
            output: parse_output(&json.to_string(), ResponseHint::General),
        })
    }

    fn success_entry(payload: Value) -> EvidenceEntry {
        EvidenceEntry::Result(ToolResult {
            payload,
            duration: Duration::from_millis(25),
            confidence: 0.55,
        })
    }

    fn failure_entry() -> EvidenceEntry {
        EvidenceEntry::Error {
            error: ToolFailure {
                kind: ToolFailureKind::Unavailable,
                message: "client failed".to_string(),
            },
        }
    }

    fn base_inputs(llm: LlmResult, evidence: EvidenceBundle) -> MergeInputs {
        MergeInputs {
            intent: intent(Urgency::Medium),
            evidence,
            llm,
            vision: None,
            had_image: false,
            interactions_planned: false,
            disclaimer: Some("Research support only.".to_string()),
            low_confidence_threshold: 0.6,
        }
    }

    #[test]
    fn test_merge_tags_findings_with_sources() {
        let mut evidence = EvidenceBundle::new();
        evidence.insert(
            ToolCapability::Literature,
            success_entry(json!({"articles": [{"title": "Statin outcomes"}]})),
        );
        let llm = generated(json!({
            "summary": "overview",
            "findings": ["finding one"],
            "recommendations": ["do x"],
        }));

        let response = merge(base_inputs(llm, evidence));
        assert!(response
            .findings
            .iter()
            .any(|f| f.source == "llm" && f.content == "finding one"));
        assert!(response
            .findings
            .iter()
            .any(|f| f.source == "literature" && f.content == "Statin outcomes"));
        assert_eq!(response.recommendations[0].source, "llm");
    }

    #[test]
    fn test_failed_source_reduces_confidence_and_is_noted() {
        let llm = generated(json!({"summary": "s", "findings": [], "recommendations": ["r"]}));
        let mut healthy = EvidenceBundle::new();
        healthy.insert(ToolCapability::Literature, success_entry(json!({"n": 1})));
        let all_up = merge(base_inputs(llm.clone(), healthy.clone()));

        healthy.insert(ToolCapability::Citations, failure_entry());
        let degraded = merge(base_inputs(llm, healthy));

        assert!(degraded.confidence < all_up.confidence);
        assert_eq!(degraded.unavailable_sources, vec!["citations".to_string()]);
        assert_eq!(degraded.source_confidences["citations"], 0.0);
    }

    #[test]
    fn test_total_failure_returns_safety_response() {
        let mut evidence = EvidenceBundle::new();
        evidence.insert(ToolCapability::Literature, failure_entry());
        evidence.insert(ToolCapability::Guidelines, failure_entry());

        let response = merge(base_inputs(
            LlmResult::Unavailable { causes: vec![] },
            evidence,
        ));

        assert_eq!(response.summary, "Medical analysis unavailable");
        assert!(response
            .recommendations
            .iter()
            .any(|r| r.text == "Please consult with a healthcare professional"));
        // The evidence trail is preserved even in the fixed response
        assert_eq!(response.evidence.len(), 2);
    }

    #[test]
    fn test_evidence_only_response_when_llm_down() {
        let mut evidence = EvidenceBundle::new();
        evidence.insert(
            ToolCapability::Literature,
            success_entry(json!({"articles": [{"title": "A"}]})),
        );
        let response = merge(base_inputs(
            LlmResult::Unavailable { causes: vec!["primary: down".to_string()] },
            evidence,
        ));

        assert_ne!(response.summary, "Medical analysis unavailable");
        assert!(response.summary.contains("unavailable"));
        assert!(response.findings.iter().any(|f| f.source == "literature"));
        assert_eq!(response.recommendations[0].source, "system");
    }

    #[test]
    fn test_emergency_alert_leads_and_is_unique() {
        let llm = generated(json!({"summary": "s", "recommendations": ["r"]}));
        let mut inputs = base_inputs(llm, EvidenceBundle::new());
        inputs.intent = intent(Urgency::Critical);
        inputs.had_image = true;

        let response = merge(inputs);
        let emergencies: Vec<&SafetyAlert> = response
            .safety_alerts
            .iter()
            .filter(|alert| alert.kind == AlertKind::Emergency)
            .collect();
        assert_eq!(emergencies.len(), 1);
        assert_eq!(response.safety_alerts[0].kind, AlertKind::Emergency);
        assert_eq!(response.safety_alerts[0].level, AlertLevel::Critical);
        assert_eq!(response.safety_alerts[0].action, EMERGENCY_ACTION);
    }

    #[test]
    fn test_image_and_interaction_alerts() {
        let llm = generated(json!({"summary": "s", "recommendations": ["r"]}));
        let mut inputs = base_inputs(llm, EvidenceBundle::new());
        inputs.had_image = true;
        inputs.interactions_planned = true;

        let response = merge(inputs);
        assert!(response
            .safety_alerts
            .iter()
            .any(|a| a.kind == AlertKind::ImageAnalysis && a.level == AlertLevel::High));
        assert!(response
            .safety_alerts
            .iter()
            .any(|a| a.kind == AlertKind::MedicationSafety && a.level == AlertLevel::High));
    }

    #[test]
    fn test_low_confidence_alert_threshold() {
        let llm = generated(json!({"summary": "s", "recommendations": ["r"]}));
        let mut evidence = EvidenceBundle::new();
        evidence.insert(ToolCapability::Literature, failure_entry());
        evidence.insert(ToolCapability::Citations, failure_entry());

        let response = merge(base_inputs(llm, evidence));
        assert!(response.confidence < 0.6);
        assert!(response
            .safety_alerts
            .iter()
            .any(|a| a.kind == AlertKind::LowConfidence));
    }

    #[test]
    fn test_merge_is_deterministic_modulo_timestamp() {
        let build = || {
            let mut evidence = EvidenceBundle::new();
            evidence.insert(
                ToolCapability::Literature,
                success_entry(json!({"articles": [{"title": "A"}, {"title": "B"}]})),
            );
            evidence.insert(ToolCapability::Guidelines, success_entry(json!({"n": 2})));
            merge(base_inputs(
                generated(json!({"summary": "s", "findings": ["f"], "recommendations": ["r"]})),
                evidence,
            ))
        };
        let mut first = serde_json::to_value(build()).unwrap();
        let mut second = serde_json::to_value(build()).unwrap();
        first.as_object_mut().unwrap().remove("timestamp");
        second.as_object_mut().unwrap().remove("timestamp");
        assert_eq!(first, second);
    }

    #[test]
    fn test_vision_branch_contributes() {
        let llm = generated(json!({"summary": "s", "recommendations": ["r"]}));
        let vision = LlmOutcome {
            provider: "primary".to_string(),
            output: parse_output(
                &json!({"summary": "clear lungs", "findings": ["no infiltrate"], "recommendations": []})
                    .to_string(),
                ResponseHint::ImageAnalysis,
            ),
        };
        let mut inputs = base_inputs(llm, EvidenceBundle::new());
        inputs.vision = Some(vision);
        inputs.had_image = true;

        let response = merge(inputs);
        assert!(response
            .findings
            .iter()
            .any(|f| f.source == "vision" && f.content == "no infiltrate"));
        assert!(response.source_confidences.contains_key("vision"));
        assert_eq!(response.analysis["imageAnalysis"]["summary"], "clear lungs");
    }

    #[test]
    fn test_mcp_tools_reflect_required_tools() {
        let llm = generated(json!({"summary": "s", "recommendations": ["r"]}));
        let response = merge(base_inputs(llm, EvidenceBundle::new()));
        assert_eq!(
            response.mcp_tools,
            vec!["literature".to_string(), "guidelines".to_string()]
        );
    }
}
