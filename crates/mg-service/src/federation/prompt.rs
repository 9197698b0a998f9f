//! Prompt assembly.
//!
//! One fixed layout: intent-selected system prompt, patient context JSON,
//! per-source evidence JSON under uppercased section headers, the bounded
//! conversation tail, the user query last, and a response-structure
//! instruction matching the hint. Section order never varies, which keeps
//! the assembled prompt deterministic for identical inputs.

use crate::llm::parse::expected_fields;
use crate::models::{ChatMessage, EvidenceBundle, EvidenceEntry, IntentAnalysis, ResponseHint};
use serde_json::Value;

/// System prompt per response hint.
fn system_prompt(hint: ResponseHint, intent: &IntentAnalysis) -> String {
    let base = match hint {
        ResponseHint::General => {
            "You are a medical research assistant synthesizing evidence for a clinician. \
             Be precise, cite the supplied evidence, and never present speculation as fact."
        }
        ResponseHint::DifferentialDiagnosis => {
            "You are assisting with a differential diagnosis. Rank plausible diagnoses by \
             likelihood given the presentation, and flag any red-flag conditions explicitly."
        }
        ResponseHint::TreatmentPlanning => {
            "You are assisting with treatment planning. Ground every option in the supplied \
             guideline and literature evidence, and note monitoring requirements."
        }
        ResponseHint::ImageAnalysis => {
            "You are describing findings in a medical image for a clinician. Describe what is \
             visible, state an impression, and do not overstate certainty."
        }
        ResponseHint::EmergencyAssessment => {
            "You are performing an emergency triage assessment. Lead with immediate actions \
             and state clearly when emergency services should be involved."
        }
        ResponseHint::DrugTherapy => {
            "You are reviewing drug therapy. Enumerate interactions and contraindications \
             from the supplied interaction evidence before any other commentary."
        }
        ResponseHint::ResearchAnalysis => {
            "You are summarizing research evidence. Distinguish study quality and note where \
             the evidence is thin or conflicting."
        }
        ResponseHint::PatientEducation => {
            "You are preparing patient-friendly educational material. Use plain language and \
             keep clinical precision."
        }
        ResponseHint::SpecialtyConsultation => {
            "You are providing a specialty consultation note. Assess the presentation within \
             the named specialty and state what further workup is warranted."
        }
    };
    format!(
        "{base}\nSpecialty focus: {}. Query urgency: {}.",
        intent.specialty.as_str(),
        intent.urgency.as_str()
    )
}

/// The response-structure instruction appended last.
fn structure_instruction(hint: ResponseHint) -> String {
    format!(
        "Respond with a single JSON object containing the fields: {}.",
        expected_fields(hint).join(", ")
    )
}

/// Assemble the full prompt.
pub fn build_prompt(
    query: &str,
    intent: &IntentAnalysis,
    hint: ResponseHint,
    patient_context: Option<&Value>,
    evidence: &EvidenceBundle,
    history: &[ChatMessage],
) -> String {
    let mut sections: Vec<String> = Vec::new();
    sections.push(system_prompt(hint, intent));

    if let Some(context) = patient_context {
        sections.push(format!(
            "== PATIENT CONTEXT ==\n{}",
            serde_json::to_string(context).unwrap_or_else(|_| "{}".to_string())
        ));
    }

    for (source, entry) in evidence {
        if let EvidenceEntry::Result(result) = entry {
            sections.push(format!(
                "== {} EVIDENCE ==\n{}",
                source.as_str().to_uppercase(),
                serde_json::to_string(&result.payload).unwrap_or_else(|_| "{}".to_string())
            ));
        }
    }

    if !history.is_empty() {
        let rendered: Vec<String> = history
            .iter()
            .map(|message| format!("{}: {}", message.role, message.content))
            .collect();
        sections.push(format!("== CONVERSATION ==\n{}", rendered.join("\n")));
    }

    sections.push(format!("== QUERY ==\n{query}"));
    sections.push(structure_instruction(hint));

    sections.join("\n\n")
}

/// The prompt for the vision branch: shorter, image-specific.
pub fn build_vision_prompt(query: &str, intent: &IntentAnalysis) -> String {
    format!(
        "{}\n\n== QUERY ==\n{query}\n\n{}",
        system_prompt(ResponseHint::ImageAnalysis, intent),
        structure_instruction(ResponseHint::ImageAnalysis)
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::models::{
        QueryFlags, Specialty, ToolCapability, ToolResult, Urgency,
    };
    use serde_json::json;
    use std::time::Duration;

    fn intent() -> IntentAnalysis {
        IntentAnalysis {
            intents: vec![],
            specialty: Specialty::Cardiology,
            urgency: Urgency::High,
            required_tools: vec![],
            confidence: 0.6,
            flags: QueryFlags::default(),
        }
    }

    fn evidence() -> EvidenceBundle {
        let mut bundle = EvidenceBundle::new();
        bundle.insert(
            ToolCapability::Literature,
            EvidenceEntry::Result(ToolResult {
                payload: json!({"articles": [{"title": "Chest pain workup"}]}),
                duration: Duration::from_millis(30),
                confidence: 0.55,
            }),
        );
        bundle
    }

    #[test]
    fn test_sections_in_fixed_order() {
        let prompt = build_prompt(
            "evaluate chest pain",
            &intent(),
            ResponseHint::General,
            Some(&json!({"age": 45})),
            &evidence(),
            &[ChatMessage {
                role: "user".to_string(),
                content: "earlier question".to_string(),
            }],
        );

        let context_at = prompt.find("== PATIENT CONTEXT ==").unwrap();
        let evidence_at = prompt.find("== LITERATURE EVIDENCE ==").unwrap();
        let conversation_at = prompt.find("== CONVERSATION ==").unwrap();
        let query_at = prompt.find("== QUERY ==").unwrap();
        assert!(context_at < evidence_at);
        assert!(evidence_at < conversation_at);
        assert!(conversation_at < query_at);
        // The structure instruction comes after the query
        assert!(prompt.rfind("single JSON object").unwrap() > query_at);
    }

    #[test]
    fn test_failed_sources_are_not_quoted() {
        let mut bundle = evidence();
        bundle.insert(
            ToolCapability::Citations,
            EvidenceEntry::Error {
                error: crate::models::ToolFailure {
                    kind: crate::models::ToolFailureKind::Timeout,
                    message: "deadline".to_string(),
                },
            },
        );
        let prompt = build_prompt(
            "q",
            &intent(),
            ResponseHint::General,
            None,
            &bundle,
            &[],
        );
        assert!(!prompt.contains("CITATIONS EVIDENCE"));
        assert!(prompt.contains("LITERATURE EVIDENCE"));
    }

    #[test]
    fn test_query_is_last_content_before_instruction() {
        let prompt = build_prompt("the actual question", &intent(), ResponseHint::General, None, &evidence(), &[]);
        assert!(prompt.contains("== QUERY ==\nthe actual question"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let a = build_prompt("q", &intent(), ResponseHint::General, None, &evidence(), &[]);
        let b = build_prompt("q", &intent(), ResponseHint::General, None, &evidence(), &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hint_selects_system_prompt() {
        let triage = build_prompt("q", &intent(), ResponseHint::EmergencyAssessment, None, &EvidenceBundle::new(), &[]);
        assert!(triage.contains("emergency triage assessment"));
        let drugs = build_prompt("q", &intent(), ResponseHint::DrugTherapy, None, &EvidenceBundle::new(), &[]);
        assert!(drugs.contains("interactions and contraindications"));
    }

    #[test]
    fn test_vision_prompt_shape() {
        let prompt = build_vision_prompt("evaluate for pneumonia", &intent());
        assert!(prompt.contains("medical image"));
        assert!(prompt.contains("== QUERY ==\nevaluate for pneumonia"));
    }
}
