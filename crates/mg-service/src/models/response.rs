//! Synthesized response shape and safety alerts.

use super::evidence::EvidenceBundle;
use super::intent::IntentAnalysis;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Response-structure hint handed to the LLM adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseHint {
    General,
    DifferentialDiagnosis,
    TreatmentPlanning,
    ImageAnalysis,
    EmergencyAssessment,
    DrugTherapy,
    ResearchAnalysis,
    PatientEducation,
    SpecialtyConsultation,
}

impl ResponseHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseHint::General => "general",
            ResponseHint::DifferentialDiagnosis => "differential-diagnosis",
            ResponseHint::TreatmentPlanning => "treatment-planning",
            ResponseHint::ImageAnalysis => "image-analysis",
            ResponseHint::EmergencyAssessment => "emergency-assessment",
            ResponseHint::DrugTherapy => "drug-therapy",
            ResponseHint::ResearchAnalysis => "research-analysis",
            ResponseHint::PatientEducation => "patient-education",
            ResponseHint::SpecialtyConsultation => "specialty-consultation",
        }
    }
}

/// Kind of safety alert the orchestrator can derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    Emergency,
    ImageAnalysis,
    MedicationSafety,
    LowConfidence,
}

/// Severity level of a safety alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Medium,
    High,
    Critical,
}

/// A safety annotation derived purely from the intent analysis and the
/// synthesized response, never from raw upstream text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyAlert {
    pub kind: AlertKind,
    pub level: AlertLevel,
    pub message: String,
    pub action: String,
}

/// One finding in the merged response, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub source: String,
    pub content: String,
}

/// One recommendation in the merged response, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub source: String,
    pub text: String,
}

/// The structured response the federation pipeline produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizedResponse {
    /// Free-text summary for direct display.
    pub summary: String,
    /// Structured analysis object; its shape follows the response hint.
    pub analysis: serde_json::Value,
    pub findings: Vec<Finding>,
    pub recommendations: Vec<Recommendation>,
    pub safety_alerts: Vec<SafetyAlert>,
    /// Mean of all present per-source confidences, in [0, 1].
    pub confidence: f64,
    /// Per-source confidences keyed by source name ("llm", "literature", ...).
    pub source_confidences: BTreeMap<String, f64>,
    /// Evidence sources consulted for this response.
    pub mcp_tools: Vec<String>,
    /// Sources that were planned but produced no evidence.
    pub unavailable_sources: Vec<String>,
    pub evidence: EvidenceBundle,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disclaimer: Option<String>,
    /// The classification that drove this response, for transparency.
    pub intent: IntentAnalysis,
}

impl SynthesizedResponse {
    /// The fixed-shape response served when no evidence source and no LLM
    /// produced anything. Always HTTP 200; the summary literal is part of
    /// the public contract.
    pub fn safety_fallback(intent: IntentAnalysis, disclaimer: Option<String>) -> Self {
        Self {
            summary: "Medical analysis unavailable".to_string(),
            analysis: serde_json::json!({
                "status": "unavailable",
                "reason": "No evidence source or language model was reachable",
            }),
            findings: Vec::new(),
            recommendations: vec![
                Recommendation {
                    source: "system".to_string(),
                    text: "Please consult with a healthcare professional".to_string(),
                },
                Recommendation {
                    source: "system".to_string(),
                    text: "If this is an emergency, call emergency services immediately"
                        .to_string(),
                },
            ],
            safety_alerts: Vec::new(),
            confidence: 0.0,
            source_confidences: BTreeMap::new(),
            mcp_tools: Vec::new(),
            unavailable_sources: Vec::new(),
            evidence: EvidenceBundle::new(),
            timestamp: Utc::now(),
            disclaimer: Some(disclaimer.unwrap_or_else(|| {
                "This system provides research support only and does not replace \
                 professional medical judgment."
                    .to_string()
            })),
            intent,
        }
    }
}
