//! Intent classification vocabulary and analysis result.
//!
//! The tag, specialty, and urgency vocabularies are closed. New tags enter
//! through configuration keyword aliases, never through code additions here.

use super::evidence::ToolCapability;
use serde::{Deserialize, Serialize};

/// Closed vocabulary of clinical intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentTag {
    RadiologyAnalysis,
    DermatologyAnalysis,
    PathologyAnalysis,
    MedicalImageAnalysis,
    DifferentialDiagnosis,
    SymptomAnalysis,
    TreatmentOptions,
    DrugInteraction,
    LiteratureSearch,
    ClinicalTrials,
    GuidelinesLookup,
    RareDisease,
    EmergencyAssessment,
    CardiologyAnalysis,
    NeurologyAnalysis,
    OncologyAnalysis,
    GeneralMedicalQuery,
}

impl IntentTag {
    /// All tags, in declaration order. Used by the classifier's text pass.
    pub const ALL: [IntentTag; 17] = [
        IntentTag::RadiologyAnalysis,
        IntentTag::DermatologyAnalysis,
        IntentTag::PathologyAnalysis,
        IntentTag::MedicalImageAnalysis,
        IntentTag::DifferentialDiagnosis,
        IntentTag::SymptomAnalysis,
        IntentTag::TreatmentOptions,
        IntentTag::DrugInteraction,
        IntentTag::LiteratureSearch,
        IntentTag::ClinicalTrials,
        IntentTag::GuidelinesLookup,
        IntentTag::RareDisease,
        IntentTag::EmergencyAssessment,
        IntentTag::CardiologyAnalysis,
        IntentTag::NeurologyAnalysis,
        IntentTag::OncologyAnalysis,
        IntentTag::GeneralMedicalQuery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentTag::RadiologyAnalysis => "RADIOLOGY_ANALYSIS",
            IntentTag::DermatologyAnalysis => "DERMATOLOGY_ANALYSIS",
            IntentTag::PathologyAnalysis => "PATHOLOGY_ANALYSIS",
            IntentTag::MedicalImageAnalysis => "MEDICAL_IMAGE_ANALYSIS",
            IntentTag::DifferentialDiagnosis => "DIFFERENTIAL_DIAGNOSIS",
            IntentTag::SymptomAnalysis => "SYMPTOM_ANALYSIS",
            IntentTag::TreatmentOptions => "TREATMENT_OPTIONS",
            IntentTag::DrugInteraction => "DRUG_INTERACTION",
            IntentTag::LiteratureSearch => "LITERATURE_SEARCH",
            IntentTag::ClinicalTrials => "CLINICAL_TRIALS",
            IntentTag::GuidelinesLookup => "GUIDELINES_LOOKUP",
            IntentTag::RareDisease => "RARE_DISEASE",
            IntentTag::EmergencyAssessment => "EMERGENCY_ASSESSMENT",
            IntentTag::CardiologyAnalysis => "CARDIOLOGY_ANALYSIS",
            IntentTag::NeurologyAnalysis => "NEUROLOGY_ANALYSIS",
            IntentTag::OncologyAnalysis => "ONCOLOGY_ANALYSIS",
            IntentTag::GeneralMedicalQuery => "GENERAL_MEDICAL_QUERY",
        }
    }
}

/// Closed set of medical specialties a query can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialty {
    Cardiology,
    Neurology,
    Oncology,
    Radiology,
    Dermatology,
    Pathology,
    EmergencyMedicine,
    Pharmacology,
    Research,
    Genetics,
    General,
}

impl Specialty {
    /// Fixed priority list for tie-breaking: the most specific non-general
    /// specialty wins, in this order.
    pub const PRIORITY: [Specialty; 11] = [
        Specialty::EmergencyMedicine,
        Specialty::Cardiology,
        Specialty::Neurology,
        Specialty::Oncology,
        Specialty::Radiology,
        Specialty::Dermatology,
        Specialty::Pathology,
        Specialty::Pharmacology,
        Specialty::Genetics,
        Specialty::Research,
        Specialty::General,
    ];

    /// Rank within [`Specialty::PRIORITY`]; lower is more specific.
    pub fn priority_rank(&self) -> usize {
        Specialty::PRIORITY
            .iter()
            .position(|s| s == self)
            .unwrap_or(Specialty::PRIORITY.len())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Specialty::Cardiology => "cardiology",
            Specialty::Neurology => "neurology",
            Specialty::Oncology => "oncology",
            Specialty::Radiology => "radiology",
            Specialty::Dermatology => "dermatology",
            Specialty::Pathology => "pathology",
            Specialty::EmergencyMedicine => "emergency_medicine",
            Specialty::Pharmacology => "pharmacology",
            Specialty::Research => "research",
            Specialty::Genetics => "genetics",
            Specialty::General => "general",
        }
    }
}

/// Urgency of a clinical query.
///
/// Ordering is strict: `critical > high > medium > low`. The derived `Ord`
/// relies on variant declaration order, so do not reorder these.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        }
    }
}

/// Flags derived from the raw query during classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFlags {
    pub has_image_upload: bool,
    pub has_symptoms: bool,
    pub has_medications: bool,
    pub has_time_reference: bool,
    pub has_urgency_word: bool,
    pub has_image_reference: bool,
}

/// Result of classifying one query.
///
/// Produced by the intent classifier and carried, unchanged, through the
/// orchestrator into the final response for transparency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntentAnalysis {
    /// Detected intents, strongest match first.
    pub intents: Vec<IntentTag>,
    pub specialty: Specialty,
    pub urgency: Urgency,
    /// Evidence sources the orchestrator should consult, already projected
    /// onto the clients actually present in the tool pool.
    pub required_tools: Vec<ToolCapability>,
    /// Classifier confidence in [0, 1].
    pub confidence: f64,
    pub flags: QueryFlags,
}

impl IntentAnalysis {
    /// A minimal analysis for queries nothing matched: general query, low
    /// urgency, literature only.
    pub fn general_fallback(required_tools: Vec<ToolCapability>, flags: QueryFlags) -> Self {
        Self {
            intents: vec![IntentTag::GeneralMedicalQuery],
            specialty: Specialty::General,
            urgency: Urgency::Low,
            required_tools,
            confidence: 0.2,
            flags,
        }
    }
}
