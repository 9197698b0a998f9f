//! Clinical intent classification.
//!
//! Pure and deterministic: the same text, file descriptors, and patient
//! context always produce the same analysis. All knowledge lives in static
//! tables; configuration may add keyword aliases to existing tags but the
//! tag vocabulary itself is closed.

use crate::models::{
    IntentAnalysis, IntentTag, QueryFlags, ResponseHint, Specialty, ToolCapability, ToolName,
    Urgency,
};
use std::collections::{BTreeSet, HashMap};

/// Descriptor of one uploaded file: original name plus declared MIME.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub filename: String,
    pub mime: String,
}

impl FileDescriptor {
    pub fn new(filename: &str, mime: &str) -> Self {
        Self {
            filename: filename.to_string(),
            mime: mime.to_string(),
        }
    }

    fn is_dicom(&self) -> bool {
        self.filename.to_ascii_lowercase().ends_with(".dcm")
            || self.mime.to_ascii_lowercase().contains("dicom")
    }
}

/// One row of the intent table.
struct TagSpec {
    tag: IntentTag,
    urgency: Urgency,
    specialty: Specialty,
    capabilities: &'static [ToolCapability],
    /// Keywords in normalized form (lowercase, punctuation collapsed).
    keywords: &'static [&'static str],
}

use ToolCapability as Cap;

/// The authoritative intent table. Order is the tie-break order for equal
/// match scores.
static TAG_TABLE: [TagSpec; 17] = [
    TagSpec {
        tag: IntentTag::EmergencyAssessment,
        urgency: Urgency::Critical,
        specialty: Specialty::EmergencyMedicine,
        capabilities: &[Cap::Guidelines, Cap::Literature],
        keywords: &[
            "emergency",
            "unconscious",
            "unresponsive",
            "seizure",
            "critical",
            "anaphylaxis",
            "not breathing",
            "cardiac arrest",
            "severe bleeding",
            "overdose",
            "suicidal",
        ],
    },
    TagSpec {
        tag: IntentTag::CardiologyAnalysis,
        urgency: Urgency::High,
        specialty: Specialty::Cardiology,
        capabilities: &[Cap::Literature, Cap::Guidelines, Cap::Citations],
        keywords: &[
            "chest pain",
            "heart",
            "cardiac",
            "palpitations",
            "arrhythmia",
            "hypertension",
            "blood pressure",
            "myocardial",
            "angina",
            "ecg",
            "tachycardia",
        ],
    },
    TagSpec {
        tag: IntentTag::NeurologyAnalysis,
        urgency: Urgency::High,
        specialty: Specialty::Neurology,
        capabilities: &[Cap::Literature, Cap::Guidelines, Cap::Citations],
        keywords: &[
            "seizure",
            "stroke",
            "numbness",
            "migraine",
            "tremor",
            "neuropathy",
            "paralysis",
            "memory loss",
            "confusion",
            "headache",
        ],
    },
    TagSpec {
        tag: IntentTag::OncologyAnalysis,
        urgency: Urgency::High,
        specialty: Specialty::Oncology,
        capabilities: &[Cap::Literature, Cap::Trials, Cap::Citations],
        keywords: &[
            "cancer",
            "tumor",
            "oncology",
            "metastasis",
            "chemotherapy",
            "malignant",
            "lymphoma",
            "carcinoma",
            "radiation therapy",
        ],
    },
    TagSpec {
        tag: IntentTag::RadiologyAnalysis,
        urgency: Urgency::High,
        specialty: Specialty::Radiology,
        capabilities: &[Cap::Imaging, Cap::Literature],
        keywords: &[
            "x ray",
            "xray",
            "ct scan",
            "mri",
            "radiograph",
            "ultrasound",
            "opacity",
            "infiltrate",
            "effusion",
        ],
    },
    TagSpec {
        tag: IntentTag::DermatologyAnalysis,
        urgency: Urgency::Medium,
        specialty: Specialty::Dermatology,
        capabilities: &[Cap::Imaging, Cap::Literature],
        keywords: &[
            "skin",
            "mole",
            "lesion",
            "dermatitis",
            "psoriasis",
            "eczema",
            "melanoma",
            "itchy",
        ],
    },
    TagSpec {
        tag: IntentTag::PathologyAnalysis,
        urgency: Urgency::High,
        specialty: Specialty::Pathology,
        capabilities: &[Cap::Imaging, Cap::Literature],
        keywords: &[
            "pathology",
            "biopsy",
            "histology",
            "cytology",
            "specimen",
            "stain",
        ],
    },
    TagSpec {
        tag: IntentTag::DrugInteraction,
        urgency: Urgency::High,
        specialty: Specialty::Pharmacology,
        capabilities: &[Cap::Interactions, Cap::Guidelines],
        keywords: &[
            "drug interaction",
            "interactions",
            "medication",
            "contraindication",
            "dosage",
            "side effect",
            "prescribed",
            "taking",
        ],
    },
    TagSpec {
        tag: IntentTag::DifferentialDiagnosis,
        urgency: Urgency::Medium,
        specialty: Specialty::General,
        capabilities: &[Cap::Literature, Cap::Guidelines, Cap::Citations],
        keywords: &[
            "differential",
            "diagnosis",
            "possible causes",
            "what could",
            "rule out",
            "workup",
        ],
    },
    TagSpec {
        tag: IntentTag::SymptomAnalysis,
        urgency: Urgency::Medium,
        specialty: Specialty::General,
        capabilities: &[Cap::Literature, Cap::Guidelines],
        keywords: &[
            "symptom",
            "pain",
            "fever",
            "nausea",
            "fatigue",
            "cough",
            "dizziness",
            "swelling",
            "rash",
            "shortness of breath",
        ],
    },
    TagSpec {
        tag: IntentTag::TreatmentOptions,
        urgency: Urgency::Medium,
        specialty: Specialty::General,
        capabilities: &[Cap::Guidelines, Cap::Literature],
        keywords: &[
            "treatment",
            "therapy",
            "management",
            "intervention",
            "prognosis",
            "care plan",
        ],
    },
    TagSpec {
        tag: IntentTag::RareDisease,
        urgency: Urgency::Medium,
        specialty: Specialty::Genetics,
        capabilities: &[Cap::Literature, Cap::Citations],
        keywords: &[
            "rare disease",
            "orphan",
            "genetic",
            "syndrome",
            "hereditary",
            "mutation",
        ],
    },
    TagSpec {
        tag: IntentTag::MedicalImageAnalysis,
        urgency: Urgency::Medium,
        specialty: Specialty::General,
        capabilities: &[Cap::Imaging],
        keywords: &["image", "scan", "picture", "attached", "upload"],
    },
    TagSpec {
        tag: IntentTag::LiteratureSearch,
        urgency: Urgency::Low,
        specialty: Specialty::Research,
        capabilities: &[Cap::Literature, Cap::Citations],
        keywords: &[
            "study",
            "studies",
            "research",
            "evidence",
            "literature",
            "publication",
            "journal",
            "meta analysis",
        ],
    },
    TagSpec {
        tag: IntentTag::ClinicalTrials,
        urgency: Urgency::Low,
        specialty: Specialty::Research,
        capabilities: &[Cap::Trials, Cap::Citations],
        keywords: &[
            "clinical trial",
            "trials",
            "enrollment",
            "eligibility",
            "recruiting",
            "phase",
        ],
    },
    TagSpec {
        tag: IntentTag::GuidelinesLookup,
        urgency: Urgency::Low,
        specialty: Specialty::General,
        capabilities: &[Cap::Guidelines],
        keywords: &[
            "guideline",
            "guidelines",
            "protocol",
            "recommendation",
            "standard of care",
            "consensus",
        ],
    },
    TagSpec {
        tag: IntentTag::GeneralMedicalQuery,
        urgency: Urgency::Low,
        specialty: Specialty::General,
        capabilities: &[Cap::Literature],
        keywords: &["what is", "how does", "explain", "tell me about"],
    },
];

/// Filename hints: `(hint, tag, specialty)`. Hints of three characters or
/// fewer must match a whole filename token; longer hints match as
/// substrings ("xray" inside "chest_xray.png").
static FILENAME_HINTS: [(&str, IntentTag, Specialty); 12] = [
    ("xray", IntentTag::RadiologyAnalysis, Specialty::Radiology),
    ("ct", IntentTag::RadiologyAnalysis, Specialty::Radiology),
    ("mri", IntentTag::RadiologyAnalysis, Specialty::Radiology),
    ("ultrasound", IntentTag::RadiologyAnalysis, Specialty::Radiology),
    ("radiograph", IntentTag::RadiologyAnalysis, Specialty::Radiology),
    ("dermoscopy", IntentTag::DermatologyAnalysis, Specialty::Dermatology),
    ("skin", IntentTag::DermatologyAnalysis, Specialty::Dermatology),
    ("mole", IntentTag::DermatologyAnalysis, Specialty::Dermatology),
    ("pathology", IntentTag::PathologyAnalysis, Specialty::Pathology),
    ("biopsy", IntentTag::PathologyAnalysis, Specialty::Pathology),
    ("fundus", IntentTag::RadiologyAnalysis, Specialty::Radiology),
    ("oct", IntentTag::RadiologyAnalysis, Specialty::Radiology),
];

static URGENCY_WORDS: [&str; 7] = [
    "urgent",
    "emergency",
    "critical",
    "immediately",
    "severe",
    "asap",
    "worsening",
];

static TIME_WORDS: [&str; 8] = [
    "yesterday", "today", "hours", "days", "weeks", "since", "ago", "sudden",
];

static MEDICATION_WORDS: [&str; 7] = [
    "medication",
    "taking",
    "prescribed",
    "dose",
    "tablet",
    "drug",
    "mg",
];

static IMAGE_REFERENCE_WORDS: [&str; 6] =
    ["image", "scan", "x ray", "xray", "picture", "attached"];

/// Terms counted for the medical-term-density confidence component.
static MEDICAL_TERMS: [&str; 24] = [
    "patient",
    "chest pain",
    "symptom",
    "diagnosis",
    "treatment",
    "acute",
    "chronic",
    "bilateral",
    "hypertension",
    "diabetes",
    "cardiac",
    "pulmonary",
    "lesion",
    "edema",
    "syncope",
    "dyspnea",
    "fever",
    "pneumonia",
    "sepsis",
    "ischemia",
    "medication",
    "clinical",
    "prognosis",
    "pathology",
];

/// Normalize query text: lowercase, every non-alphanumeric run collapsed to
/// one space.
pub fn normalize_query(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

/// The classifier. Holds only configuration-supplied keyword aliases.
#[derive(Debug, Clone, Default)]
pub struct IntentClassifier {
    extra_keywords: HashMap<IntentTag, Vec<String>>,
}

impl IntentClassifier {
    pub fn new(extra_keywords: HashMap<IntentTag, Vec<String>>) -> Self {
        let extra_keywords = extra_keywords
            .into_iter()
            .map(|(tag, words)| {
                (
                    tag,
                    words.iter().map(|word| normalize_query(word)).collect(),
                )
            })
            .collect();
        Self { extra_keywords }
    }

    /// Classify a query. `membership` is the set of clients actually present
    /// in the tool pool; required tools are projected onto it.
    pub fn classify(
        &self,
        text: &str,
        files: &[FileDescriptor],
        patient_context: Option<&serde_json::Value>,
        membership: &BTreeSet<ToolName>,
    ) -> IntentAnalysis {
        let normalized = normalize_query(text);
        let word_count = normalized.split(' ').filter(|w| !w.is_empty()).count();

        // Image pass (files first, per the image-first rule)
        let mut image_tags: Vec<(IntentTag, Specialty)> = Vec::new();
        for file in files {
            if file.is_dicom() {
                image_tags.push((IntentTag::RadiologyAnalysis, Specialty::Radiology));
                break; // DICOM short-circuits the rest of the file scan
            }
            if let Some(hit) = filename_hint(&file.filename) {
                image_tags.push(hit);
            }
        }
        if !files.is_empty() && image_tags.is_empty() {
            // An upload with no recognizable hint is still an image query
            image_tags.push((IntentTag::MedicalImageAnalysis, Specialty::General));
        }

        // Text pass: score each tag by keyword coverage
        let mut scored: Vec<(IntentTag, f64)> = Vec::new();
        for spec in &TAG_TABLE {
            let extra = self.extra_keywords.get(&spec.tag);
            let total = spec.keywords.len() + extra.map_or(0, Vec::len);
            if total == 0 {
                continue;
            }
            let mut matches = 0usize;
            for keyword in spec.keywords {
                if normalized.contains(keyword) {
                    matches += 1;
                }
            }
            if let Some(extra) = extra {
                for keyword in extra {
                    if normalized.contains(keyword.as_str()) {
                        matches += 1;
                    }
                }
            }
            if matches > 0 {
                scored.push((spec.tag, matches as f64 / total as f64));
            }
        }
        // Stable sort keeps table order for equal scores
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        // Merge: image-derived tags lead, then text tags
        let mut intents: Vec<IntentTag> = Vec::new();
        for (tag, _) in &image_tags {
            if !intents.contains(tag) {
                intents.push(*tag);
            }
        }
        for (tag, _) in &scored {
            if !intents.contains(tag) {
                intents.push(*tag);
            }
        }

        let flags = QueryFlags {
            has_image_upload: !files.is_empty(),
            has_symptoms: contains_any(&normalized, symptom_keywords())
                || context_has_list(patient_context, "symptoms"),
            has_medications: contains_any(&normalized, &MEDICATION_WORDS)
                || context_has_list(patient_context, "medications"),
            has_time_reference: contains_any(&normalized, &TIME_WORDS),
            has_urgency_word: contains_any(&normalized, &URGENCY_WORDS),
            has_image_reference: contains_any(&normalized, &IMAGE_REFERENCE_WORDS),
        };

        if intents.is_empty() {
            let required_tools = project(&[Cap::Literature], membership);
            return IntentAnalysis::general_fallback(required_tools, flags);
        }

        // Specialty: most specific non-general wins, fixed priority order
        let mut specialty = Specialty::General;
        for candidate in image_tags
            .iter()
            .map(|(_, s)| *s)
            .chain(intents.iter().filter_map(tag_specialty))
        {
            if candidate.priority_rank() < specialty.priority_rank() {
                specialty = candidate;
            }
        }

        // Urgency: maximum across contributing tags
        let urgency = intents
            .iter()
            .filter_map(tag_urgency)
            .max()
            .unwrap_or(Urgency::Low);

        // Required tools: union of contributing tags, projected onto the pool
        let mut capabilities: BTreeSet<Cap> = BTreeSet::new();
        for tag in &intents {
            if let Some(spec) = TAG_TABLE.iter().find(|spec| spec.tag == *tag) {
                capabilities.extend(spec.capabilities.iter().copied());
            }
        }
        let required_tools = project(
            &capabilities.into_iter().collect::<Vec<_>>(),
            membership,
        );

        let confidence = confidence_score(&intents, &flags, &normalized, word_count);

        IntentAnalysis {
            intents,
            specialty,
            urgency,
            required_tools,
            confidence,
            flags,
        }
    }
}

/// Response-structure hint for an analysis, chosen from its leading intent.
pub fn response_hint(analysis: &IntentAnalysis) -> ResponseHint {
    let Some(primary) = analysis.intents.first() else {
        return ResponseHint::General;
    };
    match primary {
        IntentTag::EmergencyAssessment => ResponseHint::EmergencyAssessment,
        IntentTag::DifferentialDiagnosis => ResponseHint::DifferentialDiagnosis,
        IntentTag::TreatmentOptions => ResponseHint::TreatmentPlanning,
        IntentTag::DrugInteraction => ResponseHint::DrugTherapy,
        IntentTag::LiteratureSearch | IntentTag::ClinicalTrials => ResponseHint::ResearchAnalysis,
        IntentTag::RadiologyAnalysis
        | IntentTag::DermatologyAnalysis
        | IntentTag::PathologyAnalysis
        | IntentTag::MedicalImageAnalysis => ResponseHint::ImageAnalysis,
        IntentTag::GeneralMedicalQuery | IntentTag::GuidelinesLookup => ResponseHint::General,
        IntentTag::SymptomAnalysis | IntentTag::RareDisease => {
            if analysis.specialty == Specialty::General {
                ResponseHint::General
            } else {
                ResponseHint::SpecialtyConsultation
            }
        }
        IntentTag::CardiologyAnalysis
        | IntentTag::NeurologyAnalysis
        | IntentTag::OncologyAnalysis => ResponseHint::SpecialtyConsultation,
    }
}

fn filename_hint(filename: &str) -> Option<(IntentTag, Specialty)> {
    let lowered = filename.to_ascii_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    for (hint, tag, specialty) in &FILENAME_HINTS {
        let hit = if hint.len() <= 3 {
            tokens.iter().any(|token| token == hint)
        } else {
            lowered.contains(hint)
        };
        if hit {
            return Some((*tag, *specialty));
        }
    }
    None
}

fn tag_specialty(tag: &IntentTag) -> Option<Specialty> {
    TAG_TABLE
        .iter()
        .find(|spec| spec.tag == *tag)
        .map(|spec| spec.specialty)
}

fn tag_urgency(tag: &IntentTag) -> Option<Urgency> {
    TAG_TABLE
        .iter()
        .find(|spec| spec.tag == *tag)
        .map(|spec| spec.urgency)
}

fn symptom_keywords() -> &'static [&'static str] {
    TAG_TABLE
        .iter()
        .find(|spec| spec.tag == IntentTag::SymptomAnalysis)
        .map(|spec| spec.keywords)
        .unwrap_or(&[])
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| text.contains(keyword))
}

/// True when the patient context carries a non-empty array under `key`.
fn context_has_list(context: Option<&serde_json::Value>, key: &str) -> bool {
    context
        .and_then(|value| value.get(key))
        .and_then(serde_json::Value::as_array)
        .is_some_and(|items| !items.is_empty())
}

fn project(capabilities: &[Cap], membership: &BTreeSet<ToolName>) -> Vec<Cap> {
    capabilities
        .iter()
        .copied()
        .filter(|cap| membership.contains(&cap.backing_client()))
        .collect()
}

/// The bounded confidence sum:
/// base 0.4 for any fired intent, +0.2 for image/text agreement, +0.1 for
/// multi-intent agreement, plus up to 0.3 proportional to medical-term
/// density, clamped to [0, 1].
fn confidence_score(
    intents: &[IntentTag],
    flags: &QueryFlags,
    normalized: &str,
    word_count: usize,
) -> f64 {
    let mut confidence: f64 = 0.4;

    let has_image_intent = intents.iter().any(|tag| {
        matches!(
            tag,
            IntentTag::RadiologyAnalysis
                | IntentTag::DermatologyAnalysis
                | IntentTag::PathologyAnalysis
                | IntentTag::MedicalImageAnalysis
        )
    });
    if has_image_intent && flags.has_image_reference {
        confidence += 0.2;
    }
    if intents.len() >= 2 {
        confidence += 0.1;
    }

    let term_matches = MEDICAL_TERMS
        .iter()
        .filter(|term| normalized.contains(*term))
        .count();
    let density = term_matches as f64 / word_count.max(1) as f64;
    confidence += (density * 1.5).min(0.3);

    confidence.clamp(0.0, 1.0)
}
