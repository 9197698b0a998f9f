//! Tool vocabulary and the evidence bundle the orchestrator assembles.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Closed set of tool-provider clients the pool may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolName {
    LiteratureIndex,
    Citations,
    ClinicalTrials,
    KnowledgeBase,
    Imaging,
}

impl ToolName {
    pub const ALL: [ToolName; 5] = [
        ToolName::LiteratureIndex,
        ToolName::Citations,
        ToolName::ClinicalTrials,
        ToolName::KnowledgeBase,
        ToolName::Imaging,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::LiteratureIndex => "literature-index",
            ToolName::Citations => "citations",
            ToolName::ClinicalTrials => "clinical-trials",
            ToolName::KnowledgeBase => "knowledge-base",
            ToolName::Imaging => "imaging",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An evidence capability an intent can require.
///
/// Capabilities are what intents declare; each is backed by one pool client
/// and one wire method. Two capabilities may share a client (`guidelines` and
/// `interactions` both live on the knowledge base), which is why evidence is
/// keyed by capability rather than by client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCapability {
    Literature,
    Citations,
    Trials,
    Guidelines,
    Interactions,
    Imaging,
}

impl ToolCapability {
    /// The pool client that serves this capability.
    pub fn backing_client(&self) -> ToolName {
        match self {
            ToolCapability::Literature => ToolName::LiteratureIndex,
            ToolCapability::Citations => ToolName::Citations,
            ToolCapability::Trials => ToolName::ClinicalTrials,
            ToolCapability::Guidelines | ToolCapability::Interactions => ToolName::KnowledgeBase,
            ToolCapability::Imaging => ToolName::Imaging,
        }
    }

    /// The wire method invoked on the backing client.
    pub fn method(&self) -> &'static str {
        match self {
            ToolCapability::Literature => "searchLiterature",
            ToolCapability::Citations => "getCitations",
            ToolCapability::Trials => "searchTrials",
            ToolCapability::Guidelines => "searchGuidelines",
            ToolCapability::Interactions => "checkDrugInteractions",
            ToolCapability::Imaging => "analyzeImage",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCapability::Literature => "literature",
            ToolCapability::Citations => "citations",
            ToolCapability::Trials => "trials",
            ToolCapability::Guidelines => "guidelines",
            ToolCapability::Interactions => "interactions",
            ToolCapability::Imaging => "imaging",
        }
    }
}

impl fmt::Display for ToolCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful result from one evidence source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub payload: serde_json::Value,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// Per-source confidence in [0, 1].
    pub confidence: f64,
}

/// Why a tool call produced no evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolFailureKind {
    /// Client not connected, pool saturated, or no such client configured.
    Unavailable,
    /// The per-call deadline elapsed before a reply arrived.
    Timeout,
    /// The provider replied with a well-formed error envelope.
    Returned,
    /// The pool was shutting down.
    Shutdown,
}

/// Failed result from one evidence source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolFailure {
    pub kind: ToolFailureKind,
    pub message: String,
}

/// Outcome of one attempted evidence source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EvidenceEntry {
    Result(ToolResult),
    Error { error: ToolFailure },
}

impl EvidenceEntry {
    pub fn is_success(&self) -> bool {
        matches!(self, EvidenceEntry::Result(_))
    }
}

/// Evidence collected during fan-out, keyed by source name.
///
/// A `BTreeMap` keeps iteration order deterministic, which the merge step
/// relies on. Absence of a key means the source was never attempted; a
/// present key always records what happened to that attempt.
pub type EvidenceBundle = BTreeMap<ToolCapability, EvidenceEntry>;

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
