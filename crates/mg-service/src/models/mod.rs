//! Shared domain model for the Medical Research Gateway.
//!
//! These types form the vocabulary the components exchange: the closed intent
//! and tool vocabularies, the evidence bundle the orchestrator assembles, the
//! synthesized response shape, audit records, and session state. Wire-facing
//! structs serialize camelCase to match the public API contract.

mod audit;
mod evidence;
mod intent;
mod response;
mod session;

pub use audit::{AuditKind, AuditOutcome, AuditRecord, AuditSeverity};
pub use evidence::{
    EvidenceBundle, EvidenceEntry, ToolCapability, ToolFailure, ToolFailureKind, ToolName,
    ToolResult,
};
pub use intent::{IntentAnalysis, IntentTag, QueryFlags, Specialty, Urgency};
pub use response::{
    AlertKind, AlertLevel, Finding, Recommendation, ResponseHint, SafetyAlert,
    SynthesizedResponse,
};
pub use session::{ClientFingerprint, MedicalContext, SessionState};

use serde::{Deserialize, Serialize};

/// One turn of prior conversation, carried into prompt assembly.
///
/// Only the bounded tail (last N turns, default 5) ever reaches the
/// orchestrator; the HTTP layer truncates before handing it over.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// "user" or "assistant"; anything else is rejected at parse time.
    pub role: String,
    pub content: String,
}
