//! Audit record shape.
//!
//! Records are append-only values: once emitted to the sink they are never
//! mutated. Free-text fields must be scrubbed before emission; session ids
//! appear only as `common::hashing` hashes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of audited event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditKind {
    Access,
    DataModification,
    MedicalQuery,
    SecurityEvent,
    Http,
    /// Substituted when the sink queue was full and the original record was
    /// shed. Retains the original severity.
    AuditDropped,
}

impl AuditKind {
    pub const ALL: [AuditKind; 6] = [
        AuditKind::Access,
        AuditKind::DataModification,
        AuditKind::MedicalQuery,
        AuditKind::SecurityEvent,
        AuditKind::Http,
        AuditKind::AuditDropped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Access => "access",
            AuditKind::DataModification => "data-modification",
            AuditKind::MedicalQuery => "medical-query",
            AuditKind::SecurityEvent => "security-event",
            AuditKind::Http => "http",
            AuditKind::AuditDropped => "audit-dropped",
        }
    }
}

/// Severity of an audited event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AuditSeverity {
    pub const ALL: [AuditSeverity; 4] = [
        AuditSeverity::Info,
        AuditSeverity::Warning,
        AuditSeverity::Error,
        AuditSeverity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSeverity::Info => "info",
            AuditSeverity::Warning => "warning",
            AuditSeverity::Error => "error",
            AuditSeverity::Critical => "critical",
        }
    }
}

/// Outcome of the audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Millisecond-precision timestamp from the process clock.
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    pub severity: AuditSeverity,
    /// Hashed session id (`h:` prefix), never the raw id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_hash: Option<String>,
    /// What was touched, e.g. "session", "medical-chat".
    pub resource: String,
    /// What was done, e.g. "create", "deactivate", "federate".
    pub action: String,
    pub outcome: AuditOutcome,
    /// Additional fields; scrubbed by the sink before write.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl AuditRecord {
    pub fn new(kind: AuditKind, severity: AuditSeverity, resource: &str, action: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            severity,
            session_hash: None,
            resource: resource.to_string(),
            action: action.to_string(),
            outcome: AuditOutcome::Success,
            details: Map::new(),
        }
    }

    pub fn with_session_hash(mut self, hash: impl Into<String>) -> Self {
        self.session_hash = Some(hash.into());
        self
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// The shed-marker record substituted when the queue is full. Carries no
    /// details so it stays small enough to fit the reserved slot.
    pub fn dropped_marker(original: &AuditRecord) -> Self {
        Self {
            timestamp: original.timestamp,
            kind: AuditKind::AuditDropped,
            severity: original.severity,
            session_hash: None,
            resource: original.resource.clone(),
            action: original.action.clone(),
            outcome: original.outcome,
            details: Map::new(),
        }
    }
}
