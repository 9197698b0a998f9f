//! Session state record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hashed client attributes bound to a session at creation.
///
/// Both fields are `common::hashing` outputs; raw user agents and peer
/// addresses never enter the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFingerprint {
    pub user_agent_hash: String,
    pub peer_hash: String,
}

/// Per-session counters for the compliance surface.
///
/// `tools_used` and `resources_accessed` are sorted multisets: `BTreeMap`
/// keeps the keys ordered, the values count occurrences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalContext {
    pub interactions: u64,
    pub tools_used: BTreeMap<String, u32>,
    pub resources_accessed: BTreeMap<String, u32>,
}

impl MedicalContext {
    pub fn record_tool(&mut self, tool: &str) {
        *self.tools_used.entry(tool.to_string()).or_insert(0) += 1;
    }

    pub fn record_resource(&mut self, resource: &str) {
        *self
            .resources_accessed
            .entry(resource.to_string())
            .or_insert(0) += 1;
    }
}

/// In-memory session record.
///
/// Invariants, enforced by the store:
/// - `created_at <= last_activity <= expires_at`
/// - `last_activity` only advances
/// - once `active` is false it never becomes true again
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Opaque 128-bit random id, hex-encoded.
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub fingerprint: ClientFingerprint,
    pub active: bool,
    pub context: MedicalContext,
}

impl SessionState {
    /// Advance `last_activity`, never rewinding it.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    /// Monotone deactivation; returns whether this call made the transition.
    pub fn deactivate(&mut self) -> bool {
        let was_active = self.active;
        self.active = false;
        was_active
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
