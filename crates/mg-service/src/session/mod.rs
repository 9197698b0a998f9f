//! In-memory session store.
//!
//! The store is the only component allowed to mutate session records. Each
//! record sits behind its own lock so a hot session never serializes the
//! whole map; the outer map lock is held only for lookup and insert/remove.
//!
//! `validate` is the single place `last_activity` advances, and the advance
//! is monotone under the per-session lock. Sweeping takes a read snapshot of
//! candidate ids, then re-checks each candidate under its own lock before
//! deactivating, in bounded batches per cycle.

use crate::crypto::{CryptoError, TokenService};
use crate::models::{AuditKind, AuditOutcome, AuditRecord, AuditSeverity};
use crate::models::{ClientFingerprint, MedicalContext, SessionState};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument};

/// Maximum sessions deactivated or purged per sweep cycle. Bounds the time
/// the sweeper spends holding any lock in one pass.
const SWEEP_BATCH: usize = 256;

/// How long a deactivated record stays visible after expiry so its final
/// audit emission cannot race its removal.
const PURGE_GRACE_MINUTES: i64 = 5;

fn purge_grace() -> ChronoDuration {
    ChronoDuration::minutes(PURGE_GRACE_MINUTES)
}

/// Why a token failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("no session token provided")]
    NoToken,
    #[error("token signature rejected")]
    BadSignature,
    #[error("token refers to an unknown session")]
    UnknownSession,
    #[error("session has been deactivated")]
    Inactive,
    #[error("session expired")]
    Expired,
}

/// A validated view of a session, handed to request handlers.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: String,
    /// Hash suitable for audit records and rate-limit keys.
    pub id_hash: String,
    pub expires_at: DateTime<Utc>,
    entry: Arc<Mutex<SessionState>>,
}

impl SessionHandle {
    /// Record tool/resource usage on the session's medical context.
    pub async fn record_usage(&self, tools: &[String], resource: &str) {
        let mut state = self.entry.lock().await;
        state.context.interactions += 1;
        for tool in tools {
            state.context.record_tool(tool);
        }
        state.context.record_resource(resource);
    }

    /// Snapshot the current state (for health/tests).
    pub async fn snapshot(&self) -> SessionState {
        self.entry.lock().await.clone()
    }
}

/// Shared, concurrency-safe session store.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionState>>>>,
    tokens: Arc<TokenService>,
    hash_secret: Vec<u8>,
    ttl: ChronoDuration,
}

impl SessionStore {
    pub fn new(tokens: Arc<TokenService>, hash_secret: Vec<u8>, ttl_minutes: i64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            tokens,
            hash_secret,
            ttl: ChronoDuration::minutes(ttl_minutes.max(1)),
        }
    }

    /// Create a session and issue its bearer token.
    ///
    /// Returns `(token, expiry)`; the raw session id never leaves the store.
    #[instrument(skip_all, name = "mg.session.create")]
    pub async fn create(
        &self,
        fingerprint: ClientFingerprint,
    ) -> Result<(String, DateTime<Utc>), CryptoError> {
        let id = new_session_id();
        let now = Utc::now();
        let expires_at = now + self.ttl;

        let token = self.tokens.issue(&id, expires_at)?;

        let state = SessionState {
            id: id.clone(),
            created_at: now,
            last_activity: now,
            expires_at,
            fingerprint,
            active: true,
            context: MedicalContext::default(),
        };

        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(state)));

        debug!(target: "mg.session", session = %self.hash(&id), "session created");
        Ok((token, expires_at))
    }

    /// Validate a bearer token and touch the session.
    ///
    /// This is the only call that advances `last_activity`. The advance is
    /// monotone: concurrent validations can interleave, but none ever moves
    /// the timestamp backwards or past its own `now`.
    #[instrument(skip_all, name = "mg.session.validate")]
    pub async fn validate(&self, token: Option<&str>) -> Result<SessionHandle, ValidationFailure> {
        let token = token.ok_or(ValidationFailure::NoToken)?;

        let claims = match self.tokens.validate(token) {
            Ok(claims) => claims,
            Err(CryptoError::TokenExpired) => return Err(ValidationFailure::Expired),
            Err(_) => return Err(ValidationFailure::BadSignature),
        };

        let entry = {
            let sessions = self.sessions.read().await;
            sessions
                .get(&claims.sid)
                .cloned()
                .ok_or(ValidationFailure::UnknownSession)?
        };

        let now = Utc::now();
        let mut state = entry.lock().await;
        if !state.active {
            return Err(ValidationFailure::Inactive);
        }
        if state.is_expired(now) {
            return Err(ValidationFailure::Expired);
        }
        state.touch(now);
        let handle = SessionHandle {
            id: state.id.clone(),
            id_hash: self.hash(&state.id),
            expires_at: state.expires_at,
            entry: entry.clone(),
        };
        drop(state);

        Ok(handle)
    }

    /// Monotone deactivation. Returns the audit record to emit, or `None`
    /// when the session was unknown or already inactive.
    #[instrument(skip_all, name = "mg.session.deactivate")]
    pub async fn deactivate(&self, id: &str) -> Option<AuditRecord> {
        let entry = self.sessions.read().await.get(id).cloned()?;
        let mut state = entry.lock().await;
        if !state.deactivate() {
            return None;
        }
        Some(
            AuditRecord::new(AuditKind::Access, AuditSeverity::Info, "session", "deactivate")
                .with_session_hash(self.hash(id))
                .with_outcome(AuditOutcome::Success),
        )
    }

    /// One sweep cycle: deactivate expired sessions, purge records that have
    /// been inactive past the grace window. Progress per cycle is bounded.
    ///
    /// Returns the audit records for sessions deactivated by this cycle.
    #[instrument(skip_all, name = "mg.session.sweep")]
    pub async fn sweep(&self) -> Vec<AuditRecord> {
        let now = Utc::now();

        // Read snapshot of candidate ids; no per-session lock held here.
        let candidates: Vec<(String, Arc<Mutex<SessionState>>)> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .take(SWEEP_BATCH)
                .collect()
        };

        let mut audits = Vec::new();
        let mut purge = Vec::new();

        for (id, entry) in candidates {
            // Re-check under the per-session lock: the snapshot may be stale.
            let mut state = entry.lock().await;
            if state.active && state.is_expired(now) {
                state.deactivate();
                audits.push(
                    AuditRecord::new(
                        AuditKind::Access,
                        AuditSeverity::Info,
                        "session",
                        "expire",
                    )
                    .with_session_hash(self.hash(&id))
                    .with_outcome(AuditOutcome::Success),
                );
            }
            if !state.active && now > state.expires_at + purge_grace() {
                purge.push(id);
            }
        }

        if !purge.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in &purge {
                sessions.remove(id);
            }
            info!(target: "mg.session", purged = purge.len(), "purged expired sessions");
        }

        audits
    }

    /// Current number of live records (active or in their grace window).
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Hash an id the way every audit-facing surface must.
    pub fn hash(&self, id: &str) -> String {
        common::hashing::hash_identifier(id, &self.hash_secret)
    }
}

/// Opaque 128-bit random id, hex-encoded.
fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
