//! Session issuance handler.

use crate::errors::GatewayError;
use crate::models::{
    AuditKind, AuditOutcome, AuditRecord, AuditSeverity, ClientFingerprint,
};
use crate::routes::AppState;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Create a session bound to the caller's hashed fingerprint and return its
/// bearer token.
#[instrument(skip_all, name = "mg.handlers.create_session")]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<SessionResponse>, GatewayError> {
    let user_agent = headers
        .get("user-agent")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    let fingerprint = ClientFingerprint {
        user_agent_hash: state.sessions.hash(user_agent),
        peer_hash: state.sessions.hash(&peer.ip().to_string()),
    };
    let peer_hash = fingerprint.peer_hash.clone();

    let (token, expires_at) = state.sessions.create(fingerprint).await?;

    state.audit.emit(
        AuditRecord::new(AuditKind::Access, AuditSeverity::Info, "session", "create")
            .with_outcome(AuditOutcome::Success)
            .with_detail("peer", peer_hash),
    );

    Ok(Json(SessionResponse { token, expires_at }))
}
