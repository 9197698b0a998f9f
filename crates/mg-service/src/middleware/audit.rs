//! Inbound HTTP audit middleware.
//!
//! Outermost layer of the chain: every request produces exactly one `http`
//! audit record carrying method, route path, status, duration, and the
//! hashed peer address. Bodies and query strings are never recorded.

use crate::audit::AuditSink;
use crate::models::{AuditKind, AuditOutcome, AuditRecord, AuditSeverity};
use crate::observability::metrics::record_http_request;
use crate::session::SessionStore;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

#[derive(Clone)]
pub struct HttpAuditState {
    pub audit: AuditSink,
    pub sessions: Arc<SessionStore>,
}

#[instrument(skip_all, name = "mg.middleware.http_audit")]
pub async fn audit_http(
    State(state): State<HttpAuditState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status();
    let duration = started.elapsed();
    record_http_request(&path, status.as_u16(), duration);

    let severity = if status.is_server_error() {
        AuditSeverity::Error
    } else if status.is_client_error() {
        AuditSeverity::Warning
    } else {
        AuditSeverity::Info
    };
    let outcome = if status.is_success() || status.is_redirection() {
        AuditOutcome::Success
    } else if status.as_u16() == 401 || status.as_u16() == 429 {
        AuditOutcome::Denied
    } else {
        AuditOutcome::Failure
    };

    state.audit.emit(
        AuditRecord::new(AuditKind::Http, severity, &path, method.as_str())
            .with_outcome(outcome)
            .with_detail("peer", state.sessions.hash(&peer.ip().to_string()))
            .with_detail("status", status.as_u16())
            .with_detail("durationMs", duration.as_millis() as u64),
    );

    response
}
